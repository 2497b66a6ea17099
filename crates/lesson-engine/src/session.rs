//! Session state machine.
//!
//! A [`Session`] owns the mutable state of one learner working through one
//! lesson: position, lives, score, recorded answers, feedback and phase. It
//! is plain synchronous data; timers, persistence and events live in
//! [`crate::runner::LessonRunner`], which drives it.
//!
//! ```text
//!              answer / advance
//!   ┌──────────────┐  last step  ┌─────────────┐
//!   │  InProgress  │────────────►│ Celebrating │
//!   └──────────────┘             └─────────────┘
//!          │ lives == 0                 │
//!          ▼                            │
//!   ┌──────────────┐     retry          │
//!   │   GameOver   │──────────► fresh InProgress (next attempt)
//!   └──────────────┘
//! ```
//!
//! Commands that do not apply in the current state are ignored, never
//! errors: a double-tapped check or an early continue must leave the session
//! exactly as it was.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{SessionRules, MAX_LIVES};
use crate::judge::{is_ready, judge_body, Correctness};
use crate::lesson::{LessonDefinition, LessonStep, Response, StepBody, StepKind};

// ============================================================================
// Phase / Feedback
// ============================================================================

/// Phase of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Steps are being worked through.
    InProgress,
    /// Every step was passed; terminal for the attempt.
    Celebrating,
    /// Lives ran out; terminal for the attempt.
    GameOver,
}

impl Phase {
    /// Returns `true` for `Celebrating` and `GameOver`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Celebrating | Self::GameOver)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Celebrating => write!(f, "celebrating"),
            Self::GameOver => write!(f, "game_over"),
        }
    }
}

/// Feedback shown for the current step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// Nothing judged yet, or the step has no correctness.
    #[default]
    None,
    /// The last judgement was correct.
    Correct,
    /// The last judgement was incorrect.
    Incorrect,
}

// ============================================================================
// SessionState
// ============================================================================

/// Mutable state of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Index of the step being shown.
    pub current_step_index: usize,
    /// Recorded responses by step index; never overwritten.
    pub answers: BTreeMap<usize, Response>,
    /// Steps judged correct.
    pub score: usize,
    /// Remaining lives.
    pub lives: u8,
    /// Feedback for the current step.
    pub feedback: Feedback,
    /// Whether `advance` is available.
    pub can_continue: bool,
    /// Phase of the attempt.
    pub phase: Phase,
    /// Correct pairs found so far on the current `match_pairs` step.
    pub matched_pairs: BTreeMap<usize, usize>,
}

impl SessionState {
    /// The state every attempt starts from.
    #[must_use]
    pub const fn fresh(max_lives: u8) -> Self {
        Self {
            current_step_index: 0,
            answers: BTreeMap::new(),
            score: 0,
            lives: max_lives,
            feedback: Feedback::None,
            can_continue: false,
            phase: Phase::InProgress,
            matched_pairs: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a command left the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredReason {
    /// The attempt is over.
    NotInProgress,
    /// The current step was already answered or unlocked.
    AlreadyAnswered,
    /// The current step has not been answered or unlocked yet.
    AwaitingAnswer,
    /// Passive steps take no response.
    PassiveStep,
    /// The command only applies to another kind of step.
    WrongStepKind,
    /// A side of the pair is already matched.
    AlreadyMatched,
    /// A pair index does not exist on the step.
    OutOfRange,
    /// The progress notification does not belong to the current step.
    Stale,
    /// The session has been exited.
    Exited,
}

impl std::fmt::Display for IgnoredReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NotInProgress => "not_in_progress",
            Self::AlreadyAnswered => "already_answered",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::PassiveStep => "passive_step",
            Self::WrongStepKind => "wrong_step_kind",
            Self::AlreadyMatched => "already_matched",
            Self::OutOfRange => "out_of_range",
            Self::Stale => "stale",
            Self::Exited => "exited",
        };
        f.write_str(text)
    }
}

/// Result of submitting a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The response was recorded and judged.
    Judged {
        /// Judgement.
        correctness: Correctness,
        /// Lives left after the judgement.
        lives: u8,
        /// Whether this judgement ended the attempt.
        game_over: bool,
    },
    /// The step's validation gate is not satisfied yet.
    NotReady,
    /// The response has the wrong shape for the step.
    Rejected {
        /// The current step's kind.
        expected: StepKind,
        /// Shape of the response received.
        got: &'static str,
    },
    /// Nothing happened.
    Ignored {
        /// Why.
        reason: IgnoredReason,
    },
}

/// Result of attempting one `match_pairs` association.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    /// The pair is right; more remain.
    Matched {
        /// Pairs still to match.
        remaining: usize,
    },
    /// The pair is wrong. Nothing was recorded and no life was lost.
    Wrong,
    /// The pair completed the step, which was recorded and judged.
    Completed {
        /// Judgement of the completed step.
        correctness: Correctness,
    },
    /// Nothing happened.
    Ignored {
        /// Why.
        reason: IgnoredReason,
    },
}

/// Result of asking to move on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The next step is now current.
    Moved {
        /// New step index.
        index: usize,
        /// Kind of the new step.
        kind: StepKind,
    },
    /// The last step was passed; the attempt is celebrating.
    Completed {
        /// Final score.
        score: usize,
        /// Steps in the lesson.
        total_steps: usize,
    },
    /// Nothing happened.
    Ignored {
        /// Why.
        reason: IgnoredReason,
    },
}

// ============================================================================
// Session
// ============================================================================

/// One learner's run through one lesson, across retries.
#[derive(Debug, Clone)]
pub struct Session {
    lesson: Arc<LessonDefinition>,
    bodies: Vec<Option<StepBody>>,
    rules: SessionRules,
    attempt: u32,
    state: SessionState,
}

impl Session {
    /// Starts the first attempt at `lesson`.
    ///
    /// Step payloads are decoded once here; malformed steps are logged and
    /// stay answerable but unscored. `rules.max_lives` is clamped to
    /// `1..=MAX_LIVES`.
    #[must_use]
    pub fn new(lesson: Arc<LessonDefinition>, rules: SessionRules) -> Self {
        let rules = SessionRules {
            max_lives: rules.max_lives.clamp(1, MAX_LIVES),
            ..rules
        };
        let bodies = lesson
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| match StepBody::parse(step) {
                Ok(body) => Some(body),
                Err(err) => {
                    warn!(
                        lesson_id = %lesson.id,
                        step_index = index,
                        step_id = %step.id,
                        step_type = %step.step_type,
                        error = %err,
                        "Malformed step content, step will not be scored"
                    );
                    None
                }
            })
            .collect();

        Self {
            lesson,
            bodies,
            rules,
            attempt: 1,
            state: SessionState::fresh(rules.max_lives),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The lesson being played.
    #[must_use]
    pub fn lesson(&self) -> &LessonDefinition {
        &self.lesson
    }

    /// Current attempt number, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Rules this session was created with.
    #[must_use]
    pub const fn rules(&self) -> &SessionRules {
        &self.rules
    }

    /// The step being shown.
    #[must_use]
    pub fn current_step(&self) -> Option<&LessonStep> {
        self.lesson.steps.get(self.state.current_step_index)
    }

    /// Kind of the step being shown.
    #[must_use]
    pub fn current_kind(&self) -> Option<StepKind> {
        self.current_step().map(|s| s.step_type)
    }

    fn current_body(&self) -> Option<&StepBody> {
        self.bodies
            .get(self.state.current_step_index)
            .and_then(Option::as_ref)
    }

    fn is_last_step(&self) -> bool {
        self.state.current_step_index + 1 >= self.lesson.steps.len()
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Submits a response for the current step.
    pub fn answer(&mut self, response: Response) -> AnswerOutcome {
        if let Some(reason) = self.answer_blocker() {
            debug!(lesson_id = %self.lesson.id, reason = %reason, "Answer ignored");
            return AnswerOutcome::Ignored { reason };
        }
        let Some(kind) = self.current_kind() else {
            return AnswerOutcome::Ignored {
                reason: IgnoredReason::NotInProgress,
            };
        };
        if !response.fits(kind) {
            warn!(
                lesson_id = %self.lesson.id,
                step_index = self.state.current_step_index,
                expected = %kind,
                got = response.shape(),
                "Response shape does not match step"
            );
            return AnswerOutcome::Rejected {
                expected: kind,
                got: response.shape(),
            };
        }

        let correctness = match self.current_body() {
            Some(body) => {
                if !is_ready(body, &response, &self.rules) {
                    return AnswerOutcome::NotReady;
                }
                judge_body(body, &response)
            }
            None => Correctness::NotApplicable,
        };

        self.record(response, correctness);
        AnswerOutcome::Judged {
            correctness,
            lives: self.state.lives,
            game_over: self.state.phase == Phase::GameOver,
        }
    }

    /// Tries one left-to-right association on a `match_pairs` step.
    ///
    /// A wrong pair is rejected on the spot. Once every pair has been found
    /// the full association is recorded and judged.
    pub fn attempt_pair(&mut self, left: usize, right: usize) -> PairOutcome {
        if let Some(reason) = self.answer_blocker() {
            return PairOutcome::Ignored { reason };
        }
        let Some(&StepBody::MatchPairs { pair_count }) = self.current_body() else {
            return PairOutcome::Ignored {
                reason: IgnoredReason::WrongStepKind,
            };
        };
        if left >= pair_count || right >= pair_count {
            return PairOutcome::Ignored {
                reason: IgnoredReason::OutOfRange,
            };
        }
        let matched = &self.state.matched_pairs;
        if matched.contains_key(&left) || matched.values().any(|r| *r == right) {
            return PairOutcome::Ignored {
                reason: IgnoredReason::AlreadyMatched,
            };
        }

        if left != right {
            debug!(
                lesson_id = %self.lesson.id,
                step_index = self.state.current_step_index,
                left,
                right,
                "Pair rejected"
            );
            return PairOutcome::Wrong;
        }

        self.state.matched_pairs.insert(left, right);
        let remaining = pair_count - self.state.matched_pairs.len();
        if remaining > 0 {
            return PairOutcome::Matched { remaining };
        }

        let response = Response::Pairs(self.state.matched_pairs.clone());
        let correctness = self
            .current_body()
            .map_or(Correctness::NotApplicable, |body| judge_body(body, &response));
        self.record(response, correctness);
        PairOutcome::Completed { correctness }
    }

    /// Unlocks the current content or code step after its exposure delay.
    ///
    /// `attempt` and `step_index` identify the step the delay was started
    /// for; anything else is a stale notification and is ignored.
    pub fn mark_exposed(&mut self, attempt: u32, step_index: usize) -> bool {
        if attempt != self.attempt || step_index != self.state.current_step_index {
            return false;
        }
        match self.current_kind() {
            Some(StepKind::Content | StepKind::CodeSnippet) => self.unlock_passive(),
            _ => false,
        }
    }

    /// Reports video playback; unlocks the step once enough has played.
    pub fn report_playback(&mut self, position: f64, duration: f64) -> bool {
        if self.current_kind() != Some(StepKind::Video) {
            return false;
        }
        if !(duration > 0.0 && position.is_finite()) {
            return false;
        }
        if position / duration < self.rules.video_threshold {
            return false;
        }
        self.unlock_passive()
    }

    /// Moves past the current step, or finishes the lesson on the last one.
    pub fn advance(&mut self) -> AdvanceOutcome {
        if self.state.phase != Phase::InProgress {
            return AdvanceOutcome::Ignored {
                reason: IgnoredReason::NotInProgress,
            };
        }
        if !self.state.can_continue {
            return AdvanceOutcome::Ignored {
                reason: IgnoredReason::AwaitingAnswer,
            };
        }

        if self.is_last_step() {
            self.state.phase = Phase::Celebrating;
            info!(
                lesson_id = %self.lesson.id,
                attempt = self.attempt,
                score = self.state.score,
                total_steps = self.lesson.total_steps(),
                lives = self.state.lives,
                "Lesson completed"
            );
            return AdvanceOutcome::Completed {
                score: self.state.score,
                total_steps: self.lesson.total_steps(),
            };
        }

        self.state.current_step_index += 1;
        self.state.feedback = Feedback::None;
        self.state.can_continue = false;
        self.state.matched_pairs.clear();

        let index = self.state.current_step_index;
        let kind = self.current_kind().unwrap_or(StepKind::Content);
        debug!(lesson_id = %self.lesson.id, step_index = index, kind = %kind, "Advanced");
        AdvanceOutcome::Moved { index, kind }
    }

    /// Starts a new attempt from scratch and returns its number.
    pub fn retry(&mut self) -> u32 {
        let previous = self.state.phase;
        self.attempt += 1;
        self.state = SessionState::fresh(self.rules.max_lives);
        info!(
            lesson_id = %self.lesson.id,
            attempt = self.attempt,
            previous_phase = %previous,
            "Attempt restarted"
        );
        self.attempt
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn answer_blocker(&self) -> Option<IgnoredReason> {
        if self.state.phase != Phase::InProgress {
            return Some(IgnoredReason::NotInProgress);
        }
        if self.state.can_continue {
            return Some(IgnoredReason::AlreadyAnswered);
        }
        if self.current_kind().is_some_and(|k| k.is_passive()) {
            return Some(IgnoredReason::PassiveStep);
        }
        None
    }

    fn record(&mut self, response: Response, correctness: Correctness) {
        let index = self.state.current_step_index;
        self.state.answers.entry(index).or_insert(response);

        match correctness {
            Correctness::Correct => {
                self.state.score += 1;
                self.state.feedback = Feedback::Correct;
            }
            Correctness::Incorrect => {
                self.state.lives = self.state.lives.saturating_sub(1);
                self.state.feedback = Feedback::Incorrect;
            }
            Correctness::NotApplicable => {}
        }
        self.state.can_continue = true;

        info!(
            lesson_id = %self.lesson.id,
            attempt = self.attempt,
            step_index = index,
            correctness = %correctness,
            score = self.state.score,
            lives = self.state.lives,
            "Step judged"
        );

        if self.state.lives == 0 {
            self.state.phase = Phase::GameOver;
            info!(lesson_id = %self.lesson.id, attempt = self.attempt, "Out of lives");
        }
    }

    fn unlock_passive(&mut self) -> bool {
        if self.state.phase != Phase::InProgress || self.state.can_continue {
            return false;
        }
        self.state.can_continue = true;
        debug!(
            lesson_id = %self.lesson.id,
            step_index = self.state.current_step_index,
            "Passive step unlocked"
        );
        true
    }

    // ------------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------------

    /// Read-only view of the session for the host UI.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let index = self.state.current_step_index;
        let step = self.current_step().map(|step| StepView {
            id: step.id.clone(),
            step_type: step.step_type,
            content: step.content.clone(),
            explanation: self
                .state
                .answers
                .contains_key(&index)
                .then(|| step.explanation.clone())
                .flatten(),
        });

        SessionSnapshot {
            lesson_id: self.lesson.id.clone(),
            course_id: self.lesson.course_id.clone(),
            attempt: self.attempt,
            phase: self.state.phase,
            current_step_index: index,
            total_steps: self.lesson.total_steps(),
            score: self.state.score,
            lives: self.state.lives,
            max_lives: self.rules.max_lives,
            feedback: self.state.feedback,
            can_continue: self.state.can_continue,
            answered_steps: self.state.answers.keys().copied().collect(),
            matched_pairs: self.state.matched_pairs.clone(),
            step,
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Lesson being played.
    pub lesson_id: String,
    /// Course of the lesson.
    pub course_id: String,
    /// Attempt number.
    pub attempt: u32,
    /// Phase.
    pub phase: Phase,
    /// Index of the current step.
    pub current_step_index: usize,
    /// Steps in the lesson.
    pub total_steps: usize,
    /// Steps judged correct.
    pub score: usize,
    /// Remaining lives.
    pub lives: u8,
    /// Lives at the start of the attempt.
    pub max_lives: u8,
    /// Feedback for the current step.
    pub feedback: Feedback,
    /// Whether `advance` is available.
    pub can_continue: bool,
    /// Indices of steps with a recorded response.
    pub answered_steps: Vec<usize>,
    /// Pairs found so far on the current step.
    pub matched_pairs: BTreeMap<usize, usize>,
    /// The current step as shown to the learner; never includes its answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepView>,
}

/// The learner-facing part of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    /// Step id.
    pub id: String,
    /// Step kind.
    pub step_type: StepKind,
    /// Display payload.
    pub content: Value,
    /// Explanation, once the step has been answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
