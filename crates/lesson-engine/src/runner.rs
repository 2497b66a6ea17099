//! Session runner: the host-facing handle over one session.
//!
//! A [`LessonRunner`] wraps a [`Session`] with everything the pure state
//! machine leaves out:
//!
//! - exposure timers for content and code steps, cancelled whenever the step
//!   they were started for stops being current
//! - events for every transition
//! - the detached completion task started when an attempt celebrates
//! - exit, after which every command is ignored
//!
//! Cloning a runner yields another handle to the same session.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};
use uuid::Uuid;

use crate::completion::{CompletionCoordinator, CompletionReport, CompletionTicket};
use crate::config::{EngineConfig, PassiveConfig};
use crate::contracts::{ContentProvider, ProgressStore};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBroadcaster};
use crate::judge::Correctness;
use crate::lesson::{Response, StepKind};
use crate::session::{
    AdvanceOutcome, AnswerOutcome, IgnoredReason, PairOutcome, Phase, Session, SessionSnapshot,
};

struct Inner {
    session: Session,
    timer: Option<AbortHandle>,
    completion: Option<JoinHandle<CompletionReport>>,
    exited: bool,
}

impl Inner {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Async handle over one learner's session.
#[derive(Clone)]
pub struct LessonRunner {
    id: Uuid,
    user_id: Arc<str>,
    inner: Arc<Mutex<Inner>>,
    events: EventBroadcaster,
    coordinator: CompletionCoordinator,
    passive: PassiveConfig,
    wrong_flash_ms: u64,
}

impl std::fmt::Debug for LessonRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonRunner")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl LessonRunner {
    /// Loads a lesson and starts its first attempt.
    ///
    /// # Errors
    ///
    /// Fails with `EngineError::ConfigValidationError` when `config` does not
    /// validate, with the content provider's error (typically
    /// `EngineError::ContentNotFound`), or with `EngineError::InvalidLesson`
    /// for a lesson without steps. No session exists afterwards.
    pub async fn start(
        config: &EngineConfig,
        content: &dyn ContentProvider,
        store: Arc<dyn ProgressStore>,
        events: EventBroadcaster,
        user_id: &str,
        lesson_id: &str,
    ) -> Result<Self> {
        config.validate()?;
        let lesson = content.get_lesson(lesson_id).await?;
        if lesson.steps.is_empty() {
            return Err(EngineError::invalid_lesson(lesson_id, "lesson has no steps"));
        }

        let id = Uuid::new_v4();
        let total_steps = lesson.total_steps();
        let session = Session::new(Arc::new(lesson), config.session_rules());

        let runner = Self {
            id,
            user_id: Arc::from(user_id),
            inner: Arc::new(Mutex::new(Inner {
                session,
                timer: None,
                completion: None,
                exited: false,
            })),
            coordinator: CompletionCoordinator::new(store, events.clone()),
            events,
            passive: config.passive.clone(),
            wrong_flash_ms: config.match_pairs.wrong_flash_ms,
        };

        info!(session_id = %id, user_id, lesson_id, total_steps, "Session started");
        runner.events.send(EngineEvent::SessionStarted {
            session_id: id,
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            total_steps,
        });

        {
            let mut inner = runner.inner.lock().await;
            runner.schedule_exposure(&mut inner);
        }
        Ok(runner)
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Learner playing the session.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current view of the session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().await.session.snapshot()
    }

    /// Current phase.
    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.session.state().phase
    }

    /// Whether [`exit`](Self::exit) has been called.
    pub async fn is_exited(&self) -> bool {
        self.inner.lock().await.exited
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Submits a response for the current step.
    pub async fn submit_answer(&self, response: Response) -> AnswerOutcome {
        let mut inner = self.inner.lock().await;
        if inner.exited {
            return AnswerOutcome::Ignored {
                reason: IgnoredReason::Exited,
            };
        }
        let outcome = inner.session.answer(response);
        if let AnswerOutcome::Judged { correctness, .. } = outcome {
            self.publish_judgement(&inner.session, correctness);
        }
        outcome
    }

    /// Tries one association on a `match_pairs` step.
    pub async fn attempt_pair(&self, left: usize, right: usize) -> PairOutcome {
        let mut inner = self.inner.lock().await;
        if inner.exited {
            return PairOutcome::Ignored {
                reason: IgnoredReason::Exited,
            };
        }
        let outcome = inner.session.attempt_pair(left, right);
        match outcome {
            PairOutcome::Wrong => {
                self.events.send(EngineEvent::PairRejected {
                    session_id: self.id,
                    attempt: inner.session.attempt(),
                    step_index: inner.session.state().current_step_index,
                    left,
                    right,
                    flash_ms: self.wrong_flash_ms,
                });
            }
            PairOutcome::Completed { correctness } => {
                self.publish_judgement(&inner.session, correctness);
            }
            PairOutcome::Matched { .. } | PairOutcome::Ignored { .. } => {}
        }
        outcome
    }

    /// Reports video playback; returns `true` if it unlocked the step.
    pub async fn report_playback(&self, position: f64, duration: f64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.exited || !inner.session.report_playback(position, duration) {
            return false;
        }
        self.publish_unlock(&inner.session);
        true
    }

    /// Moves on, or completes the lesson on the last step.
    pub async fn advance(&self) -> AdvanceOutcome {
        let mut inner = self.inner.lock().await;
        if inner.exited {
            return AdvanceOutcome::Ignored {
                reason: IgnoredReason::Exited,
            };
        }

        let outcome = inner.session.advance();
        match outcome {
            AdvanceOutcome::Moved { index, kind } => {
                self.events.send(EngineEvent::StepAdvanced {
                    session_id: self.id,
                    attempt: inner.session.attempt(),
                    step_index: index,
                    step_type: kind,
                });
                self.schedule_exposure(&mut inner);
            }
            AdvanceOutcome::Completed { score, total_steps } => {
                inner.cancel_timer();
                let attempt = inner.session.attempt();
                self.events.send(EngineEvent::Celebrating {
                    session_id: self.id,
                    attempt,
                    score,
                    total_steps,
                });

                let lesson = inner.session.lesson();
                let ticket = CompletionTicket {
                    session_id: self.id,
                    attempt,
                    user_id: self.user_id.to_string(),
                    lesson_id: lesson.id.clone(),
                    base_xp_reward: lesson.base_xp_reward,
                    score,
                    total_steps,
                    completed_at: Utc::now(),
                };
                inner.completion = Some(self.coordinator.spawn(ticket));
            }
            AdvanceOutcome::Ignored { reason } => {
                debug!(session_id = %self.id, reason = %reason, "Advance ignored");
            }
        }
        outcome
    }

    /// Starts a fresh attempt; `None` once the session has been exited.
    pub async fn retry(&self) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        if inner.exited {
            return None;
        }
        inner.cancel_timer();
        let attempt = inner.session.retry();
        self.events.send(EngineEvent::SessionRetried {
            session_id: self.id,
            attempt,
        });
        self.schedule_exposure(&mut inner);
        Some(attempt)
    }

    /// Discards the session. Returns `false` if it was already exited.
    ///
    /// An in-flight completion keeps running in the background.
    pub async fn exit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.exited {
            return false;
        }
        inner.exited = true;
        inner.cancel_timer();
        // dropping the handle detaches the task
        inner.completion = None;

        info!(session_id = %self.id, phase = %inner.session.state().phase, "Session exited");
        self.events.send(EngineEvent::SessionExited {
            session_id: self.id,
        });
        true
    }

    /// Waits for the completion task of the latest celebrating attempt.
    ///
    /// Returns `None` if no completion was started, or it was already
    /// collected, or the session was exited.
    pub async fn wait_for_completion(&self) -> Option<CompletionReport> {
        let handle = self.inner.lock().await.completion.take()?;
        handle.await.ok()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn publish_judgement(&self, session: &Session, correctness: Correctness) {
        let state = session.state();
        self.events.send(EngineEvent::StepJudged {
            session_id: self.id,
            attempt: session.attempt(),
            step_index: state.current_step_index,
            correctness,
            score: state.score,
            lives: state.lives,
        });
        if state.phase == Phase::GameOver {
            self.events.send(EngineEvent::GameOver {
                session_id: self.id,
                attempt: session.attempt(),
                step_index: state.current_step_index,
                score: state.score,
            });
        }
    }

    fn publish_unlock(&self, session: &Session) {
        self.events.send(EngineEvent::StepUnlocked {
            session_id: self.id,
            attempt: session.attempt(),
            step_index: session.state().current_step_index,
        });
    }

    /// Replaces any running timer with one for the current step, if it is a
    /// content or code step.
    fn schedule_exposure(&self, inner: &mut Inner) {
        inner.cancel_timer();
        let delay = match inner.session.current_kind() {
            Some(StepKind::Content) => self.passive.content_delay(),
            Some(StepKind::CodeSnippet) => self.passive.code_delay(),
            _ => return,
        };
        let attempt = inner.session.attempt();
        let step_index = inner.session.state().current_step_index;

        let runner = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            runner.expose(attempt, step_index).await;
        });
        inner.timer = Some(task.abort_handle());
    }

    async fn expose(&self, attempt: u32, step_index: usize) {
        let mut inner = self.inner.lock().await;
        if inner.exited || !inner.session.mark_exposed(attempt, step_index) {
            return;
        }
        inner.timer = None;
        self.publish_unlock(&inner.session);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::lesson::{LessonDefinition, LessonStep};
    use crate::memory::{MemoryContentProvider, MemoryProgressStore};

    fn mc(id: &str) -> LessonStep {
        LessonStep::new(id, StepKind::MultipleChoice, json!({"options": ["a", "b"]}), json!(0))
    }

    fn content(id: &str) -> LessonStep {
        LessonStep::new(id, StepKind::Content, json!({"markdown": "Read me"}), json!(null))
    }

    fn lesson(id: &str, steps: Vec<LessonStep>) -> LessonDefinition {
        LessonDefinition {
            id: id.into(),
            course_id: "course".into(),
            title: None,
            base_xp_reward: 20,
            steps,
        }
    }

    struct Fixture {
        content: MemoryContentProvider,
        store: Arc<MemoryProgressStore>,
        events: EventBroadcaster,
    }

    impl Fixture {
        fn new(lessons: Vec<LessonDefinition>) -> Self {
            Self {
                content: MemoryContentProvider::with_lessons(lessons),
                store: Arc::new(MemoryProgressStore::new()),
                events: EventBroadcaster::new(64),
            }
        }

        async fn start(&self, lesson_id: &str) -> Result<LessonRunner> {
            LessonRunner::start(
                &EngineConfig::default(),
                &self.content,
                self.store.clone(),
                self.events.clone(),
                "ada",
                lesson_id,
            )
            .await
        }
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name());
        }
        names
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ------------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_unknown_lesson_fails() {
        let fixture = Fixture::new(vec![]);
        let err = fixture.start("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::ContentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_start_empty_lesson_fails() {
        let fixture = Fixture::new(vec![lesson("empty", vec![])]);
        let err = fixture.start("empty").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidLesson { .. }));
    }

    #[tokio::test]
    async fn test_start_rejects_out_of_range_lives() {
        let fixture = Fixture::new(vec![lesson("l", vec![mc("a")])]);
        let mut rx = fixture.events.subscribe();

        for max_lives in [0, 4] {
            let config = EngineConfig {
                max_lives,
                ..EngineConfig::default()
            };
            let err = LessonRunner::start(
                &config,
                &fixture.content,
                fixture.store.clone(),
                fixture.events.clone(),
                "ada",
                "l",
            )
            .await
            .unwrap_err();
            assert!(matches!(err, EngineError::ConfigValidationError { .. }));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_publishes_session_started() {
        let fixture = Fixture::new(vec![lesson("l", vec![mc("a")])]);
        let mut rx = fixture.events.subscribe();
        let runner = fixture.start("l").await.unwrap();
        match rx.recv().await.unwrap() {
            EngineEvent::SessionStarted { session_id, .. } => assert_eq!(session_id, runner.id()),
            other => panic!("unexpected {other:?}"),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_completion_flow_events() {
        let fixture = Fixture::new(vec![lesson("l", vec![mc("a"), mc("b")])]);
        let runner = fixture.start("l").await.unwrap();
        let mut rx = fixture.events.subscribe();

        runner.submit_answer(Response::Choice(0)).await;
        runner.advance().await;
        runner.submit_answer(Response::Choice(0)).await;
        let outcome = runner.advance().await;
        assert!(matches!(outcome, AdvanceOutcome::Completed { score: 2, .. }));
        assert_eq!(runner.snapshot().await.phase, Phase::Celebrating);

        let report = runner.wait_for_completion().await.unwrap();
        assert!(report.result.is_perfect);
        assert_eq!(
            drain(&mut rx),
            vec![
                "step_judged",
                "step_advanced",
                "step_judged",
                "celebrating",
                "completion_ready"
            ]
        );
        assert!(fixture.store.lesson_record("ada", "l").await.is_some());
    }

    #[tokio::test]
    async fn test_game_over_event() {
        let fixture = Fixture::new(vec![lesson("l", vec![mc("a"), mc("b"), mc("c"), mc("d")])]);
        let runner = fixture.start("l").await.unwrap();
        let mut rx = fixture.events.subscribe();

        for _ in 0..3 {
            runner.submit_answer(Response::Choice(1)).await;
            runner.advance().await;
        }
        let names = drain(&mut rx);
        assert_eq!(names.last(), Some(&"game_over"));
        assert!(!names.contains(&"celebrating"));
        assert!(runner.wait_for_completion().await.is_none());
        assert!(fixture.store.lesson_record("ada", "l").await.is_none());
    }

    #[tokio::test]
    async fn test_wrong_pair_event_carries_flash() {
        let pairs = LessonStep::new(
            "p",
            StepKind::MatchPairs,
            json!({"pairs": [{"left": "a", "right": "1"}, {"left": "b", "right": "2"}]}),
            json!(null),
        );
        let fixture = Fixture::new(vec![lesson("l", vec![pairs])]);
        let runner = fixture.start("l").await.unwrap();
        let mut rx = fixture.events.subscribe();

        assert_eq!(runner.attempt_pair(0, 1).await, PairOutcome::Wrong);
        match rx.recv().await.unwrap() {
            EngineEvent::PairRejected { flash_ms, .. } => assert_eq!(flash_ms, 600),
            other => panic!("unexpected {other:?}"),
        }
        runner.attempt_pair(0, 0).await;
        let done = runner.attempt_pair(1, 1).await;
        assert_eq!(
            done,
            PairOutcome::Completed {
                correctness: Correctness::Correct
            }
        );
        assert_eq!(rx.recv().await.unwrap().event_name(), "step_judged");
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_content_step_unlocks_after_delay() {
        let fixture = Fixture::new(vec![lesson("l", vec![content("c"), mc("q")])]);
        let runner = fixture.start("l").await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        settle().await;
        assert!(!runner.snapshot().await.can_continue);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert!(runner.snapshot().await.can_continue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cancels_pending_timer() {
        let fixture = Fixture::new(vec![lesson("l", vec![content("c"), mc("q")])]);
        let runner = fixture.start("l").await.unwrap();
        let mut rx = fixture.events.subscribe();

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(runner.retry().await, Some(2));

        // the first attempt's timer would have fired here
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        assert!(!runner.snapshot().await.can_continue);

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        settle().await;
        assert!(runner.snapshot().await.can_continue);
        assert_eq!(drain(&mut rx), vec!["session_retried", "step_unlocked"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_cancels_timer_and_ignores_commands() {
        let fixture = Fixture::new(vec![lesson("l", vec![content("c"), mc("q")])]);
        let runner = fixture.start("l").await.unwrap();

        assert!(runner.exit().await);
        assert!(!runner.exit().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(!runner.snapshot().await.can_continue);
        assert!(runner.is_exited().await);
        assert_eq!(
            runner.advance().await,
            AdvanceOutcome::Ignored {
                reason: IgnoredReason::Exited
            }
        );
        assert_eq!(runner.retry().await, None);
    }

    #[tokio::test]
    async fn test_video_unlocks_on_playback() {
        let video = LessonStep::new("v", StepKind::Video, json!({"url": "a.mp4"}), json!(null));
        let fixture = Fixture::new(vec![lesson("l", vec![video])]);
        let runner = fixture.start("l").await.unwrap();

        assert!(!runner.report_playback(10.0, 100.0).await);
        assert!(runner.report_playback(85.0, 100.0).await);
        assert!(matches!(
            runner.advance().await,
            AdvanceOutcome::Completed { score: 0, total_steps: 1 }
        ));
    }

    // ------------------------------------------------------------------------
    // Completion vs. exit
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_exit_during_completion_lets_write_finish() {
        let fixture = Fixture {
            store: Arc::new(MemoryProgressStore::with_latency(Duration::from_millis(20))),
            ..Fixture::new(vec![lesson("l", vec![mc("a")])])
        };
        let runner = fixture.start("l").await.unwrap();

        runner.submit_answer(Response::Choice(0)).await;
        runner.advance().await;
        runner.exit().await;
        let frozen = runner.snapshot().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fixture.store.lesson_record("ada", "l").await.is_some());
        assert_eq!(fixture.store.profile("ada").await.unwrap().lessons_completed, 1);
        assert_eq!(runner.snapshot().await, frozen);
    }
}
