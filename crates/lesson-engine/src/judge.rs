//! Step judging.
//!
//! [`judge_body`] is a total function over [`StepBody`]: one arm per step
//! variant, no I/O, no panics. [`judge`] adds payload decoding on top and
//! turns malformed content into [`Correctness::NotApplicable`] so a broken
//! step is skipped instead of costing the learner a life.
//!
//! Whether a response may be judged at all (every blank filled, every item
//! sorted...) is a separate question answered by [`is_ready`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SessionRules;
use crate::lesson::{normalize_text, LessonStep, Response, StepBody};

/// Outcome of judging a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    /// The response matches the answer key.
    Correct,
    /// The response does not match the answer key.
    Incorrect,
    /// The step has no answer key (passive, open, or malformed content).
    NotApplicable,
}

impl Correctness {
    const fn from_bool(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }
}

impl std::fmt::Display for Correctness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Correct => write!(f, "correct"),
            Self::Incorrect => write!(f, "incorrect"),
            Self::NotApplicable => write!(f, "not_applicable"),
        }
    }
}

/// Judges a response against a raw lesson step.
///
/// Malformed content is logged and judged `NotApplicable`.
pub fn judge(step: &LessonStep, response: &Response) -> Correctness {
    match StepBody::parse(step) {
        Ok(body) => judge_body(&body, response),
        Err(err) => {
            warn!(
                step_id = %step.id,
                step_type = %step.step_type,
                error = %err,
                "Malformed step content, skipping judgement"
            );
            Correctness::NotApplicable
        }
    }
}

/// Judges a response against a decoded step body.
///
/// A response of the wrong shape is `Incorrect`; callers that want to
/// reject such responses outright should check [`Response::fits`] first.
pub fn judge_body(body: &StepBody, response: &Response) -> Correctness {
    match (body, response) {
        (StepBody::Content | StepBody::Video | StepBody::CodeSnippet, _)
        | (StepBody::Reflection { .. }, _) => Correctness::NotApplicable,

        (StepBody::MultipleChoice { correct_index, .. }, Response::Choice(selected)) => {
            Correctness::from_bool(selected == correct_index)
        }

        (StepBody::TrueFalse { correct }, Response::Boolean(selected)) => {
            Correctness::from_bool(selected == correct)
        }

        (
            StepBody::FillBlank {
                answer,
                alternatives,
            },
            Response::Text(text),
        ) => {
            let given = normalize_text(text);
            Correctness::from_bool(given == *answer || alternatives.contains(&given))
        }

        (StepBody::WordBank { expected, .. }, Response::Words(filled)) => {
            let matches = filled.len() == expected.len()
                && filled
                    .iter()
                    .zip(expected)
                    .all(|(given, want)| given.as_deref() == Some(want.as_str()));
            Correctness::from_bool(matches)
        }

        (StepBody::MatchPairs { pair_count }, Response::Pairs(pairs)) => {
            Correctness::from_bool(pairs_complete(*pair_count, pairs))
        }

        (StepBody::Slider { value, tolerance }, Response::Number(given)) => {
            Correctness::from_bool((given - value).abs() <= *tolerance)
        }

        (StepBody::Ordering { correct_order }, Response::Order(order)) => {
            Correctness::from_bool(order == correct_order)
        }

        (StepBody::ImageChoice { correct_id, .. }, Response::ImageId(selected)) => {
            Correctness::from_bool(selected == correct_id)
        }

        (StepBody::Highlight { correct }, Response::Indices(selected)) => {
            Correctness::from_bool(selected == correct)
        }

        (StepBody::CategorySort { items, expected }, Response::Assignment(assigned)) => {
            let matches = items
                .iter()
                .all(|item| assigned.get(item).is_some_and(|c| expected.get(item) == Some(c)));
            Correctness::from_bool(matches)
        }

        (StepBody::SpotError { correct_lines }, Response::Lines(selected)) => {
            Correctness::from_bool(selected == correct_lines)
        }

        (
            StepBody::MultipleChoice { .. }
            | StepBody::TrueFalse { .. }
            | StepBody::FillBlank { .. }
            | StepBody::WordBank { .. }
            | StepBody::MatchPairs { .. }
            | StepBody::Slider { .. }
            | StepBody::Ordering { .. }
            | StepBody::ImageChoice { .. }
            | StepBody::Highlight { .. }
            | StepBody::CategorySort { .. }
            | StepBody::SpotError { .. },
            _,
        ) => Correctness::Incorrect,
    }
}

/// Returns `true` once the response satisfies the step's validation gate.
///
/// Gates are not errors: until they pass, the check action is simply not
/// available.
///
/// - `word_bank`: every blank holds a word
/// - `category_sort`: every item has a category
/// - `match_pairs`: every pair is matched correctly
/// - `reflection`: at least the minimum number of words
/// - `fill_blank`: some non-blank text
pub fn is_ready(body: &StepBody, response: &Response, rules: &SessionRules) -> bool {
    match (body, response) {
        (StepBody::WordBank { expected, .. }, Response::Words(filled)) => {
            filled.len() == expected.len()
                && filled
                    .iter()
                    .all(|w| w.as_deref().is_some_and(|w| !w.trim().is_empty()))
        }
        (StepBody::CategorySort { items, .. }, Response::Assignment(assigned)) => items
            .iter()
            .all(|item| assigned.get(item).is_some_and(|c| !c.trim().is_empty())),
        (StepBody::MatchPairs { pair_count }, Response::Pairs(pairs)) => {
            pairs_complete(*pair_count, pairs)
        }
        (StepBody::Reflection { min_words }, Response::Text(text)) => {
            word_count(text) >= min_words.unwrap_or(rules.reflection_min_words)
        }
        (StepBody::FillBlank { .. }, Response::Text(text)) => !text.trim().is_empty(),
        _ => true,
    }
}

/// Number of whitespace-separated words in `text`.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn pairs_complete(pair_count: usize, pairs: &std::collections::BTreeMap<usize, usize>) -> bool {
    pairs.len() == pair_count
        && (0..pair_count).all(|left| pairs.get(&left) == Some(&left))
}

// ============================================================================
// Tests
// ============================================================================
