//! Lesson and step model.
//!
//! A [`LessonDefinition`] arrives from the content provider with every step's
//! payload as raw JSON, exactly as the authoring system wrote it. The engine
//! never trusts that JSON: [`StepBody::parse`] turns a step into a closed,
//! typed union, and anything it cannot make sense of becomes a
//! [`ContentError`] rather than a crash.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContentError;

/// Blanks in a word bank template are runs of three or more underscores.
static BLANK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"_{3,}").ok());

// ============================================================================
// LessonDefinition / LessonStep
// ============================================================================

/// An ordered lesson, immutable for the lifetime of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDefinition {
    /// Lesson identifier.
    pub id: String,

    /// Course the lesson belongs to.
    #[serde(alias = "course_id")]
    pub course_id: String,

    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// XP granted for finishing the lesson, before bonuses.
    #[serde(default, alias = "base_xp_reward", alias = "xpReward")]
    pub base_xp_reward: u32,

    /// Steps in play order.
    #[serde(default)]
    pub steps: Vec<LessonStep>,
}

impl LessonDefinition {
    /// Number of steps, judged or not.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of steps that can affect score and lives.
    #[must_use]
    pub fn judged_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.step_type.is_judged()).count()
    }
}

/// One exercise in a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStep {
    /// Step identifier.
    pub id: String,

    /// Which of the step variants this is.
    #[serde(alias = "step_type", alias = "type")]
    pub step_type: StepKind,

    /// Variant-specific display payload.
    #[serde(default)]
    pub content: Value,

    /// Variant-specific answer key.
    #[serde(default, alias = "correct_answer")]
    pub correct_answer: Value,

    /// Text shown after judgement; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl LessonStep {
    /// Creates a step from its parts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        step_type: StepKind,
        content: Value,
        correct_answer: Value,
    ) -> Self {
        Self {
            id: id.into(),
            step_type,
            content,
            correct_answer,
            explanation: None,
        }
    }
}

// ============================================================================
// StepKind
// ============================================================================

/// The step variants a lesson may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Reading material.
    Content,
    /// A video clip.
    Video,
    /// A block of code to read.
    CodeSnippet,
    /// Pick one of several options.
    MultipleChoice,
    /// Judge a statement.
    TrueFalse,
    /// Type the missing word.
    FillBlank,
    /// Fill template blanks from a bank of words.
    WordBank,
    /// Connect left items to right items.
    MatchPairs,
    /// Pick a number on a scale.
    Slider,
    /// Put items in order.
    Ordering,
    /// Pick one image.
    ImageChoice,
    /// Select words in a passage.
    Highlight,
    /// Drop items into categories.
    CategorySort,
    /// Select the faulty lines of a listing.
    SpotError,
    /// Free-form written reflection.
    Reflection,
}

impl StepKind {
    /// Every step kind, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Content,
        Self::Video,
        Self::CodeSnippet,
        Self::MultipleChoice,
        Self::TrueFalse,
        Self::FillBlank,
        Self::WordBank,
        Self::MatchPairs,
        Self::Slider,
        Self::Ordering,
        Self::ImageChoice,
        Self::Highlight,
        Self::CategorySort,
        Self::SpotError,
        Self::Reflection,
    ];

    /// Returns `true` for steps that take no response and unlock on exposure.
    ///
    /// ```
    /// use lesson_engine::StepKind;
    ///
    /// assert!(StepKind::Video.is_passive());
    /// assert!(!StepKind::Reflection.is_passive());
    /// ```
    #[must_use]
    pub const fn is_passive(&self) -> bool {
        matches!(self, Self::Content | Self::Video | Self::CodeSnippet)
    }

    /// Returns `true` for steps that take a response but have no right answer.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Reflection)
    }

    /// Returns `true` for steps whose response is objectively right or wrong.
    #[must_use]
    pub const fn is_judged(&self) -> bool {
        !self.is_passive() && !self.is_open()
    }

    /// The wire tag for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Video => "video",
            Self::CodeSnippet => "code_snippet",
            Self::MultipleChoice => "multiple_choice",
            Self::TrueFalse => "true_false",
            Self::FillBlank => "fill_blank",
            Self::WordBank => "word_bank",
            Self::MatchPairs => "match_pairs",
            Self::Slider => "slider",
            Self::Ordering => "ordering",
            Self::ImageChoice => "image_choice",
            Self::Highlight => "highlight",
            Self::CategorySort => "category_sort",
            Self::SpotError => "spot_error",
            Self::Reflection => "reflection",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Response
// ============================================================================

/// A learner's response to a step.
///
/// Serialized as `{"kind": "...", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    /// Selected option index (`multiple_choice`).
    Choice(usize),
    /// True or false (`true_false`).
    Boolean(bool),
    /// Free text (`fill_blank`, `reflection`).
    Text(String),
    /// Words placed in each blank, in template order; `None` is an empty blank.
    Words(Vec<Option<String>>),
    /// Left index to right index associations (`match_pairs`).
    Pairs(BTreeMap<usize, usize>),
    /// Slider value.
    Number(f64),
    /// Original item indices in the order the learner arranged them.
    Order(Vec<usize>),
    /// Selected image id.
    ImageId(String),
    /// Selected word indices (`highlight`).
    Indices(BTreeSet<usize>),
    /// Item id to category assignments (`category_sort`).
    Assignment(BTreeMap<String, String>),
    /// Selected line numbers (`spot_error`).
    Lines(BTreeSet<u32>),
}

impl Response {
    /// Returns `true` if this response has the shape `kind` expects.
    ///
    /// Passive steps accept no response at all.
    #[must_use]
    pub const fn fits(&self, kind: StepKind) -> bool {
        matches!(
            (kind, self),
            (StepKind::MultipleChoice, Self::Choice(_))
                | (StepKind::TrueFalse, Self::Boolean(_))
                | (StepKind::FillBlank | StepKind::Reflection, Self::Text(_))
                | (StepKind::WordBank, Self::Words(_))
                | (StepKind::MatchPairs, Self::Pairs(_))
                | (StepKind::Slider, Self::Number(_))
                | (StepKind::Ordering, Self::Order(_))
                | (StepKind::ImageChoice, Self::ImageId(_))
                | (StepKind::Highlight, Self::Indices(_))
                | (StepKind::CategorySort, Self::Assignment(_))
                | (StepKind::SpotError, Self::Lines(_))
        )
    }

    /// Short name of the response shape, for logs.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Choice(_) => "choice",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
            Self::Words(_) => "words",
            Self::Pairs(_) => "pairs",
            Self::Number(_) => "number",
            Self::Order(_) => "order",
            Self::ImageId(_) => "image_id",
            Self::Indices(_) => "indices",
            Self::Assignment(_) => "assignment",
            Self::Lines(_) => "lines",
        }
    }
}

// ============================================================================
// StepBody
// ============================================================================

/// A step's payload decoded into its typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum StepBody {
    /// Reading material; unlocks after a delay.
    Content,
    /// Video; unlocks after enough playback.
    Video,
    /// Code to read; unlocks after a delay.
    CodeSnippet,
    /// `correct_index` into `option_count` options.
    MultipleChoice {
        /// Number of options shown.
        option_count: usize,
        /// Index of the right option.
        correct_index: usize,
    },
    /// The truth value of the statement.
    TrueFalse {
        /// Expected answer.
        correct: bool,
    },
    /// Accepted answers, already trimmed and case-folded.
    FillBlank {
        /// Primary answer.
        answer: String,
        /// Other accepted spellings.
        alternatives: Vec<String>,
    },
    /// Expected words for each blank, in template order.
    WordBank {
        /// Words offered in the bank.
        words: Vec<String>,
        /// Word expected in each blank.
        expected: Vec<String>,
    },
    /// Pairs are matched when left `i` is connected to right `i`.
    MatchPairs {
        /// Number of pairs.
        pair_count: usize,
    },
    /// Target value and accepted distance.
    Slider {
        /// Target value.
        value: f64,
        /// Largest accepted distance from `value`.
        tolerance: f64,
    },
    /// Expected arrangement of the original indices.
    Ordering {
        /// Expected arrangement.
        correct_order: Vec<usize>,
    },
    /// Id of the right image among `option_ids`.
    ImageChoice {
        /// Ids of the images shown.
        option_ids: Vec<String>,
        /// Id of the right image.
        correct_id: String,
    },
    /// Word indices that must be selected.
    Highlight {
        /// Expected selection.
        correct: BTreeSet<usize>,
    },
    /// Expected category of every item.
    CategorySort {
        /// Item ids, in display order.
        items: Vec<String>,
        /// Expected category for each item id.
        expected: BTreeMap<String, String>,
    },
    /// Line numbers that contain the errors.
    SpotError {
        /// Expected selection.
        correct_lines: BTreeSet<u32>,
    },
    /// Open reflection; `min_words` overrides the configured minimum.
    Reflection {
        /// Step-specific minimum word count.
        min_words: Option<usize>,
    },
}

impl StepBody {
    /// Decodes a step's raw payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ContentError`] when the content or answer key is missing,
    /// has the wrong shape, or references something that does not exist.
    pub fn parse(step: &LessonStep) -> Result<Self, ContentError> {
        let content = &step.content;
        let answer = decode_embedded(&step.correct_answer)?;

        match step.step_type {
            StepKind::Content => Ok(Self::Content),
            StepKind::Video => Ok(Self::Video),
            StepKind::CodeSnippet => Ok(Self::CodeSnippet),
            StepKind::MultipleChoice => parse_multiple_choice(content, &answer),
            StepKind::TrueFalse => Ok(Self::TrueFalse {
                correct: as_bool(&answer, "correct_answer")?,
            }),
            StepKind::FillBlank => parse_fill_blank(content, &answer),
            StepKind::WordBank => parse_word_bank(content, &answer),
            StepKind::MatchPairs => parse_match_pairs(content),
            StepKind::Slider => parse_slider(content, &answer),
            StepKind::Ordering => parse_ordering(content, &answer),
            StepKind::ImageChoice => parse_image_choice(content, &answer),
            StepKind::Highlight => Ok(Self::Highlight {
                correct: index_list(&answer, "correct_answer")?.into_iter().collect(),
            }),
            StepKind::CategorySort => parse_category_sort(content, &answer),
            StepKind::SpotError => parse_spot_error(&answer),
            StepKind::Reflection => {
                let min_words = match field(content, &["min_words", "minWords"]) {
                    Some(v) => Some(as_index(v, "min_words")?),
                    None => None,
                };
                Ok(Self::Reflection { min_words })
            }
        }
    }

    /// Number of blanks a word bank step expects.
    #[must_use]
    pub fn blank_count(&self) -> Option<usize> {
        match self {
            Self::WordBank { expected, .. } => Some(expected.len()),
            _ => None,
        }
    }
}

fn parse_multiple_choice(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let options = array_field(content, &["options", "choices"], "options")?;
    let correct_index = as_index(answer, "correct_answer")?;
    if correct_index >= options.len() {
        return Err(ContentError::OutOfRange {
            what: "option",
            index: correct_index,
            len: options.len(),
        });
    }
    Ok(StepBody::MultipleChoice {
        option_count: options.len(),
        correct_index,
    })
}

fn parse_fill_blank(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let (primary, mut alternatives) = match answer {
        Value::Object(map) => {
            let primary = map
                .get("answer")
                .ok_or_else(|| ContentError::missing("correct_answer.answer"))?;
            let alternatives = match map.get("alternatives") {
                Some(v) => string_list(v, "correct_answer.alternatives")?,
                None => Vec::new(),
            };
            (as_string(primary, "correct_answer.answer")?, alternatives)
        }
        other => (as_string(other, "correct_answer")?, Vec::new()),
    };

    if let Some(v) = field(content, &["alternatives"]) {
        alternatives.extend(string_list(v, "alternatives")?);
    }

    Ok(StepBody::FillBlank {
        answer: normalize_text(&primary),
        alternatives: alternatives.iter().map(|a| normalize_text(a)).collect(),
    })
}

fn parse_word_bank(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let words = string_list(
        field(content, &["words", "word_bank", "wordBank"])
            .ok_or_else(|| ContentError::missing("words"))?,
        "words",
    )?;

    let order_value = match answer {
        Value::Object(map) => map
            .get("correct_order")
            .or_else(|| map.get("correctOrder"))
            .ok_or_else(|| ContentError::missing("correct_order"))?,
        Value::Null => field(content, &["correct_order", "correctOrder"])
            .ok_or_else(|| ContentError::missing("correct_order"))?,
        other => other,
    };
    let order = index_list(&decode_embedded(order_value)?, "correct_order")?;

    let mut expected = Vec::with_capacity(order.len());
    for index in order {
        let word = words.get(index).ok_or(ContentError::OutOfRange {
            what: "word",
            index,
            len: words.len(),
        })?;
        expected.push(word.clone());
    }

    let declared_blanks = match (field(content, &["template", "sentence"]), field(content, &["blanks"])) {
        (_, Some(v)) => Some(as_index(v, "blanks")?),
        (Some(template), None) => Some(count_blanks(&as_string(template, "template")?)),
        (None, None) => None,
    };
    if let Some(blanks) = declared_blanks {
        if blanks != expected.len() {
            return Err(ContentError::malformed(
                "correct_order",
                format!("{} entries for {blanks} blanks", expected.len()),
            ));
        }
    }

    Ok(StepBody::WordBank { words, expected })
}

fn parse_match_pairs(content: &Value) -> Result<StepBody, ContentError> {
    let pairs = array_field(content, &["pairs"], "pairs")?;
    if pairs.is_empty() {
        return Err(ContentError::malformed("pairs", "no pairs to match"));
    }
    for pair in pairs {
        if pair.get("left").is_none() || pair.get("right").is_none() {
            return Err(ContentError::malformed("pairs", "every pair needs left and right"));
        }
    }
    Ok(StepBody::MatchPairs {
        pair_count: pairs.len(),
    })
}

fn parse_slider(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let (value, answer_tolerance) = match answer {
        Value::Object(map) => {
            let value = map
                .get("value")
                .ok_or_else(|| ContentError::missing("correct_answer.value"))?;
            let tolerance = match map.get("tolerance") {
                Some(t) => Some(as_f64(t, "correct_answer.tolerance")?),
                None => None,
            };
            (as_f64(value, "correct_answer.value")?, tolerance)
        }
        other => (as_f64(other, "correct_answer")?, None),
    };

    let tolerance = match (answer_tolerance, field(content, &["tolerance"])) {
        (Some(t), _) => t,
        (None, Some(v)) => as_f64(v, "tolerance")?,
        (None, None) => 0.0,
    };
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(ContentError::malformed("tolerance", "must be a non-negative number"));
    }

    Ok(StepBody::Slider { value, tolerance })
}

fn parse_ordering(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let order_value = match answer {
        Value::Object(map) => map
            .get("correct_order")
            .or_else(|| map.get("correctOrder"))
            .ok_or_else(|| ContentError::missing("correct_order"))?,
        other => other,
    };
    let correct_order = index_list(order_value, "correct_order")?;

    if let Some(items) = field(content, &["items"]).and_then(Value::as_array) {
        let mut seen: Vec<usize> = correct_order.clone();
        seen.sort_unstable();
        let is_permutation = seen.len() == items.len() && seen.iter().enumerate().all(|(i, v)| i == *v);
        if !is_permutation {
            return Err(ContentError::malformed(
                "correct_order",
                format!("not a permutation of {} items", items.len()),
            ));
        }
    }

    Ok(StepBody::Ordering { correct_order })
}

fn parse_image_choice(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let options = array_field(content, &["options", "images"], "options")?;
    let option_ids = options
        .iter()
        .map(|o| {
            o.get("id")
                .ok_or_else(|| ContentError::missing("options[].id"))
                .and_then(|id| as_string(id, "options[].id"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let correct_id = as_string(answer, "correct_answer")?;
    if !option_ids.contains(&correct_id) {
        return Err(ContentError::malformed(
            "correct_answer",
            format!("'{correct_id}' is not one of the image ids"),
        ));
    }

    Ok(StepBody::ImageChoice {
        option_ids,
        correct_id,
    })
}

fn parse_category_sort(content: &Value, answer: &Value) -> Result<StepBody, ContentError> {
    let items = array_field(content, &["items"], "items")?
        .iter()
        .map(|item| match item {
            Value::Object(map) => map
                .get("id")
                .ok_or_else(|| ContentError::missing("items[].id"))
                .and_then(|id| as_string(id, "items[].id")),
            other => as_string(other, "items[]"),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let Value::Object(map) = answer else {
        return Err(ContentError::malformed("correct_answer", "expected an item to category map"));
    };
    let expected = map
        .iter()
        .map(|(item, category)| Ok((item.clone(), as_string(category, "correct_answer")?)))
        .collect::<Result<BTreeMap<_, _>, ContentError>>()?;

    if let Some(missing) = items.iter().find(|item| !expected.contains_key(*item)) {
        return Err(ContentError::malformed(
            "correct_answer",
            format!("item '{missing}' has no expected category"),
        ));
    }

    Ok(StepBody::CategorySort { items, expected })
}

fn parse_spot_error(answer: &Value) -> Result<StepBody, ContentError> {
    let lines = index_list(answer, "correct_answer")?
        .into_iter()
        .map(|n| u32::try_from(n).map_err(|_| ContentError::malformed("correct_answer", "line number too large")))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(StepBody::SpotError {
        correct_lines: lines,
    })
}

// ============================================================================
// Payload helpers
// ============================================================================

/// Trim and case-fold free text for comparison.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Counts the blanks in a word bank template.
#[must_use]
pub fn count_blanks(template: &str) -> usize {
    BLANK_PATTERN
        .as_ref()
        .map_or(0, |re| re.find_iter(template).count())
}

/// Answer keys are sometimes stored as JSON text; unwrap those.
fn decode_embedded(value: &Value) -> Result<Value, ContentError> {
    match value {
        Value::String(s) if s.trim_start().starts_with(['[', '{']) => serde_json::from_str(s)
            .map_err(|e| ContentError::malformed("correct_answer", format!("unparseable JSON: {e}"))),
        other => Ok(other.clone()),
    }
}

fn field<'a>(content: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| content.get(*name)).filter(|v| !v.is_null())
}

fn array_field<'a>(
    content: &'a Value,
    names: &[&str],
    label: &'static str,
) -> Result<&'a Vec<Value>, ContentError> {
    field(content, names)
        .ok_or_else(|| ContentError::missing(label))?
        .as_array()
        .ok_or_else(|| ContentError::malformed(label, "expected an array"))
}

fn as_index(value: &Value, label: &'static str) -> Result<usize, ContentError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ContentError::malformed(label, format!("{n} is not an index"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ContentError::malformed(label, format!("'{s}' is not an index"))),
        Value::Null => Err(ContentError::missing(label)),
        other => Err(ContentError::malformed(label, format!("{other} is not an index"))),
    }
}

fn as_bool(value: &Value, label: &'static str) -> Result<bool, ContentError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ContentError::malformed(label, format!("'{s}' is not a boolean"))),
        },
        Value::Null => Err(ContentError::missing(label)),
        other => Err(ContentError::malformed(label, format!("{other} is not a boolean"))),
    }
}

fn as_f64(value: &Value, label: &'static str) -> Result<f64, ContentError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => return Err(ContentError::missing(label)),
        _ => None,
    };
    parsed
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| ContentError::malformed(label, format!("{value} is not a number")))
}

fn as_string(value: &Value, label: &'static str) -> Result<String, ContentError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Err(ContentError::missing(label)),
        other => Err(ContentError::malformed(label, format!("{other} is not a string"))),
    }
}

fn string_list(value: &Value, label: &'static str) -> Result<Vec<String>, ContentError> {
    value
        .as_array()
        .ok_or_else(|| ContentError::malformed(label, "expected an array"))?
        .iter()
        .map(|v| as_string(v, label))
        .collect()
}

fn index_list(value: &Value, label: &'static str) -> Result<Vec<usize>, ContentError> {
    let decoded = decode_embedded(value)?;
    match &decoded {
        Value::Array(items) => items.iter().map(|v| as_index(v, label)).collect(),
        Value::Null => Err(ContentError::missing(label)),
        other => Err(ContentError::malformed(label, format!("{other} is not an array"))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn step(kind: StepKind, content: Value, answer: Value) -> LessonStep {
        LessonStep::new("s1", kind, content, answer)
    }

    // ------------------------------------------------------------------------
    // StepKind
    // ------------------------------------------------------------------------

    #[test]
    fn test_step_kind_classification() {
        let passive: Vec<_> = StepKind::ALL.iter().filter(|k| k.is_passive()).collect();
        assert_eq!(passive.len(), 3);

        let judged = StepKind::ALL.iter().filter(|k| k.is_judged()).count();
        assert_eq!(judged, 11);

        assert!(StepKind::Reflection.is_open());
        assert!(!StepKind::Reflection.is_judged());
    }

    #[test]
    fn test_step_kind_serialization() {
        for kind in StepKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: StepKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    // ------------------------------------------------------------------------
    // LessonDefinition
    // ------------------------------------------------------------------------

    #[test]
    fn test_lesson_deserialization_accepts_both_casings() {
        let json = r#"{
            "id": "l1",
            "course_id": "c1",
            "baseXpReward": 20,
            "steps": [
                {"id": "a", "step_type": "content", "content": {"body": "hi"}},
                {"id": "b", "stepType": "true_false", "correctAnswer": true}
            ]
        }"#;
        let lesson: LessonDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(lesson.course_id, "c1");
        assert_eq!(lesson.base_xp_reward, 20);
        assert_eq!(lesson.total_steps(), 2);
        assert_eq!(lesson.judged_steps(), 1);
        assert_eq!(lesson.steps[1].correct_answer, json!(true));
    }

    // ------------------------------------------------------------------------
    // Response
    // ------------------------------------------------------------------------

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&Response::Choice(2)).unwrap();
        assert_eq!(json, r#"{"kind":"choice","value":2}"#);

        let pairs: Response = serde_json::from_str(r#"{"kind":"pairs","value":{"0":0,"1":1}}"#).unwrap();
        assert_eq!(pairs, Response::Pairs(BTreeMap::from([(0, 0), (1, 1)])));

        let words: Response = serde_json::from_str(r#"{"kind":"words","value":["a",null]}"#).unwrap();
        assert_eq!(words, Response::Words(vec![Some("a".to_string()), None]));
    }

    #[test]
    fn test_response_fits() {
        assert!(Response::Choice(0).fits(StepKind::MultipleChoice));
        assert!(Response::Text(String::new()).fits(StepKind::Reflection));
        assert!(Response::Text(String::new()).fits(StepKind::FillBlank));
        assert!(!Response::Choice(0).fits(StepKind::TrueFalse));
        assert!(!Response::Boolean(true).fits(StepKind::Content));
    }

    // ------------------------------------------------------------------------
    // StepBody::parse
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_multiple_choice_accepts_string_index() {
        let s = step(StepKind::MultipleChoice, json!({"options": ["a", "b", "c"]}), json!("2"));
        assert_eq!(
            StepBody::parse(&s).unwrap(),
            StepBody::MultipleChoice {
                option_count: 3,
                correct_index: 2
            }
        );
    }

    #[test]
    fn test_parse_multiple_choice_out_of_range() {
        let s = step(StepKind::MultipleChoice, json!({"options": ["a", "b"]}), json!(5));
        assert!(matches!(
            StepBody::parse(&s),
            Err(ContentError::OutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn test_parse_true_false_string() {
        let s = step(StepKind::TrueFalse, json!({}), json!("False"));
        assert_eq!(StepBody::parse(&s).unwrap(), StepBody::TrueFalse { correct: false });
    }

    #[test]
    fn test_parse_fill_blank_merges_alternatives() {
        let s = step(
            StepKind::FillBlank,
            json!({"sentence": "The ___ is blue", "alternatives": ["Heavens"]}),
            json!({"answer": " Sky ", "alternatives": ["firmament"]}),
        );
        assert_eq!(
            StepBody::parse(&s).unwrap(),
            StepBody::FillBlank {
                answer: "sky".to_string(),
                alternatives: vec!["firmament".to_string(), "heavens".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_word_bank_resolves_indices() {
        let s = step(
            StepKind::WordBank,
            json!({"template": "I ___ to ___", "words": ["run", "want", "school"]}),
            json!({"correct_order": [1, 0]}),
        );
        let body = StepBody::parse(&s).unwrap();
        assert_eq!(body.blank_count(), Some(2));
        assert_eq!(
            body,
            StepBody::WordBank {
                words: vec!["run".into(), "want".into(), "school".into()],
                expected: vec!["want".into(), "run".into()],
            }
        );
    }

    #[test]
    fn test_parse_word_bank_blank_mismatch() {
        let s = step(
            StepKind::WordBank,
            json!({"template": "only ___ here", "words": ["a", "b"]}),
            json!([0, 1]),
        );
        assert!(matches!(
            StepBody::parse(&s),
            Err(ContentError::Malformed { field: "correct_order", .. })
        ));
    }

    #[test]
    fn test_parse_match_pairs() {
        let s = step(
            StepKind::MatchPairs,
            json!({"pairs": [{"left": "a", "right": "1"}, {"left": "b", "right": "2"}]}),
            Value::Null,
        );
        assert_eq!(StepBody::parse(&s).unwrap(), StepBody::MatchPairs { pair_count: 2 });

        let empty = step(StepKind::MatchPairs, json!({"pairs": []}), Value::Null);
        assert!(StepBody::parse(&empty).is_err());
    }

    #[test]
    fn test_parse_slider_tolerance_sources() {
        let plain = step(StepKind::Slider, json!({"min": 0, "max": 100}), json!(42));
        assert_eq!(
            StepBody::parse(&plain).unwrap(),
            StepBody::Slider {
                value: 42.0,
                tolerance: 0.0
            }
        );

        let from_content = step(StepKind::Slider, json!({"tolerance": 2}), json!(42));
        assert_eq!(
            StepBody::parse(&from_content).unwrap(),
            StepBody::Slider {
                value: 42.0,
                tolerance: 2.0
            }
        );

        let from_answer = step(
            StepKind::Slider,
            json!({"tolerance": 2}),
            json!({"value": 10, "tolerance": 0.5}),
        );
        assert_eq!(
            StepBody::parse(&from_answer).unwrap(),
            StepBody::Slider {
                value: 10.0,
                tolerance: 0.5
            }
        );

        let negative = step(StepKind::Slider, json!({"tolerance": -1}), json!(1));
        assert!(StepBody::parse(&negative).is_err());
    }

    #[test]
    fn test_parse_ordering_from_json_text() {
        let s = step(StepKind::Ordering, json!({"items": ["a", "b", "c"]}), json!("[2, 0, 1]"));
        assert_eq!(
            StepBody::parse(&s).unwrap(),
            StepBody::Ordering {
                correct_order: vec![2, 0, 1]
            }
        );
    }

    #[test]
    fn test_parse_ordering_unparseable_json_is_content_error() {
        let s = step(StepKind::Ordering, json!({"items": ["a", "b"]}), json!("[1, 0"));
        assert!(matches!(
            StepBody::parse(&s),
            Err(ContentError::Malformed { field: "correct_answer", .. })
        ));
    }

    #[test]
    fn test_parse_ordering_rejects_non_permutation() {
        let s = step(StepKind::Ordering, json!({"items": ["a", "b", "c"]}), json!([0, 0, 1]));
        assert!(StepBody::parse(&s).is_err());
    }

    #[test]
    fn test_parse_image_choice_unknown_id() {
        let s = step(
            StepKind::ImageChoice,
            json!({"options": [{"id": "cat"}, {"id": "dog"}]}),
            json!("bird"),
        );
        assert!(StepBody::parse(&s).is_err());
    }

    #[test]
    fn test_parse_category_sort() {
        let s = step(
            StepKind::CategorySort,
            json!({
                "categories": ["fruit", "veg"],
                "items": [{"id": "apple"}, {"id": "leek"}]
            }),
            json!({"apple": "fruit", "leek": "veg"}),
        );
        let StepBody::CategorySort { items, expected } = StepBody::parse(&s).unwrap() else {
            unreachable!("category sort parses to CategorySort");
        };
        assert_eq!(items, vec!["apple", "leek"]);
        assert_eq!(expected["leek"], "veg");
    }

    #[test]
    fn test_parse_category_sort_missing_item() {
        let s = step(
            StepKind::CategorySort,
            json!({"items": ["apple", "leek"]}),
            json!({"apple": "fruit"}),
        );
        assert!(StepBody::parse(&s).is_err());
    }

    #[test]
    fn test_parse_spot_error_and_reflection() {
        let s = step(StepKind::SpotError, json!({"code": "x"}), json!([3, 1]));
        assert_eq!(
            StepBody::parse(&s).unwrap(),
            StepBody::SpotError {
                correct_lines: BTreeSet::from([1, 3])
            }
        );

        let r = step(StepKind::Reflection, json!({"min_words": 3}), Value::Null);
        assert_eq!(
            StepBody::parse(&r).unwrap(),
            StepBody::Reflection { min_words: Some(3) }
        );
    }

    #[test]
    fn test_count_blanks() {
        assert_eq!(count_blanks("a ___ b _____ c __ d"), 2);
        assert_eq!(count_blanks("no blanks"), 0);
    }
}
