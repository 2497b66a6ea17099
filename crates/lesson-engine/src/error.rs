//! Error types for the lesson engine.
//!
//! Only the I/O boundaries (content loading, the progress store, config
//! loading and the session registry) produce errors. Pure computations such
//! as step judging and reward calculation degrade instead of failing; see
//! [`ContentError`] for how malformed step payloads are reported.

use std::path::PathBuf;

/// A specialized `Result` type for lesson engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while loading lessons, running sessions, or
/// persisting progress.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lesson-engine.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Content Loading Errors
    // ========================================================================
    /// The content provider does not know the requested lesson.
    #[error("Lesson not found: '{lesson_id}'\n\nSuggestion: Check the lesson id or publish the lesson first")]
    ContentNotFound {
        /// The requested lesson id.
        lesson_id: String,
    },

    /// The content provider failed to produce the lesson.
    #[error("Lesson '{lesson_id}' could not be loaded: {message}\n\nSuggestion: Retry later or check the content source")]
    ContentUnavailable {
        /// The requested lesson id.
        lesson_id: String,
        /// Description of the failure.
        message: String,
    },

    /// The lesson loaded but cannot be played (for example it has no steps).
    #[error("Lesson '{lesson_id}' is not playable: {message}\n\nSuggestion: Fix the lesson in the authoring tool")]
    InvalidLesson {
        /// The lesson id.
        lesson_id: String,
        /// Why the lesson cannot be played.
        message: String,
    },

    // ========================================================================
    // Progress Store Errors
    // ========================================================================
    /// A progress store operation failed.
    #[error("Progress store {op} failed ({kind}): {message}\n\nSuggestion: {}", .kind.suggestion())]
    Store {
        /// Which store operation failed.
        op: StoreOp,
        /// The kind of failure.
        kind: StoreErrorKind,
        /// Detailed message from the store.
        message: String,
    },

    // ========================================================================
    // Session Registry Errors
    // ========================================================================
    /// No live session has the given id.
    #[error("Session not found: '{session_id}'\n\nSuggestion: Start a new session; exited sessions are discarded")]
    SessionNotFound {
        /// The requested session id.
        session_id: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The progress store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Reading the learner's aggregate profile.
    ReadProfile,
    /// Upserting the lesson completion record.
    UpsertLessonProgress,
    /// Writing the learner's aggregate profile.
    WriteProfile,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadProfile => write!(f, "read_profile"),
            Self::UpsertLessonProgress => write!(f, "upsert_lesson_progress"),
            Self::WriteProfile => write!(f, "write_profile"),
        }
    }
}

/// Categories of progress store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store could not be reached.
    Unavailable,
    /// The store did not answer in time.
    Timeout,
    /// The addressed record does not exist.
    NotFound,
    /// The stored document could not be decoded.
    Corrupted,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not_found"),
            Self::Corrupted => write!(f, "corrupted"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl StoreErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Unavailable => "Check that the progress store is reachable",
            Self::Timeout => "The store is slow; the next lesson completion will try again",
            Self::NotFound => "The learner record may not exist yet",
            Self::Corrupted => "Inspect or remove the learner's progress document",
            Self::Other => "Check the progress store logs",
        }
    }
}

impl EngineError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ContentNotFound` error.
    #[must_use]
    pub fn content_not_found(lesson_id: impl Into<String>) -> Self {
        Self::ContentNotFound {
            lesson_id: lesson_id.into(),
        }
    }

    /// Creates a new `ContentUnavailable` error.
    #[must_use]
    pub fn content_unavailable(lesson_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContentUnavailable {
            lesson_id: lesson_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidLesson` error.
    #[must_use]
    pub fn invalid_lesson(lesson_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidLesson {
            lesson_id: lesson_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(op: StoreOp, kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self::Store {
            op,
            kind,
            message: message.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl std::fmt::Display) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Returns `true` if this error is transient and the operation may succeed later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ContentUnavailable { .. }
                | Self::Store {
                    kind: StoreErrorKind::Unavailable | StoreErrorKind::Timeout,
                    ..
                }
        )
    }

    /// Returns `true` if this error prevents a lesson attempt from starting.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::ContentNotFound { .. }
                | Self::ContentUnavailable { .. }
                | Self::InvalidLesson { .. }
        )
    }
}

/// A malformed step payload produced by the authoring system.
///
/// Never surfaced to the learner. The session logs it and the step can still
/// be answered, but is never scored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// A required field is absent.
    #[error("missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A field is present but has the wrong shape.
    #[error("field '{field}' is malformed: {message}")]
    Malformed {
        /// Name of the malformed field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The answer refers to something the content does not contain.
    #[error("answer references {what} {index} but only {len} exist")]
    OutOfRange {
        /// What was referenced (option, word, item...).
        what: &'static str,
        /// The offending index.
        index: usize,
        /// How many exist.
        len: usize,
    },
}

impl ContentError {
    /// Creates a new `MissingField` content error.
    #[must_use]
    pub const fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates a new `Malformed` content error.
    #[must_use]
    pub fn malformed(field: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            field,
            message: message.into(),
        }
    }
}
