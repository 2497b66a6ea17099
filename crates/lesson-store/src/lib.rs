//! File-backed collaborators for the lesson engine.
//!
//! - [`FileContentProvider`] serves `<dir>/<lessonId>.json` lesson documents.
//! - [`JsonProgressStore`] keeps one `<dir>/<userId>.json` document per
//!   learner.

pub mod content;
pub mod progress;

pub use content::FileContentProvider;
pub use progress::{JsonProgressStore, LearnerDocument};

/// Returns `true` if `id` can be used as a file stem without escaping the
/// store's directory.
pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}
