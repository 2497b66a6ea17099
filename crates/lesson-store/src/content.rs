//! Lessons stored as JSON files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lesson_engine::{ContentProvider, EngineError, LessonDefinition, Result};
use tracing::debug;

use crate::is_safe_id;

/// Reads `<dir>/<lessonId>.json`.
#[derive(Debug, Clone)]
pub struct FileContentProvider {
    dir: PathBuf,
}

impl FileContentProvider {
    /// Creates a provider reading from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory lessons are read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parses a lesson document from disk.
    ///
    /// Missing files are `ContentNotFound`, unreadable or invalid ones
    /// `ContentUnavailable`.
    pub async fn read_file(path: &Path) -> Result<LessonDefinition> {
        let label = path.display().to_string();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::content_not_found(label));
            }
            Err(err) => return Err(EngineError::content_unavailable(label, err.to_string())),
        };
        serde_json::from_str(&raw)
            .map_err(|err| EngineError::content_unavailable(label, format!("invalid lesson JSON: {err}")))
    }
}

#[async_trait]
impl ContentProvider for FileContentProvider {
    async fn get_lesson(&self, lesson_id: &str) -> Result<LessonDefinition> {
        if !is_safe_id(lesson_id) {
            return Err(EngineError::content_not_found(lesson_id));
        }
        let path = self.dir.join(format!("{lesson_id}.json"));
        debug!(lesson_id, path = %path.display(), "Loading lesson");

        let lesson = Self::read_file(&path).await.map_err(|err| match err {
            EngineError::ContentNotFound { .. } => EngineError::content_not_found(lesson_id),
            EngineError::ContentUnavailable { message, .. } => {
                EngineError::content_unavailable(lesson_id, message)
            }
            other => other,
        })?;

        if lesson.id != lesson_id {
            return Err(EngineError::invalid_lesson(
                lesson_id,
                format!("file declares id '{}'", lesson.id),
            ));
        }
        Ok(lesson)
    }
}
