//! Learner progress stored as one JSON document per learner.
//!
//! ```json
//! {
//!   "profile": { "totalXp": 120, "currentStreak": 2, ... },
//!   "lessons": { "intro": { "status": "completed", ... } }
//! }
//! ```
//!
//! Each operation is a read-modify-write of the learner's document, written
//! to a temporary file and renamed into place. Writes from this process are
//! serialized; nothing groups several operations into one transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lesson_engine::{
    EngineError, LearnerProfile, LessonProgressRecord, ProgressStore, Result, StoreErrorKind,
    StoreOp,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::is_safe_id;

/// Everything stored for one learner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerDocument {
    /// Aggregate profile.
    #[serde(default)]
    pub profile: LearnerProfile,
    /// Lesson records by lesson id.
    #[serde(default)]
    pub lessons: BTreeMap<String, LessonProgressRecord>,
}

/// Stores learner documents under a directory.
#[derive(Debug)]
pub struct JsonProgressStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonProgressStore {
    /// Creates a store writing to `dir`; the directory is created on first
    /// write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory learner documents live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, op: StoreOp, user_id: &str) -> Result<PathBuf> {
        if !is_safe_id(user_id) {
            return Err(EngineError::store(
                op,
                StoreErrorKind::Other,
                format!("invalid user id '{user_id}'"),
            ));
        }
        Ok(self.dir.join(format!("{user_id}.json")))
    }

    /// Reads a learner's document; a missing file is an empty document.
    pub async fn load(&self, user_id: &str) -> Result<LearnerDocument> {
        self.load_for(StoreOp::ReadProfile, user_id).await
    }

    async fn load_for(&self, op: StoreOp, user_id: &str) -> Result<LearnerDocument> {
        let path = self.path_for(op, user_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LearnerDocument::default());
            }
            Err(err) => {
                return Err(EngineError::store(op, StoreErrorKind::Unavailable, err.to_string()));
            }
        };
        serde_json::from_str(&raw).map_err(|err| {
            EngineError::store(
                op,
                StoreErrorKind::Corrupted,
                format!("{}: {err}", path.display()),
            )
        })
    }

    async fn save(&self, op: StoreOp, user_id: &str, doc: &LearnerDocument) -> Result<()> {
        let path = self.path_for(op, user_id)?;
        let unavailable = |err: std::io::Error| {
            EngineError::store(op, StoreErrorKind::Unavailable, err.to_string())
        };

        fs::create_dir_all(&self.dir).await.map_err(unavailable)?;
        let json = serde_json::to_string_pretty(doc)
            .map_err(|err| EngineError::store(op, StoreErrorKind::Other, err.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).await.map_err(unavailable)?;
        if let Err(err) = fs::rename(&temp_path, &path).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!(
                    path = %temp_path.display(),
                    error = %cleanup,
                    "Could not remove temporary file"
                );
            }
            return Err(unavailable(err));
        }

        debug!(user_id, op = %op, path = %path.display(), "Saved learner document");
        Ok(())
    }

    async fn modify(
        &self,
        op: StoreOp,
        user_id: &str,
        change: impl FnOnce(&mut LearnerDocument) + Send,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_for(op, user_id).await?;
        change(&mut doc);
        self.save(op, user_id, &doc).await
    }
}

#[async_trait]
impl ProgressStore for JsonProgressStore {
    async fn read_profile(&self, user_id: &str) -> Result<LearnerProfile> {
        Ok(self.load(user_id).await?.profile)
    }

    async fn upsert_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        record: &LessonProgressRecord,
    ) -> Result<()> {
        let record = record.clone();
        self.modify(StoreOp::UpsertLessonProgress, user_id, move |doc| {
            doc.lessons.insert(lesson_id.to_string(), record);
        })
        .await
    }

    async fn write_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<()> {
        let profile = profile.clone();
        self.modify(StoreOp::WriteProfile, user_id, move |doc| {
            doc.profile = profile;
        })
        .await
    }
}
