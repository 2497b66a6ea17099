//! Collaborators the engine consumes: where lessons come from and where
//! learner progress goes.
//!
//! Both are injected as trait objects so the engine can run against files,
//! a remote backend, or the in-memory doubles in [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lesson::LessonDefinition;

/// Supplies lesson definitions.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Loads a lesson by id.
    ///
    /// Fails with `EngineError::ContentNotFound` for unknown ids.
    async fn get_lesson(&self, lesson_id: &str) -> Result<LessonDefinition>;
}

/// Reads and writes a learner's progress.
///
/// The three operations are independent; nothing ties them into a
/// transaction.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Reads the learner's aggregate profile.
    async fn read_profile(&self, user_id: &str) -> Result<LearnerProfile>;

    /// Creates or replaces the learner's record for one lesson.
    async fn upsert_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        record: &LessonProgressRecord,
    ) -> Result<()>;

    /// Replaces the learner's aggregate profile.
    async fn write_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<()>;
}

/// A learner's aggregate progress across all lessons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    /// XP accumulated over all lessons.
    #[serde(default)]
    pub total_xp: u64,
    /// Consecutive days with activity, up to the last activity.
    #[serde(default)]
    pub current_streak: u32,
    /// Best streak ever reached.
    #[serde(default)]
    pub longest_streak: u32,
    /// Day of the most recent completed lesson.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_date: Option<NaiveDate>,
    /// Number of completed lessons.
    #[serde(default)]
    pub lessons_completed: u32,
}

/// Status of a learner's lesson record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    /// Started but not finished.
    InProgress,
    /// Finished.
    Completed,
}

/// A learner's record for one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressRecord {
    /// Record status.
    pub status: LessonStatus,
    /// Steps judged correct.
    pub score: usize,
    /// Steps in the lesson.
    pub total_steps: usize,
    /// XP awarded for the lesson.
    pub xp_earned: u64,
    /// When the lesson was completed.
    pub completed_at: DateTime<Utc>,
}
