//! In-process implementations of the collaborator contracts.
//!
//! Useful for tests and for hosts that keep everything in memory. The
//! progress store can be told to fail or stall individual operations.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::contracts::{ContentProvider, LearnerProfile, LessonProgressRecord, ProgressStore};
use crate::error::{EngineError, Result, StoreErrorKind, StoreOp};
use crate::lesson::LessonDefinition;

// ============================================================================
// MemoryContentProvider
// ============================================================================

/// Serves lessons from a map.
#[derive(Debug, Default)]
pub struct MemoryContentProvider {
    lessons: RwLock<HashMap<String, LessonDefinition>>,
}

impl MemoryContentProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider serving the given lessons.
    #[must_use]
    pub fn with_lessons(lessons: impl IntoIterator<Item = LessonDefinition>) -> Self {
        Self {
            lessons: RwLock::new(lessons.into_iter().map(|l| (l.id.clone(), l)).collect()),
        }
    }

    /// Adds or replaces a lesson.
    pub async fn insert(&self, lesson: LessonDefinition) {
        self.lessons.write().await.insert(lesson.id.clone(), lesson);
    }
}

#[async_trait]
impl ContentProvider for MemoryContentProvider {
    async fn get_lesson(&self, lesson_id: &str) -> Result<LessonDefinition> {
        self.lessons
            .read()
            .await
            .get(lesson_id)
            .cloned()
            .ok_or_else(|| EngineError::content_not_found(lesson_id))
    }
}

// ============================================================================
// MemoryProgressStore
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    profiles: HashMap<String, LearnerProfile>,
    lessons: HashMap<(String, String), LessonProgressRecord>,
    failing: HashSet<StoreOp>,
    calls: HashMap<StoreOp, usize>,
}

/// Keeps learner progress in memory.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    state: Mutex<StoreState>,
    latency: Option<Duration>,
}

impl MemoryProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store where every operation takes `latency` to answer.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Seeds a learner's profile.
    pub async fn set_profile(&self, user_id: &str, profile: LearnerProfile) {
        self.state
            .lock()
            .await
            .profiles
            .insert(user_id.to_string(), profile);
    }

    /// Makes `op` fail (or succeed again) until told otherwise.
    pub async fn set_failing(&self, op: StoreOp, failing: bool) {
        let mut state = self.state.lock().await;
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// The stored profile, if any.
    pub async fn profile(&self, user_id: &str) -> Option<LearnerProfile> {
        self.state.lock().await.profiles.get(user_id).cloned()
    }

    /// The stored lesson record, if any.
    pub async fn lesson_record(&self, user_id: &str, lesson_id: &str) -> Option<LessonProgressRecord> {
        self.state
            .lock()
            .await
            .lessons
            .get(&(user_id.to_string(), lesson_id.to_string()))
            .cloned()
    }

    /// How many times `op` has been called, failures included.
    pub async fn calls(&self, op: StoreOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    async fn enter(&self, op: StoreOp) -> Result<tokio::sync::MutexGuard<'_, StoreState>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        *state.calls.entry(op).or_insert(0) += 1;
        if state.failing.contains(&op) {
            return Err(EngineError::store(
                op,
                StoreErrorKind::Unavailable,
                "injected failure",
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn read_profile(&self, user_id: &str) -> Result<LearnerProfile> {
        let state = self.enter(StoreOp::ReadProfile).await?;
        Ok(state.profiles.get(user_id).cloned().unwrap_or_default())
    }

    async fn upsert_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
        record: &LessonProgressRecord,
    ) -> Result<()> {
        let mut state = self.enter(StoreOp::UpsertLessonProgress).await?;
        state
            .lessons
            .insert((user_id.to_string(), lesson_id.to_string()), record.clone());
        Ok(())
    }

    async fn write_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<()> {
        let mut state = self.enter(StoreOp::WriteProfile).await?;
        state.profiles.insert(user_id.to_string(), profile.clone());
        Ok(())
    }
}
