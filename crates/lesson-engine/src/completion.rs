//! Completion coordinator.
//!
//! When an attempt reaches `Celebrating` the runner hands a
//! [`CompletionTicket`] to the coordinator, which runs on its own task:
//!
//! 1. read the learner's profile
//! 2. compute the reward and publish `completion_ready`
//! 3. upsert the lesson record
//! 4. write the updated profile
//!
//! Store failures are logged and swallowed. A failed read is the one case
//! where the sequence above is cut short: the reward falls back to no bonus
//! and step 4 is not attempted at all, so the stored aggregate is never
//! replaced with numbers computed from an empty baseline. Nothing ties steps 3 and 4
//! together: a failure between them leaves the lesson recorded while the
//! profile is unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contracts::{LearnerProfile, LessonProgressRecord, LessonStatus, ProgressStore};
use crate::events::{EngineEvent, EventBroadcaster};
use crate::reward::{compute_reward, fallback_reward, CompletionResult, RewardInput};

/// Everything the coordinator needs about a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionTicket {
    /// Session the attempt belongs to.
    pub session_id: Uuid,
    /// Attempt number.
    pub attempt: u32,
    /// Learner.
    pub user_id: String,
    /// Lesson.
    pub lesson_id: String,
    /// The lesson's base XP.
    pub base_xp_reward: u32,
    /// Steps judged correct.
    pub score: usize,
    /// Steps in the lesson.
    pub total_steps: usize,
    /// When the last step was passed.
    pub completed_at: DateTime<Utc>,
}

/// What the coordinator managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    /// The reward that was published.
    pub result: CompletionResult,
    /// Whether the profile read succeeded.
    pub profile_read: bool,
    /// Whether the lesson record was written.
    pub progress_saved: bool,
    /// Whether the profile was written.
    pub profile_saved: bool,
}

/// Runs the best-effort completion sequence against a progress store.
#[derive(Clone)]
pub struct CompletionCoordinator {
    store: Arc<dyn ProgressStore>,
    events: EventBroadcaster,
}

impl std::fmt::Debug for CompletionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionCoordinator")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl CompletionCoordinator {
    /// Creates a coordinator writing to `store` and publishing on `events`.
    #[must_use]
    pub fn new(store: Arc<dyn ProgressStore>, events: EventBroadcaster) -> Self {
        Self { store, events }
    }

    /// Runs the sequence on a detached task.
    ///
    /// The handle may be dropped; the task keeps running.
    pub fn spawn(&self, ticket: CompletionTicket) -> JoinHandle<CompletionReport> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run(ticket).await })
    }

    /// Runs the sequence to the end. Never fails.
    pub async fn run(&self, ticket: CompletionTicket) -> CompletionReport {
        let today = ticket.completed_at.date_naive();

        let prior = match self.store.read_profile(&ticket.user_id).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(
                    user_id = %ticket.user_id,
                    lesson_id = %ticket.lesson_id,
                    error = %err,
                    "Could not read learner profile, using fallback reward"
                );
                None
            }
        };

        let result = prior.as_ref().map_or_else(
            || fallback_reward(ticket.base_xp_reward, ticket.score, ticket.total_steps, today),
            |profile| {
                compute_reward(&RewardInput {
                    base_xp_reward: ticket.base_xp_reward,
                    score: ticket.score,
                    total_steps: ticket.total_steps,
                    prior_streak: profile.current_streak,
                    prior_longest_streak: profile.longest_streak,
                    last_activity_date: profile.last_activity_date,
                    prior_total_xp: profile.total_xp,
                    today,
                })
            },
        );

        info!(
            session_id = %ticket.session_id,
            lesson_id = %ticket.lesson_id,
            total_xp = result.total_xp,
            bonus_xp = result.bonus_xp,
            new_streak = result.new_streak,
            leveled_up = result.leveled_up,
            "Completion ready"
        );
        self.events.send(EngineEvent::CompletionReady {
            session_id: ticket.session_id,
            attempt: ticket.attempt,
            lesson_id: ticket.lesson_id.clone(),
            result: result.clone(),
        });

        let record = LessonProgressRecord {
            status: LessonStatus::Completed,
            score: ticket.score,
            total_steps: ticket.total_steps,
            xp_earned: result.total_xp,
            completed_at: ticket.completed_at,
        };
        let progress_saved = match self
            .store
            .upsert_lesson_progress(&ticket.user_id, &ticket.lesson_id, &record)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    user_id = %ticket.user_id,
                    lesson_id = %ticket.lesson_id,
                    error = %err,
                    "Could not save lesson progress"
                );
                false
            }
        };

        let profile_saved = match &prior {
            Some(profile) => {
                let updated = updated_profile(profile, &result, &ticket);
                match self.store.write_profile(&ticket.user_id, &updated).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(
                            user_id = %ticket.user_id,
                            error = %err,
                            "Could not save learner profile"
                        );
                        false
                    }
                }
            }
            None => {
                warn!(
                    user_id = %ticket.user_id,
                    "Skipping profile write, prior profile unknown"
                );
                false
            }
        };

        CompletionReport {
            result,
            profile_read: prior.is_some(),
            progress_saved,
            profile_saved,
        }
    }
}

/// The profile after `result` has been applied.
#[must_use]
pub fn updated_profile(
    prior: &LearnerProfile,
    result: &CompletionResult,
    ticket: &CompletionTicket,
) -> LearnerProfile {
    LearnerProfile {
        total_xp: prior.total_xp.saturating_add(result.total_xp),
        current_streak: result.new_streak,
        longest_streak: result.longest_streak,
        last_activity_date: Some(ticket.completed_at.date_naive()),
        lessons_completed: prior.lessons_completed.saturating_add(1),
    }
}
