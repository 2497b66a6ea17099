//! Engine events and their broadcaster.
//!
//! Every session transition the host UI may care about is published as an
//! [`EngineEvent`]. Events are serialized as `{"event": ..., "payload": ...}`
//! and carry the id of the session they belong to, so one stream can serve
//! many sessions.
//!
//! # Example
//!
//! ```
//! use lesson_engine::events::{EngineEvent, EventBroadcaster};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(EngineEvent::SessionExited { session_id: Uuid::new_v4() });
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_name(), "session_exited");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::judge::Correctness;
use crate::lesson::StepKind;
use crate::reward::CompletionResult;

// ============================================================================
// Event Enum
// ============================================================================

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum EngineEvent {
    /// Sent to a WebSocket client when it connects.
    Connected {
        /// Sessions currently open.
        active_sessions: usize,
    },
    /// A lesson loaded and its first attempt began.
    SessionStarted {
        /// Session id.
        session_id: Uuid,
        /// Learner.
        user_id: String,
        /// Lesson.
        lesson_id: String,
        /// Steps in the lesson.
        total_steps: usize,
    },
    /// A response was recorded and judged.
    StepJudged {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Judged step.
        step_index: usize,
        /// Judgement.
        correctness: Correctness,
        /// Score after the judgement.
        score: usize,
        /// Lives after the judgement.
        lives: u8,
    },
    /// A wrong `match_pairs` association was rejected.
    PairRejected {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Current step.
        step_index: usize,
        /// Left item index.
        left: usize,
        /// Right item index.
        right: usize,
        /// How long to show the pair as wrong.
        flash_ms: u64,
    },
    /// A passive step may now be continued.
    StepUnlocked {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Unlocked step.
        step_index: usize,
    },
    /// The next step became current.
    StepAdvanced {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// New step index.
        step_index: usize,
        /// Kind of the new step.
        step_type: StepKind,
    },
    /// Lives ran out.
    GameOver {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Step on which the last life was lost.
        step_index: usize,
        /// Score reached.
        score: usize,
    },
    /// The last step was passed.
    Celebrating {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Final score.
        score: usize,
        /// Steps in the lesson.
        total_steps: usize,
    },
    /// The reward for a completed attempt is known.
    CompletionReady {
        /// Session id.
        session_id: Uuid,
        /// Attempt number.
        attempt: u32,
        /// Lesson.
        lesson_id: String,
        /// The reward.
        result: CompletionResult,
    },
    /// A fresh attempt began.
    SessionRetried {
        /// Session id.
        session_id: Uuid,
        /// New attempt number.
        attempt: u32,
    },
    /// The learner left the lesson.
    SessionExited {
        /// Session id.
        session_id: Uuid,
    },
}

impl EngineEvent {
    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SessionStarted { .. } => "session_started",
            Self::StepJudged { .. } => "step_judged",
            Self::PairRejected { .. } => "pair_rejected",
            Self::StepUnlocked { .. } => "step_unlocked",
            Self::StepAdvanced { .. } => "step_advanced",
            Self::GameOver { .. } => "game_over",
            Self::Celebrating { .. } => "celebrating",
            Self::CompletionReady { .. } => "completion_ready",
            Self::SessionRetried { .. } => "session_retried",
            Self::SessionExited { .. } => "session_exited",
        }
    }

    /// The session the event belongs to; `None` for `connected`.
    #[must_use]
    pub const fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::Connected { .. } => None,
            Self::SessionStarted { session_id, .. }
            | Self::StepJudged { session_id, .. }
            | Self::PairRejected { session_id, .. }
            | Self::StepUnlocked { session_id, .. }
            | Self::StepAdvanced { session_id, .. }
            | Self::GameOver { session_id, .. }
            | Self::Celebrating { session_id, .. }
            | Self::CompletionReady { session_id, .. }
            | Self::SessionRetried { session_id, .. }
            | Self::SessionExited { session_id } => Some(*session_id),
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans engine events out to every subscriber.
///
/// Backed by a tokio broadcast channel. Subscribers that fall more than
/// `capacity` events behind miss the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event and returns how many subscribers will see it.
    pub fn send(&self, event: EngineEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Tests
// ============================================================================
