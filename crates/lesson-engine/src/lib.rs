//! Lesson Execution Engine
//!
//! Plays a lesson for one learner: judges each step, tracks lives and
//! score, computes the reward on completion and records progress on a
//! best-effort basis. Hosts drive it through [`LessonRunner`] directly or
//! over HTTP via [`create_router`].

pub mod api;
pub mod completion;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod judge;
pub mod lesson;
pub mod memory;
pub mod reward;
pub mod runner;
pub mod session;
pub mod websocket;

pub use api::{
    create_router, AnswerRequest, AppState, CommandResponse, CreateSessionRequest,
    CreateSessionResponse, ErrorResponse, OpenSession, PairRequest, PlaybackRequest,
    PlaybackResponse, RetryResponse,
};
pub use completion::{CompletionCoordinator, CompletionReport, CompletionTicket};
pub use config::{EngineConfig, SessionRules, CONFIG_FILE_NAME, MAX_LIVES};
pub use contracts::{
    ContentProvider, LearnerProfile, LessonProgressRecord, LessonStatus, ProgressStore,
};
pub use error::{ContentError, EngineError, Result, StoreErrorKind, StoreOp};
pub use events::{EngineEvent, EventBroadcaster};
pub use judge::{is_ready, judge, judge_body, Correctness};
pub use lesson::{LessonDefinition, LessonStep, Response, StepBody, StepKind};
pub use reward::{compute_reward, fallback_reward, level_for_xp, CompletionResult, RewardInput};
pub use runner::LessonRunner;
pub use session::{
    AdvanceOutcome, AnswerOutcome, Feedback, IgnoredReason, PairOutcome, Phase, Session,
    SessionSnapshot, SessionState, StepView,
};
