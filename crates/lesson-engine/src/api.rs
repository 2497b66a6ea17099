//! HTTP API for remote host UIs.
//!
//! Exposes [`LessonRunner`] commands over JSON. Sessions live in an
//! in-memory registry keyed by session id. `DELETE` removes a session at
//! once; a session that reached `Celebrating` or `GameOver` is also dropped
//! once it has gone `server.finishedSessionTtlSecs` without a request. The
//! sweep runs whenever a session is created.
//!
//! # Endpoints
//!
//! - `POST /api/sessions` - Load a lesson and start a session
//! - `GET /api/sessions/:id` - Current snapshot
//! - `POST /api/sessions/:id/answer` - Submit a response
//! - `POST /api/sessions/:id/pairs` - Try one `match_pairs` association
//! - `POST /api/sessions/:id/playback` - Report video playback
//! - `POST /api/sessions/:id/advance` - Continue
//! - `POST /api/sessions/:id/retry` - Start a fresh attempt
//! - `DELETE /api/sessions/:id` - Exit
//! - `GET /ws` - Event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lesson_engine::memory::{MemoryContentProvider, MemoryProgressStore};
//! use lesson_engine::{create_router, AppState, EngineConfig};
//!
//! # async fn example() {
//! let state = AppState::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryContentProvider::new()),
//!     Arc::new(MemoryProgressStore::new()),
//! );
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::contracts::{ContentProvider, ProgressStore};
use crate::error::EngineError;
use crate::events::EventBroadcaster;
use crate::lesson::Response;
use crate::runner::LessonRunner;
use crate::session::{AdvanceOutcome, AnswerOutcome, PairOutcome, SessionSnapshot};
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/sessions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Learner.
    pub user_id: String,
    /// Lesson to play.
    pub lesson_id: String,
}

/// Response body for `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Id of the new session.
    pub session_id: Uuid,
    /// Its initial snapshot.
    pub snapshot: SessionSnapshot,
}

/// Request body for the answer endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    /// The learner's response.
    pub response: Response,
}

/// Request body for the pairs endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PairRequest {
    /// Left item index.
    pub left: usize,
    /// Right item index.
    pub right: usize,
}

/// Request body for the playback endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PlaybackRequest {
    /// Seconds played.
    pub position: f64,
    /// Length of the video in seconds.
    pub duration: f64,
}

/// Response body for the playback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackResponse {
    /// Whether this report unlocked the step.
    pub unlocked: bool,
    /// Snapshot after the report.
    pub snapshot: SessionSnapshot,
}

/// Response body for the retry endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryResponse {
    /// New attempt number.
    pub attempt: u32,
    /// Snapshot of the fresh attempt.
    pub snapshot: SessionSnapshot,
}

/// Response body for command endpoints: the outcome's fields plus the
/// snapshot after the command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse<T> {
    /// What the command did.
    #[serde(flatten)]
    pub outcome: T,
    /// Snapshot after the command.
    pub snapshot: SessionSnapshot,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// A session held by the server.
#[derive(Debug, Clone)]
pub struct OpenSession {
    /// Handle to the session.
    pub runner: LessonRunner,
    /// When a request last reached the session.
    pub last_used: Instant,
}

impl OpenSession {
    fn new(runner: LessonRunner) -> Self {
        Self {
            runner,
            last_used: Instant::now(),
        }
    }
}

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Where lessons come from.
    pub content: Arc<dyn ContentProvider>,
    /// Where progress goes.
    pub store: Arc<dyn ProgressStore>,
    /// Event stream shared by every session.
    pub events: EventBroadcaster,
    /// Open sessions.
    pub sessions: Arc<Mutex<HashMap<Uuid, OpenSession>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates a state with no open sessions.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn ContentProvider>,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        let events = EventBroadcaster::new(config.event_capacity);
        Self {
            config,
            content,
            store,
            events,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn runner(&self, id: Uuid) -> Result<LessonRunner, ApiError> {
        let mut sessions = self.sessions.lock().await;
        let open = sessions
            .get_mut(&id)
            .ok_or_else(|| ApiError::from(EngineError::session_not_found(id)))?;
        open.last_used = Instant::now();
        Ok(open.runner.clone())
    }

    /// Drops finished sessions idle for longer than the configured TTL and
    /// returns how many were removed.
    pub async fn prune_finished(&self) -> usize {
        let ttl = Duration::from_secs(self.config.server.finished_session_ttl_secs);
        let mut sessions = self.sessions.lock().await;

        let mut expired = Vec::new();
        for (id, open) in sessions.iter() {
            if open.last_used.elapsed() >= ttl && open.runner.phase().await.is_terminal() {
                expired.push(*id);
            }
        }

        for id in &expired {
            sessions.remove(id);
            info!(session_id = %id, "Finished session pruned");
        }
        expired.len()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// Unknown lesson or session.
    NotFound(String),
    /// The lesson cannot be played.
    Unprocessable(String),
    /// A collaborator is temporarily unavailable.
    Unavailable(String),
    /// Anything else.
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::ContentNotFound { .. } | EngineError::SessionNotFound { .. } => {
                Self::NotFound(message)
            }
            EngineError::InvalidLesson { .. } => Self::Unprocessable(message),
            _ if err.is_transient() => Self::Unavailable(message),
            _ => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries a permissive CORS layer for development UIs and a
/// request tracing layer.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/:id",
            get(handle_get_session).delete(handle_exit_session),
        )
        .route("/sessions/:id/answer", post(handle_answer))
        .route("/sessions/:id/pairs", post(handle_pair))
        .route("/sessions/:id/playback", post(handle_playback))
        .route("/sessions/:id/advance", post(handle_advance))
        .route("/sessions/:id/retry", post(handle_retry));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/sessions`.
async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let runner = LessonRunner::start(
        &state.config,
        state.content.as_ref(),
        state.store.clone(),
        state.events.clone(),
        &request.user_id,
        &request.lesson_id,
    )
    .await
    .map_err(|err| {
        warn!(lesson_id = %request.lesson_id, error = %err, "Could not start session");
        ApiError::from(err)
    })?;

    state.prune_finished().await;

    let session_id = runner.id();
    let snapshot = runner.snapshot().await;
    state
        .sessions
        .lock()
        .await
        .insert(session_id, OpenSession::new(runner));

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            snapshot,
        }),
    ))
}

/// Handler for `GET /api/sessions/:id`.
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let runner = state.runner(id).await?;
    Ok(Json(runner.snapshot().await))
}

/// Handler for `POST /api/sessions/:id/answer`.
async fn handle_answer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<CommandResponse<AnswerOutcome>>, ApiError> {
    let runner = state.runner(id).await?;
    let outcome = runner.submit_answer(request.response).await;
    Ok(Json(CommandResponse {
        outcome,
        snapshot: runner.snapshot().await,
    }))
}

/// Handler for `POST /api/sessions/:id/pairs`.
async fn handle_pair(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<PairRequest>,
) -> Result<Json<CommandResponse<PairOutcome>>, ApiError> {
    let runner = state.runner(id).await?;
    let outcome = runner.attempt_pair(request.left, request.right).await;
    Ok(Json(CommandResponse {
        outcome,
        snapshot: runner.snapshot().await,
    }))
}

/// Handler for `POST /api/sessions/:id/playback`.
async fn handle_playback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Json<PlaybackResponse>, ApiError> {
    let runner = state.runner(id).await?;
    let unlocked = runner
        .report_playback(request.position, request.duration)
        .await;
    Ok(Json(PlaybackResponse {
        unlocked,
        snapshot: runner.snapshot().await,
    }))
}

/// Handler for `POST /api/sessions/:id/advance`.
async fn handle_advance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CommandResponse<AdvanceOutcome>>, ApiError> {
    let runner = state.runner(id).await?;
    let outcome = runner.advance().await;
    Ok(Json(CommandResponse {
        outcome,
        snapshot: runner.snapshot().await,
    }))
}

/// Handler for `POST /api/sessions/:id/retry`.
async fn handle_retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, ApiError> {
    let runner = state.runner(id).await?;
    let attempt = runner
        .retry()
        .await
        .ok_or_else(|| ApiError::from(EngineError::session_not_found(id)))?;
    Ok(Json(RetryResponse {
        attempt,
        snapshot: runner.snapshot().await,
    }))
}

/// Handler for `DELETE /api/sessions/:id`.
async fn handle_exit_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let open = state
        .sessions
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| ApiError::from(EngineError::session_not_found(id)))?;
    open.runner.exit().await;
    info!(session_id = %id, "Session removed");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Tests
// ============================================================================
