//! WebSocket event stream.
//!
//! Clients connecting to `/ws` first receive a `connected` event, then every
//! [`EngineEvent`] published by any session, as JSON text frames. The
//! server pings every 30 seconds and drops clients that miss three pongs.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::events::EngineEvent;

/// Pings a client may leave unanswered before it is dropped.
const MAX_MISSED_PONGS: u8 = 3;

/// Interval between heartbeat pings.
const HEARTBEAT: Duration = Duration::from_secs(30);

type Sink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Upgrading event stream connection");
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut incoming) = socket.split();

    // subscribe before announcing so nothing published in between is lost
    let mut events = state.events.subscribe();

    let active_sessions = state.sessions.lock().await.len();
    if forward(&mut sink, &EngineEvent::Connected { active_sessions })
        .await
        .is_break()
    {
        debug!("Event stream client left before the greeting");
        return;
    }
    info!(active_sessions, "Event stream client attached");

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    let mut unanswered: u8 = 0;

    loop {
        let flow = tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(Message::Pong(_))) => {
                    unanswered = 0;
                    ControlFlow::Continue(())
                }
                Some(Ok(Message::Ping(payload))) => send(&mut sink, Message::Pong(payload)).await,
                Some(Ok(Message::Text(_) | Message::Binary(_))) => ControlFlow::Continue(()),
                Some(Ok(Message::Close(_))) | None => ControlFlow::Break(()),
                Some(Err(e)) => {
                    debug!(error = %e, "Event stream read failed");
                    ControlFlow::Break(())
                }
            },

            received = events.recv() => match received {
                Ok(event) => forward(&mut sink, &event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream client fell behind");
                    ControlFlow::Continue(())
                }
                Err(RecvError::Closed) => ControlFlow::Break(()),
            },

            _ = heartbeat.tick() => {
                if unanswered >= MAX_MISSED_PONGS {
                    info!(unanswered, "Event stream client stopped answering pings");
                    ControlFlow::Break(())
                } else {
                    unanswered += 1;
                    send(&mut sink, Message::Ping(Vec::new())).await
                }
            }
        };

        if flow.is_break() {
            break;
        }
    }

    info!("Event stream client detached");
}

async fn send(sink: &mut Sink, message: Message) -> ControlFlow<()> {
    if sink.send(message).await.is_err() {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

/// Sends one event as a text frame; unserializable events are skipped.
async fn forward(sink: &mut Sink, event: &EngineEvent) -> ControlFlow<()> {
    match encode(event) {
        Some(json) => send(sink, Message::Text(json)).await,
        None => ControlFlow::Continue(()),
    }
}

fn encode(event: &EngineEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Could not serialize event");
            None
        }
    }
}
