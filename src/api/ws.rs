// =============================================================================
// WebSocket Handler — streaming indicator snapshots
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate snapshot at the default timeframe ("30m").
//   2. A fresh snapshot every poll interval (8 s by default) at the session's
//      current timeframe.
//
// Clients may send `{"timeframe": "<interval>"}` at any time; the change is
// acknowledged and used from the next push on.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Registers the session in the registry and deregisters it (aborting the
//     polling task) on disconnect.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::stream::StreamSession;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// The polling loop runs in its own task; this function only reads inbound
/// frames and waits for either side to finish via `tokio::select!`.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();

    let mut session = StreamSession::new(sender, state.config.default_interval.clone());
    let id = session.id();

    let Some(mut push_task) = session.start(state.scanner.clone(), state.poll_interval()) else {
        return;
    };
    if let Some(abort) = session.abort_handle() {
        state.sessions.register(id, session.timeframe_watch(), abort);
    }

    loop {
        tokio::select! {
            // ── Polling loop ended on its own (send failure) ─────────────
            _ = &mut push_task => {
                debug!(session = %id, "push loop finished — closing connection");
                break;
            }

            // ── Inbound frames ──────────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = session.handle_control(&text).await {
                            debug!(session = %id, error = %e, "Failed to answer control message — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("WebSocket Ping received — sending Pong");
                        if let Err(e) = session.send_raw(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("WebSocket Pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session = %id, "WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(session = %id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(session = %id, "WebSocket stream ended (None)");
                        break;
                    }
                }
            }
        }
    }

    let state_at_close = session.state();
    session.stop();
    state.sessions.deregister(id);
    info!(
        session = %id,
        state = ?state_at_close,
        timeframe = %session.timeframe(),
        "WebSocket connection closed — cleanup complete"
    );
}
