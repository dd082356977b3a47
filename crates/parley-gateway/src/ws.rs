use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use parley_core::types::new_id;
use parley_speech::StreamEvent;

use crate::app::AppState;
use crate::auth::AuthOutcome;
use crate::http::optional_session_id;

#[derive(Deserialize)]
pub struct StreamParams {
    pub language: Option<String>,
    pub session_id: Option<String>,
}

/// GET /speech/stream — upgrade to the bidirectional transcription
/// channel: binary audio frames in, JSON events (§ event vocabulary of
/// [`StreamEvent`]) out.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    if let AuthOutcome::Invalid(reason) = state.auth.verify_ws(&headers) {
        warn!(%reason, "WS handshake rejected");
        return (StatusCode::UNAUTHORIZED, "unauthenticated").into_response();
    }

    let session_id = optional_session_id(&headers).or(params.session_id);
    let language = params.language;
    ws.on_upgrade(move |socket| handle_stream(socket, state, session_id, language))
}

/// Per-connection task — lives for the entire stream lifetime. The
/// coordinator owns the streaming slot and the task record; dropping the
/// handle on any exit path tears both down exactly once.
async fn handle_stream(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: Option<String>,
    language: Option<String>,
) {
    let conn_id = new_id();
    info!(conn_id = %conn_id, session_id = ?session_id, "new transcription stream");

    let mut handle = state.streams.open(session_id, language).await;
    state.live_streams.insert(conn_id.clone(), handle.task_id.clone());

    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            // client sent us something
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if handle.frames.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "WS receive error");
                        break;
                    }
                    _ => {}
                }
            }

            // coordinator event → forward to the client
            event = handle.events.recv() => {
                match event {
                    Some(event) => {
                        let terminal = matches!(event, StreamEvent::Error { .. });
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.live_streams.remove(&conn_id);
    info!(conn_id, "transcription stream closed");
    // `handle` drops here, closing the coordinator side.
}
