use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use parley_core::error::ParleyError;
use parley_core::types::{FeedbackEntry, SessionConfig, SessionStats, SummaryStatus, Turn};
use parley_session::{InterimResults, SessionOrchestrator, TimeRemaining};

use crate::app::AppState;
use crate::http::{
    authenticate, error_response, fail, optional_session_id, require_session_id, ApiResult,
};

/// Wall-clock budget for a turn-producing request; the in-flight LLM call
/// is cancelled and the provisional turn rolled back on expiry.
const TURN_DEADLINE_SECS: u64 = 90;

async fn acquire(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<SessionOrchestrator>, crate::http::ApiError> {
    let session_id = require_session_id(headers)?;
    state.registry.acquire(&session_id).await.map_err(fail)
}

#[derive(Serialize)]
pub struct StartReply {
    pub session_id: String,
    pub turn: Turn,
}

/// POST /interview/start — produce the opening turn.
///
/// With an `X-Session-ID` header the referenced session is started; with a
/// config body and no header, a session is created and started in one hop.
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StartReply> {
    let session_id = match optional_session_id(&headers) {
        Some(id) => id,
        None => {
            if body.is_empty() {
                return Err(error_response(ParleyError::Validation(
                    "provide X-Session-ID or an interview configuration".into(),
                )));
            }
            let config: SessionConfig = serde_json::from_slice(&body).map_err(|e| {
                error_response(ParleyError::Validation(format!("invalid configuration: {e}")))
            })?;
            let owner = authenticate(&state, &headers)?;
            state.registry.create(config, owner).await.map_err(fail)?
        }
    };

    let orchestrator = state.registry.acquire(&session_id).await.map_err(fail)?;
    // Detached so a dropped request cannot strand the turn state machine.
    let turn = tokio::spawn(async move { orchestrator.start().await })
        .await
        .map_err(|e| error_response(ParleyError::Internal(e.to_string())))?
        .map_err(fail)?;
    Ok(Json(StartReply { session_id, turn }))
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct MessageReply {
    pub turn: Turn,
}

/// POST /interview/message — consume a user answer, return the next
/// interviewer turn.
pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> ApiResult<MessageReply> {
    if req.message.trim().is_empty() {
        return Err(error_response(ParleyError::Validation("message cannot be empty".into())));
    }
    let orchestrator = acquire(&state, &headers).await?;

    // The deadline cancels the in-flight LLM call; rollback is handled
    // inside the orchestrator.
    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(TURN_DEADLINE_SECS)).await;
        deadline.cancel();
    });

    // Detached so a dropped request cannot strand the turn state machine.
    let turn = tokio::spawn(async move {
        orchestrator.send_user_message(&req.message, Some(cancel)).await
    })
    .await
    .map_err(|e| error_response(ParleyError::Internal(e.to_string())))?
    .map_err(fail)?;
    Ok(Json(MessageReply { turn }))
}

#[derive(Serialize)]
pub struct EndReply {
    pub interim_results: InterimResults,
    pub per_turn_feedback: Vec<FeedbackEntry>,
}

/// POST /interview/end — complete the interview; grading still in flight
/// keeps merging and is visible via GET /interview/feedback.
pub async fn end_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<EndReply> {
    let orchestrator = acquire(&state, &headers).await?;
    let interim = tokio::spawn(async move { orchestrator.end().await })
        .await
        .map_err(|e| error_response(ParleyError::Internal(e.to_string())))?
        .map_err(fail)?;
    Ok(Json(EndReply {
        per_turn_feedback: interim.feedback.clone(),
        interim_results: interim,
    }))
}

/// POST /interview/reset — wipe conversation state, keep the config.
pub async fn reset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let orchestrator = acquire(&state, &headers).await?;
    orchestrator.reset().await.map_err(fail)?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Serialize)]
pub struct PingReply {
    pub new_expiry_minutes: u64,
}

/// POST /interview/ping — extend the idle deadline.
pub async fn ping_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<PingReply> {
    let orchestrator = acquire(&state, &headers).await?;
    let remaining = orchestrator.ping().await.map_err(fail)?;
    Ok(Json(PingReply { new_expiry_minutes: remaining.as_secs() / 60 }))
}

/// POST /interview/cleanup — flush, abandon if active, evict. Idempotent;
/// wired to client unload, so unknown sessions succeed quietly.
pub async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let session_id = require_session_id(&headers)?;
    if let Err(e) = state.registry.cleanup(&session_id).await {
        warn!(session_id, error = %e, "cleanup failed");
        return Err(fail(e));
    }
    Ok(Json(json!({ "ok": true })))
}

/// GET /interview/history
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let orchestrator = acquire(&state, &headers).await?;
    let turns = orchestrator.history().await;
    Ok(Json(json!({ "turns": turns })))
}

/// GET /interview/stats
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<SessionStats> {
    let orchestrator = acquire(&state, &headers).await?;
    Ok(Json(orchestrator.stats().await))
}

/// GET /interview/feedback — per-turn coach feedback merged so far.
pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let orchestrator = acquire(&state, &headers).await?;
    let feedback = orchestrator.per_turn_feedback().await;
    Ok(Json(json!({ "feedback": feedback })))
}

/// GET /interview/summary — final-summary status.
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<SummaryStatus> {
    let orchestrator = acquire(&state, &headers).await?;
    Ok(Json(orchestrator.summary_status().await))
}

/// GET /interview/time-remaining
pub async fn time_remaining_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<TimeRemaining> {
    let orchestrator = acquire(&state, &headers).await?;
    Ok(Json(orchestrator.time_remaining().await))
}
