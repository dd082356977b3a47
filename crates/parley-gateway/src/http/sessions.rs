use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use parley_core::types::{SessionConfig, SessionStatus};

use crate::app::AppState;
use crate::http::{authenticate, fail, ApiResult};

/// How many sessions `GET /sessions` returns at most.
const LIST_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct CreateReply {
    pub session_id: String,
}

/// POST /sessions — create a session from an interview configuration.
pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(config): Json<SessionConfig>,
) -> ApiResult<CreateReply> {
    let owner = authenticate(&state, &headers)?;
    let session_id = state.registry.create(config, owner).await.map_err(fail)?;
    Ok(Json(CreateReply { session_id }))
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub target_role: String,
    pub question_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// GET /sessions — most recent sessions owned by the caller.
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let Some(owner) = authenticate(&state, &headers)? else {
        // Anonymous sessions are not listable; there is no owner key.
        return Ok(Json(json!({ "sessions": [] })));
    };

    let metas = state
        .store
        .list_for_owner(&owner, LIST_LIMIT)
        .await
        .map_err(fail)?;
    let sessions: Vec<SessionSummary> = metas
        .into_iter()
        .map(|m| SessionSummary {
            session_id: m.session_id,
            status: m.status,
            target_role: m.config.target_role,
            question_count: m.stats.question_count,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
        .collect();
    Ok(Json(json!({ "sessions": sessions })))
}
