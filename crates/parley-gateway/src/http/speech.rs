use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use parley_core::config::MAX_UPLOAD_BYTES;
use parley_core::error::ParleyError;
use parley_core::types::SpeechTask;

use crate::app::AppState;
use crate::http::{
    authenticate, error_response, fail, optional_session_id, ApiError, ApiResult,
};

#[derive(Deserialize)]
pub struct TranscriptionParams {
    pub language: Option<String>,
}

#[derive(Serialize)]
pub struct SubmitReply {
    pub task_id: String,
}

/// POST /speech/transcriptions — raw audio body; returns a task id to poll.
pub async fn submit_transcription_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TranscriptionParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<SubmitReply> {
    authenticate(&state, &headers)?;
    if body.is_empty() {
        return Err(error_response(ParleyError::Validation("audio body is empty".into())));
    }
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(error_response(ParleyError::Validation(format!(
            "audio exceeds {MAX_UPLOAD_BYTES} bytes"
        ))));
    }

    let task_id = state
        .speech
        .submit_batch(body.to_vec(), params.language, optional_session_id(&headers))
        .await
        .map_err(fail)?;
    Ok(Json(SubmitReply { task_id }))
}

/// GET /speech/transcriptions/{task_id}
pub async fn transcription_status_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<SpeechTask> {
    authenticate(&state, &headers)?;
    let task = state.speech.task_status(&task_id).await.map_err(fail)?;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// POST /speech/synthesize — returns the synthesized audio bytes.
pub async fn synthesize_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SynthesizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authenticate(&state, &headers)?;
    if req.text.trim().is_empty() {
        return Err(error_response(ParleyError::Validation("text cannot be empty".into())));
    }

    let audio = state
        .speech
        .synthesize(
            &req.text,
            req.voice.as_deref(),
            req.speed,
            optional_session_id(&headers),
        )
        .await
        .map_err(fail)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/mpeg")],
        audio,
    ))
}
