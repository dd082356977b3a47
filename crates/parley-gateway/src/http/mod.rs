pub mod health;
pub mod interview;
pub mod sessions;
pub mod speech;
pub mod upload;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use parley_core::error::ParleyError;

use crate::app::AppState;
use crate::auth::AuthOutcome;

/// Uniform error payload: machine code plus human message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn error_response(err: ParleyError) -> ApiError {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail { code: err.code(), message: err.to_string() },
        }),
    )
}

/// Convert any session/speech-layer error into the wire shape.
pub fn fail<E: Into<ParleyError>>(err: E) -> ApiError {
    error_response(err.into())
}

/// Session identifier carried on a request.
pub const SESSION_HEADER: &str = "x-session-id";

pub fn require_session_id(headers: &HeaderMap) -> Result<String, ApiError> {
    optional_session_id(headers).ok_or_else(|| {
        error_response(ParleyError::Validation("missing X-Session-ID header".into()))
    })
}

pub fn optional_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Resolve the caller: `Ok(Some(user))`, `Ok(None)` for anonymous, or a
/// 401 for a bad credential.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    match state.auth.verify(crate::auth::extract_bearer(headers)) {
        AuthOutcome::User(id) => Ok(Some(id)),
        AuthOutcome::Anonymous => Ok(None),
        AuthOutcome::Invalid(reason) => {
            Err(error_response(ParleyError::Unauthenticated(reason)))
        }
    }
}
