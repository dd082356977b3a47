use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use std::sync::Arc;

use parley_core::config::MAX_UPLOAD_BYTES;
use parley_core::error::ParleyError;

use crate::app::AppState;
use crate::http::{authenticate, error_response, ApiResult};

#[derive(Serialize)]
pub struct UploadReply {
    pub filename: String,
    pub extracted_text: String,
}

/// POST /resume/upload — raw file body; content type from the standard
/// header, filename from `X-Filename`. Returns the extracted text for the
/// client to attach to a session configuration.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<UploadReply> {
    authenticate(&state, &headers)?;

    if body.len() > MAX_UPLOAD_BYTES {
        return Err(error_response(ParleyError::Validation(format!(
            "upload exceeds {MAX_UPLOAD_BYTES} bytes"
        ))));
    }
    let mime = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let filename = headers
        .get("x-filename")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("resume.txt")
        .to_string();

    let extracted_text = state.resume.extract(&body, mime).map_err(error_response)?;
    Ok(Json(UploadReply { filename, extracted_text }))
}
