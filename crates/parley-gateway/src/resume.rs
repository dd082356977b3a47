use parley_core::config::MAX_UPLOAD_BYTES;
use parley_core::error::ParleyError;

/// Resume text extraction capability. Rich formats (PDF, DOCX) are handled
/// by an external document service; the built-in extractor covers plain
/// text uploads.
pub trait ResumeExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<String, ParleyError>;
}

pub struct PlainResumeExtractor;

impl ResumeExtractor for PlainResumeExtractor {
    fn extract(&self, bytes: &[u8], mime: &str) -> Result<String, ParleyError> {
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ParleyError::Validation(format!(
                "resume exceeds {MAX_UPLOAD_BYTES} bytes"
            )));
        }
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence {
            "text/plain" | "text/markdown" | "text/x-markdown" => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                if text.is_empty() {
                    return Err(ParleyError::Validation("resume is empty".into()));
                }
                Ok(text)
            }
            other => Err(ParleyError::Validation(format!(
                "unsupported resume content type: {other}"
            ))),
        }
    }
}
