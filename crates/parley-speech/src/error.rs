use thiserror::Error;

use parley_core::error::ParleyError;
use parley_limits::FabricError;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    /// All slots for the provider were in use for the whole acquire budget.
    #[error("capacity exhausted for {provider}")]
    CapacityExhausted { provider: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("speech task not found: {id}")]
    TaskNotFound { id: String },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<FabricError> for SpeechError {
    fn from(err: FabricError) -> Self {
        match err {
            FabricError::CapacityExhausted { provider } => {
                SpeechError::CapacityExhausted { provider: provider.to_string() }
            }
        }
    }
}

impl From<SpeechError> for ParleyError {
    fn from(err: SpeechError) -> Self {
        match err {
            SpeechError::CapacityExhausted { provider } => {
                ParleyError::CapacityExhausted { provider }
            }
            SpeechError::TaskNotFound { id } => ParleyError::SessionNotFound { id },
            SpeechError::Storage(e) => e.into(),
            other => ParleyError::AgentUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;
