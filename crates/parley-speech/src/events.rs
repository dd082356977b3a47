use serde::{Deserialize, Serialize};

/// Outbound event vocabulary of a streaming-transcription connection.
///
/// Serialized with an explicit `type` discriminator so WS clients can
/// branch without sniffing payload shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The provider connection is live; audio may flow.
    Connected,
    Transcript {
        is_final: bool,
        text: String,
    },
    SpeechStarted {
        timestamp_ms: u64,
    },
    UtteranceEnd {
        last_spoken_at_ms: u64,
    },
    Error {
        message: String,
    },
}
