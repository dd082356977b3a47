use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use parley_core::types::Transcript;

use crate::error::SpeechError;

/// Event emitted by the streaming-transcription provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// Provider accepted the stream and is listening.
    Ready,
    Transcript { text: String, is_final: bool },
    SpeechStarted { timestamp_ms: u64 },
    UtteranceEnd { last_spoken_at_ms: u64 },
    Error { message: String },
}

/// Pump primitives of one open provider stream: a sink for raw audio
/// frames and a source of provider events. Dropping the frame sender
/// closes the upstream leg.
pub struct ProviderStream {
    pub frames: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

/// Speech-to-text capability: one-shot batch recognition plus the
/// streaming pump primitives.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: Option<&str>,
    ) -> Result<Transcript, SpeechError>;

    async fn open_stream(&self, language: Option<&str>) -> Result<ProviderStream, SpeechError>;
}

/// Text-to-speech capability.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        speed: Option<f32>,
    ) -> Result<Vec<u8>, SpeechError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_events_deserialize_by_tag() {
        let event: ProviderEvent =
            serde_json::from_str("{\"type\":\"transcript\",\"text\":\"hi\",\"is_final\":false}")
                .unwrap();
        assert_eq!(event, ProviderEvent::Transcript { text: "hi".into(), is_final: false });

        let event: ProviderEvent = serde_json::from_str("{\"type\":\"ready\"}").unwrap();
        assert_eq!(event, ProviderEvent::Ready);
    }
}
