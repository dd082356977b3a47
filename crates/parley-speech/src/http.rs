use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use parley_core::config::{SynthesisProviderConfig, TranscriptionProviderConfig};
use parley_core::types::Transcript;

use crate::client::{ProviderEvent, ProviderStream, SynthesisClient, TranscriptionClient};
use crate::error::SpeechError;

/// Buffered audio frames queued towards the provider before backpressure.
const STREAM_FRAME_BUFFER: usize = 32;
/// Buffered provider events before backpressure.
const STREAM_EVENT_BUFFER: usize = 64;

/// Speech-to-text over the provider's HTTP API. Batch recognition posts
/// the whole clip; the streaming leg uploads a chunked body fed from a
/// channel while newline-delimited JSON events stream back.
pub struct HttpTranscriptionClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpTranscriptionClient {
    pub fn new(config: &TranscriptionProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        language: Option<&str>,
    ) -> Result<Transcript, SpeechError> {
        let mut url = format!("{}/v1/transcribe", self.base_url);
        if let Some(lang) = language {
            url.push_str(&format!("?language={lang}"));
        }

        debug!(bytes = audio.len(), "sending batch transcription request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "transcription API error");
            return Err(SpeechError::Api { status, message: text });
        }

        let api_resp: TranscribeResponse =
            resp.json().await.map_err(|e| SpeechError::Parse(e.to_string()))?;

        Ok(Transcript {
            text: api_resp.text,
            confidence: api_resp.confidence,
            duration_secs: api_resp.duration,
        })
    }

    async fn open_stream(&self, language: Option<&str>) -> Result<ProviderStream, SpeechError> {
        let mut url = format!("{}/v1/transcribe/stream", self.base_url);
        if let Some(lang) = language {
            url.push_str(&format!("?language={lang}"));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(STREAM_FRAME_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(STREAM_EVENT_BUFFER);

        let body = reqwest::Body::wrap_stream(
            ReceiverStream::new(frame_rx).map(Ok::<Vec<u8>, std::io::Error>),
        );
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(body)
            .send();

        tokio::spawn(async move {
            let resp = match request.await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    let _ = event_tx
                        .send(ProviderEvent::Error {
                            message: format!("provider returned {status}: {text}"),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(ProviderEvent::Error { message: e.to_string() })
                        .await;
                    return;
                }
            };

            let _ = event_tx.send(ProviderEvent::Ready).await;

            // Provider events arrive as newline-delimited JSON objects.
            let mut buffer = String::new();
            let mut chunks = resp.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = event_tx
                            .send(ProviderEvent::Error { message: e.to_string() })
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ProviderEvent>(line) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                return; // consumer hung up
                            }
                        }
                        Err(e) => warn!(error = %e, "unparseable provider event, skipping"),
                    }
                }
            }
        });

        Ok(ProviderStream { frames: frame_tx, events: event_rx })
    }
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    confidence: f64,
    duration: f64,
}

/// Text-to-speech over the provider's HTTP API.
pub struct HttpSynthesisClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    default_voice: Option<String>,
}

impl HttpSynthesisClient {
    pub fn new(config: &SynthesisProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            default_voice: config.voice.clone(),
        }
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        speed: Option<f32>,
    ) -> Result<Vec<u8>, SpeechError> {
        let url = format!("{}/v1/synthesize", self.base_url);
        let voice = voice.or(self.default_voice.as_deref());

        debug!(chars = text.len(), ?voice, "sending synthesis request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "voice": voice,
                "speed": speed,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status, body = %body, "synthesis API error");
            return Err(SpeechError::Api { status, message: body });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}
