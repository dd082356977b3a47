use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use parley_core::config::{LimitsConfig, MAX_FRAME_BYTES};
use parley_core::types::{SpeechTask, TaskResult, TaskType, Transcript};
use parley_limits::{Provider, RateLimitFabric};
use parley_store::SessionStore;

use crate::client::{ProviderEvent, TranscriptionClient};
use crate::events::StreamEvent;

/// Inbound audio frames queued from the client before backpressure.
const CLIENT_FRAME_BUFFER: usize = 32;
/// Outbound events queued towards the client before backpressure.
const CLIENT_EVENT_BUFFER: usize = 64;

/// One open streaming connection, as handed to the transport layer.
///
/// Send raw audio frames into `frames`; typed events arrive on `events`.
/// Dropping the handle tears the whole stream down.
pub struct StreamHandle {
    pub frames: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<StreamEvent>,
    pub task_id: String,
}

/// Drives bidirectional audio streams through the external provider under
/// the process-wide streaming cap.
///
/// The streaming slot is an owned permit held by the pump task, so it is
/// released exactly once on every exit path: normal close, client drop,
/// provider error, idle limit.
pub struct StreamingTranscriptionCoordinator {
    fabric: Arc<RateLimitFabric>,
    transcription: Arc<dyn TranscriptionClient>,
    store: Arc<dyn SessionStore>,
    acquire_budget: Duration,
    idle_limit: Duration,
}

impl StreamingTranscriptionCoordinator {
    pub fn new(
        fabric: Arc<RateLimitFabric>,
        transcription: Arc<dyn TranscriptionClient>,
        store: Arc<dyn SessionStore>,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            fabric,
            transcription,
            store,
            acquire_budget: Duration::from_millis(limits.stream_acquire_timeout_ms),
            idle_limit: Duration::from_secs(limits.stream_idle_seconds.max(1)),
        }
    }

    /// Accept a connection, optionally tagged to a session. The returned
    /// handle is live immediately; capacity and provider failures arrive
    /// as an `Error` event followed by channel closure.
    pub async fn open(
        &self,
        session_id: Option<String>,
        language: Option<String>,
    ) -> StreamHandle {
        let (frame_tx, frame_rx) = mpsc::channel(CLIENT_FRAME_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(CLIENT_EVENT_BUFFER);

        let task = SpeechTask::new(TaskType::StreamingTranscription, session_id);
        let task_id = task.task_id.clone();
        if let Err(e) = self.store.put_task(&task).await {
            warn!(task_id = %task_id, error = %e, "could not record stream task");
        }

        let pump = Pump {
            fabric: self.fabric.clone(),
            transcription: self.transcription.clone(),
            store: self.store.clone(),
            acquire_budget: self.acquire_budget,
            idle_limit: self.idle_limit,
            language,
            task,
        };
        tokio::spawn(pump.run(frame_rx, event_tx));

        StreamHandle { frames: frame_tx, events: event_rx, task_id }
    }
}

struct Pump {
    fabric: Arc<RateLimitFabric>,
    transcription: Arc<dyn TranscriptionClient>,
    store: Arc<dyn SessionStore>,
    acquire_budget: Duration,
    idle_limit: Duration,
    language: Option<String>,
    task: SpeechTask,
}

impl Pump {
    async fn run(
        mut self,
        mut client_frames: mpsc::Receiver<Vec<u8>>,
        events: mpsc::Sender<StreamEvent>,
    ) {
        let task_id = self.task.task_id.clone();
        let started = tokio::time::Instant::now();

        // Capacity first: a denied stream never reaches the provider.
        let _slot = match self
            .fabric
            .acquire_within(Provider::StreamingTranscription, self.acquire_budget)
            .await
        {
            Ok(slot) => slot,
            Err(_) => {
                info!(task_id = %task_id, "stream denied, capacity exhausted");
                let _ = events
                    .send(StreamEvent::Error {
                        message: "capacity-exhausted: streaming-transcription".into(),
                    })
                    .await;
                self.finish(Err("capacity-exhausted".into()), String::new(), 0.0).await;
                return;
            }
        };

        let provider = match self.transcription.open_stream(self.language.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "provider stream open failed");
                let _ = events.send(StreamEvent::Error { message: e.to_string() }).await;
                self.finish(Err(e.to_string()), String::new(), 0.0).await;
                return;
            }
        };
        let provider_frames = provider.frames;
        let mut provider_events = provider.events;

        let mut final_text = String::new();
        let mut final_segments: u32 = 0;
        let mut outcome: Result<(), String> = Ok(());

        loop {
            tokio::select! {
                frame = client_frames.recv() => match frame {
                    Some(frame) => {
                        if frame.len() > MAX_FRAME_BYTES {
                            warn!(task_id = %task_id, size = frame.len(), "oversized frame dropped");
                            continue;
                        }
                        if provider_frames.send(frame).await.is_err() {
                            outcome = Err("provider closed the audio channel".into());
                            break;
                        }
                    }
                    // Client hung up: normal closure.
                    None => break,
                },

                event = provider_events.recv() => match event {
                    Some(ProviderEvent::Ready) => {
                        debug!(task_id = %task_id, "provider ready");
                        if events.send(StreamEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Some(ProviderEvent::Transcript { text, is_final }) => {
                        if is_final {
                            if !final_text.is_empty() {
                                final_text.push(' ');
                            }
                            final_text.push_str(&text);
                            final_segments += 1;
                        }
                        if events
                            .send(StreamEvent::Transcript { is_final, text })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(ProviderEvent::SpeechStarted { timestamp_ms }) => {
                        if events
                            .send(StreamEvent::SpeechStarted { timestamp_ms })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(ProviderEvent::UtteranceEnd { last_spoken_at_ms }) => {
                        if events
                            .send(StreamEvent::UtteranceEnd { last_spoken_at_ms })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(ProviderEvent::Error { message }) => {
                        let _ = events
                            .send(StreamEvent::Error { message: message.clone() })
                            .await;
                        outcome = Err(message);
                        break;
                    }
                    // Provider closed its event stream.
                    None => break,
                },

                // Recreated every loop turn, so this fires only after a
                // full idle window with no traffic in either direction.
                _ = tokio::time::sleep(self.idle_limit) => {
                    info!(task_id = %task_id, "stream idle limit reached");
                    let _ = events
                        .send(StreamEvent::Error { message: "stream idle limit reached".into() })
                        .await;
                    outcome = Err("stream idle limit reached".into());
                    break;
                }
            }
        }

        // Teardown order: stop forwarding, close the provider leg, record
        // the task outcome. The slot releases when `_slot` drops.
        drop(provider_frames);
        self.task.progress = serde_json::json!({ "final_segments": final_segments });
        self.finish(outcome, final_text, started.elapsed().as_secs_f64()).await;
        info!(task_id = %task_id, "stream closed");
    }

    async fn finish(
        &mut self,
        outcome: Result<(), String>,
        final_text: String,
        duration_secs: f64,
    ) {
        match outcome {
            Ok(()) => self.task.complete(TaskResult::Transcript {
                transcript: Transcript {
                    text: final_text,
                    confidence: 1.0,
                    duration_secs,
                },
            }),
            Err(message) => self.task.fail(message),
        }
        if let Err(e) = self.store.put_task(&self.task).await {
            warn!(task_id = %self.task.task_id, error = %e, "could not record stream outcome");
        }
    }
}
