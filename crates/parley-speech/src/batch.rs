use std::sync::Arc;

use tracing::{info, instrument, warn};

use parley_core::types::{SpeechTask, TaskResult, TaskType};
use parley_limits::{Provider, RateLimitFabric};
use parley_store::SessionStore;

use crate::client::{SynthesisClient, TranscriptionClient};
use crate::error::{Result, SpeechError};

/// Batch transcription and synthesis, tracked through the speech-task
/// table.
///
/// Batch jobs run in background tasks: submit returns a task id right
/// away and the record moves Processing → Completed/Error as the provider
/// call resolves under the batch cap.
pub struct SpeechService {
    fabric: Arc<RateLimitFabric>,
    transcription: Arc<dyn TranscriptionClient>,
    synthesis: Arc<dyn SynthesisClient>,
    store: Arc<dyn SessionStore>,
}

impl SpeechService {
    pub fn new(
        fabric: Arc<RateLimitFabric>,
        transcription: Arc<dyn TranscriptionClient>,
        synthesis: Arc<dyn SynthesisClient>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self { fabric, transcription, synthesis, store }
    }

    /// Queue a batch transcription. Returns the task id to poll.
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    pub async fn submit_batch(
        &self,
        audio: Vec<u8>,
        language: Option<String>,
        session_id: Option<String>,
    ) -> Result<String> {
        let mut task = SpeechTask::new(TaskType::BatchTranscription, session_id);
        task.progress = serde_json::json!({ "stage": "queued" });
        self.store.put_task(&task).await?;
        let task_id = task.task_id.clone();
        info!(task_id = %task_id, "batch transcription queued");

        let fabric = self.fabric.clone();
        let transcription = self.transcription.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let _slot = match fabric.acquire(Provider::BatchTranscription).await {
                Ok(slot) => slot,
                Err(e) => {
                    task.fail(e.to_string());
                    if let Err(e) = store.put_task(&task).await {
                        warn!(task_id = %task.task_id, error = %e, "could not record task failure");
                    }
                    return;
                }
            };

            task.progress = serde_json::json!({ "stage": "transcribing" });
            if let Err(e) = store.put_task(&task).await {
                warn!(task_id = %task.task_id, error = %e, "could not record task progress");
            }

            match transcription.transcribe(&audio, language.as_deref()).await {
                Ok(transcript) => {
                    info!(task_id = %task.task_id, chars = transcript.text.len(), "batch transcription done");
                    task.complete(TaskResult::Transcript { transcript });
                }
                Err(e) => {
                    warn!(task_id = %task.task_id, error = %e, "batch transcription failed");
                    task.fail(e.to_string());
                }
            }
            if let Err(e) = store.put_task(&task).await {
                warn!(task_id = %task.task_id, error = %e, "could not record task outcome");
            }
        });

        Ok(task_id)
    }

    /// Current state of a speech task.
    pub async fn task_status(&self, task_id: &str) -> Result<SpeechTask> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| SpeechError::TaskNotFound { id: task_id.to_string() })
    }

    /// Synchronous synthesis under the synthesis cap. The audio is
    /// returned directly; a task record keeps the books.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        speed: Option<f32>,
        session_id: Option<String>,
    ) -> Result<Vec<u8>> {
        let _slot = self.fabric.acquire(Provider::Synthesis).await?;

        let mut task = SpeechTask::new(TaskType::Synthesis, session_id);
        let result = self.synthesis.synthesize(text, voice, speed).await;

        match &result {
            Ok(audio) => {
                task.progress = serde_json::json!({ "bytes": audio.len() });
                task.complete(TaskResult::Audio {
                    handle: format!("synthesis/{}", task.task_id),
                });
            }
            Err(e) => task.fail(e.to_string()),
        }
        if let Err(e) = self.store.put_task(&task).await {
            warn!(task_id = %task.task_id, error = %e, "could not record synthesis task");
        }

        result
    }
}
