use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;

use parley_core::config::ParleyConfig;
use parley_session::SessionRegistry;
use parley_speech::{SpeechService, StreamingTranscriptionCoordinator};
use parley_store::SessionStore;

use crate::auth::AuthVerifier;
use crate::resume::ResumeExtractor;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub registry: Arc<SessionRegistry>,
    pub speech: Arc<SpeechService>,
    pub streams: Arc<StreamingTranscriptionCoordinator>,
    pub store: Arc<dyn SessionStore>,
    pub auth: Arc<dyn AuthVerifier>,
    pub resume: Arc<dyn ResumeExtractor>,
    /// Open WS streaming connections: conn_id -> task_id.
    pub live_streams: DashMap<String, String>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/sessions",
            post(crate::http::sessions::create_handler).get(crate::http::sessions::list_handler),
        )
        .route("/interview/start", post(crate::http::interview::start_handler))
        .route("/interview/message", post(crate::http::interview::message_handler))
        .route("/interview/end", post(crate::http::interview::end_handler))
        .route("/interview/reset", post(crate::http::interview::reset_handler))
        .route("/interview/ping", post(crate::http::interview::ping_handler))
        .route("/interview/cleanup", post(crate::http::interview::cleanup_handler))
        .route("/interview/history", get(crate::http::interview::history_handler))
        .route("/interview/stats", get(crate::http::interview::stats_handler))
        .route("/interview/feedback", get(crate::http::interview::feedback_handler))
        .route("/interview/summary", get(crate::http::interview::summary_handler))
        .route(
            "/interview/time-remaining",
            get(crate::http::interview::time_remaining_handler),
        )
        .route("/resume/upload", post(crate::http::upload::upload_handler))
        .route(
            "/speech/transcriptions",
            post(crate::http::speech::submit_transcription_handler),
        )
        .route(
            "/speech/transcriptions/{task_id}",
            get(crate::http::speech::transcription_status_handler),
        )
        .route("/speech/synthesize", post(crate::http::speech::synthesize_handler))
        .route("/speech/stream", get(crate::ws::stream_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use parley_agent::testing::{ScriptedLlm, StaticSearch};
    use parley_agent::{AgentFactory, RetryPolicy};
    use parley_core::config::LimitsConfig;
    use parley_core::types::Transcript;
    use parley_limits::RateLimitFabric;
    use parley_speech::{ProviderStream, SpeechError};
    use parley_store::SqliteStore;

    use crate::auth::HmacAuthVerifier;
    use crate::resume::PlainResumeExtractor;

    struct NullTranscription;

    #[async_trait]
    impl parley_speech::TranscriptionClient for NullTranscription {
        async fn transcribe(
            &self,
            _audio: &[u8],
            _language: Option<&str>,
        ) -> Result<Transcript, SpeechError> {
            Ok(Transcript { text: "hello".into(), confidence: 0.9, duration_secs: 1.0 })
        }

        async fn open_stream(
            &self,
            _language: Option<&str>,
        ) -> Result<ProviderStream, SpeechError> {
            let (frame_tx, _frame_rx) = tokio::sync::mpsc::channel(1);
            let (_event_tx, event_rx) = tokio::sync::mpsc::channel(1);
            Ok(ProviderStream { frames: frame_tx, events: event_rx })
        }
    }

    struct NullSynthesis;

    #[async_trait]
    impl parley_speech::SynthesisClient for NullSynthesis {
        async fn synthesize(
            &self,
            _text: &str,
            _voice: Option<&str>,
            _speed: Option<f32>,
        ) -> Result<Vec<u8>, SpeechError> {
            Ok(vec![1, 2, 3])
        }
    }

    fn router() -> Router {
        let config = parley_core::config::ParleyConfig::default();
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let fabric = Arc::new(RateLimitFabric::new(&LimitsConfig::default()));
        let llm = Arc::new(ScriptedLlm::new("Tell me about a recent project."));
        let agents = AgentFactory::new(
            llm,
            Arc::new(StaticSearch),
            fabric.clone(),
            RetryPolicy { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 2 },
        );
        let registry = SessionRegistry::new(store.clone(), agents, config.session.clone());
        let transcription: Arc<dyn parley_speech::TranscriptionClient> =
            Arc::new(NullTranscription);
        let speech = Arc::new(SpeechService::new(
            fabric.clone(),
            transcription.clone(),
            Arc::new(NullSynthesis),
            store.clone(),
        ));
        let streams = Arc::new(StreamingTranscriptionCoordinator::new(
            fabric,
            transcription,
            store.clone(),
            &config.limits,
        ));
        let state = Arc::new(AppState {
            config,
            registry,
            speech,
            streams,
            store,
            auth: Arc::new(HmacAuthVerifier::new("test-secret")),
            resume: Arc::new(PlainResumeExtractor),
            live_streams: DashMap::new(),
        });
        build_router(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn config_body() -> String {
        serde_json::json!({
            "target_role": "Software Engineer",
            "style": "formal",
            "difficulty": "medium",
            "duration_minutes": 5,
            "use_time_based": true,
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn create_start_message_flow() {
        let app = router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(config_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = body_json(response).await["session_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interview/start")
                    .header("x-session-id", &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["turn"]["response_type"], "introduction");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interview/message")
                    .header("x-session-id", &session_id)
                    .header("content-type", "application/json")
                    .body(Body::from("{\"message\": \"I build backends.\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/interview/history")
                    .header("x-session-id", &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["turns"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_session_header_is_validation_error() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/interview/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "validation-error");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/interview/history")
                    .header("x-session-id", "no-such-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "session-not-found");
    }

    #[tokio::test]
    async fn invalid_bearer_token_is_unauthenticated() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .header("authorization", "Bearer bogus")
                    .header("content-type", "application/json")
                    .body(Body::from(config_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn resume_upload_extracts_text() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/resume/upload")
                    .header("content-type", "text/plain")
                    .header("x-filename", "resume.txt")
                    .body(Body::from("Five years of Rust."))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["filename"], "resume.txt");
        assert_eq!(json["extracted_text"], "Five years of Rust.");
    }

    #[tokio::test]
    async fn batch_transcription_roundtrip() {
        let app = router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/speech/transcriptions?language=en")
                    .header("content-type", "application/octet-stream")
                    .body(Body::from(vec![0u8; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task_id = body_json(response).await["task_id"].as_str().unwrap().to_string();

        // The background worker resolves quickly against the null provider.
        let mut status = String::new();
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/speech/transcriptions/{task_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let json = body_json(response).await;
            status = json["status"].as_str().unwrap().to_string();
            if status != "processing" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn send_after_end_is_state_invalid() {
        let app = router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interview/start")
                    .header("content-type", "application/json")
                    .body(Body::from(config_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session_id = body_json(response).await["session_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interview/end")
                    .header("x-session-id", &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interview/message")
                    .header("x-session-id", &session_id)
                    .header("content-type", "application/json")
                    .body(Body::from("{\"message\": \"too late\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "session-state-invalid");
    }
}
