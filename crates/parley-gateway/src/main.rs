use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use parley_agent::http::{HttpLlmClient, HttpSearchClient};
use parley_agent::{AgentFactory, LlmClient, RetryPolicy, SearchClient};
use parley_core::config::ParleyConfig;
use parley_limits::RateLimitFabric;
use parley_session::{IdleSweeper, SessionRegistry};
use parley_speech::http::{HttpSynthesisClient, HttpTranscriptionClient};
use parley_speech::{
    SpeechService, StreamingTranscriptionCoordinator, SynthesisClient, TranscriptionClient,
};
use parley_store::{SessionStore, SqliteStore};

mod app;
mod auth;
mod http;
mod resume;
mod ws;

#[derive(Parser)]
#[command(name = "parley-gateway", about = "Interview session backend")]
struct Args {
    /// Path to parley.toml (default: ~/.parley/parley.toml).
    #[arg(long)]
    config: Option<String>,
    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley_gateway=info,parley_session=info,parley_speech=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = ParleyConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        ParleyConfig::default()
    });
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    // ── Capabilities ──────────────────────────────────────────────────────────
    let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::open(&config.database.path)?);
    let fabric = Arc::new(RateLimitFabric::new(&config.limits));

    let llm_config = config.providers.llm.clone().context("providers.llm must be configured")?;
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(&llm_config));
    let search_config = config
        .providers
        .search
        .clone()
        .context("providers.search must be configured")?;
    let search: Arc<dyn SearchClient> = Arc::new(HttpSearchClient::new(&search_config));
    let transcription_config = config
        .providers
        .transcription
        .clone()
        .context("providers.transcription must be configured")?;
    let transcription: Arc<dyn TranscriptionClient> =
        Arc::new(HttpTranscriptionClient::new(&transcription_config));
    let synthesis_config = config
        .providers
        .synthesis
        .clone()
        .context("providers.synthesis must be configured")?;
    let synthesis: Arc<dyn SynthesisClient> = Arc::new(HttpSynthesisClient::new(&synthesis_config));

    // ── Core services ─────────────────────────────────────────────────────────
    let agents = AgentFactory::new(llm, search, fabric.clone(), RetryPolicy::default());
    let registry = SessionRegistry::new(store.clone(), agents, config.session.clone());
    let speech = Arc::new(SpeechService::new(
        fabric.clone(),
        transcription.clone(),
        synthesis,
        store.clone(),
    ));
    let streams = Arc::new(StreamingTranscriptionCoordinator::new(
        fabric,
        transcription,
        store.clone(),
        &config.limits,
    ));
    let auth = auth::build_verifier(&config.gateway.auth)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = IdleSweeper::new(registry.clone(), &config.session);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        registry: registry.clone(),
        speech,
        streams,
        store,
        auth,
        resume: Arc::new(resume::PlainResumeExtractor),
        live_streams: dashmap::DashMap::new(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("parley gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Orderly shutdown: stop the sweeper, then flush every live session.
    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    registry.flush_all().await;
    info!("shutdown complete");

    Ok(())
}
