use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18970;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Hard cap per uploaded audio/resume body.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
/// Hard cap per inbound streaming audio frame.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub session: SessionTimingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            session: SessionTimingConfig::default(),
            limits: LimitsConfig::default(),
            providers: ProvidersConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// HMAC signing secret for bearer tokens (`hmac` mode).
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// HMAC-SHA256 signed bearer tokens; requests without a token are
    /// treated as anonymous.
    #[default]
    Hmac,
    /// No verification — every request is anonymous. Trusted networks only.
    None,
}

/// Idle-timeout and background-task budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimingConfig {
    #[serde(default = "default_idle_budget_minutes")]
    pub idle_budget_minutes: u64,
    #[serde(default = "default_warning_threshold_minutes")]
    pub warning_threshold_minutes: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_summary_budget_seconds")]
    pub summary_budget_seconds: u64,
    #[serde(default = "default_grading_budget_seconds")]
    pub grading_budget_seconds: u64,
    #[serde(default = "default_grading_max_attempts")]
    pub grading_max_attempts: u32,
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            idle_budget_minutes: default_idle_budget_minutes(),
            warning_threshold_minutes: default_warning_threshold_minutes(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            summary_budget_seconds: default_summary_budget_seconds(),
            grading_budget_seconds: default_grading_budget_seconds(),
            grading_max_attempts: default_grading_max_attempts(),
        }
    }
}

/// Per-provider concurrency caps. Defaults align with current provider
/// agreements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_batch_transcription_cap")]
    pub batch_transcription: usize,
    #[serde(default = "default_streaming_transcription_cap")]
    pub streaming_transcription: usize,
    #[serde(default = "default_synthesis_cap")]
    pub synthesis: usize,
    #[serde(default = "default_llm_cap")]
    pub llm: usize,
    /// How long a blocking acquire may wait before capacity-exhausted.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Shorter budget for streaming-slot acquisition at connection open.
    #[serde(default = "default_stream_acquire_timeout_ms")]
    pub stream_acquire_timeout_ms: u64,
    /// Idle limit on an open streaming connection.
    #[serde(default = "default_stream_idle_seconds")]
    pub stream_idle_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            batch_transcription: default_batch_transcription_cap(),
            streaming_transcription: default_streaming_transcription_cap(),
            synthesis: default_synthesis_cap(),
            llm: default_llm_cap(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            stream_acquire_timeout_ms: default_stream_acquire_timeout_ms(),
            stream_idle_seconds: default_stream_idle_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub llm: Option<LlmProviderConfig>,
    pub search: Option<SearchProviderConfig>,
    pub transcription: Option<TranscriptionProviderConfig>,
    pub synthesis: Option<SynthesisProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub api_key: String,
    /// Base URL without trailing slash.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Path appended to base_url for chat completions.
    #[serde(default = "default_llm_chat_path")]
    pub chat_path: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisProviderConfig {
    pub api_key: String,
    pub base_url: String,
    /// Default voice when the request does not name one.
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_idle_budget_minutes() -> u64 {
    15
}
fn default_warning_threshold_minutes() -> u64 {
    2
}
fn default_sweep_interval_seconds() -> u64 {
    60
}
fn default_summary_budget_seconds() -> u64 {
    120
}
fn default_grading_budget_seconds() -> u64 {
    30
}
fn default_grading_max_attempts() -> u32 {
    3
}
fn default_batch_transcription_cap() -> usize {
    5
}
fn default_streaming_transcription_cap() -> usize {
    10
}
fn default_synthesis_cap() -> usize {
    26
}
fn default_llm_cap() -> usize {
    8
}
fn default_acquire_timeout_ms() -> u64 {
    10_000
}
fn default_stream_acquire_timeout_ms() -> u64 {
    2_000
}
fn default_stream_idle_seconds() -> u64 {
    300
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_llm_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.db", home)
}

impl ParleyConfig {
    /// Load config from a TOML file with PARLEY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. PARLEY_CONFIG env var
    ///   3. ~/.parley/parley.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("PARLEY_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: ParleyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARLEY_").split("_"))
            .extract()
            .map_err(|e| crate::error::ParleyError::Validation(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.toml", home)
}
