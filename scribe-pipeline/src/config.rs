//! Bootstrap configuration for scribe-pipeline
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (applied in `main`)
//! 2. Environment variables ([`PipelineConfig::apply_env_overrides`])
//! 3. TOML file (`~/.config/scribe/scribe-pipeline.toml` by default)
//! 4. Built-in defaults

use scribe_common::config::{default_data_folder, env_override, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::stage_runner::RunnerSettings;
use crate::services::TranscribeOptions;

pub const MODULE_NAME: &str = "scribe-pipeline";
pub const DEFAULT_PORT: u16 = 5731;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Uploaded audio is kept under this folder
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file for durable job records; in-memory store when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Largest accepted upload in MiB
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which transcription/diarization backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    Remote,
    Simulated,
}

impl FromStr for ModelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(ModelBackend::Remote),
            "simulated" => Ok(ModelBackend::Simulated),
            other => Err(format!("unknown model backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_backend")]
    pub backend: ModelBackend,

    /// Model server base URL (remote backend)
    #[serde(default = "default_models_url")]
    pub base_url: String,

    /// Per-request timeout for the model server
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Language hint; auto-detect when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Simulated backend latency per stage
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_models_url(),
            timeout_secs: default_timeout_secs(),
            language: None,
            simulated_latency_ms: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            database_path: None,
            max_upload_mb: default_max_upload_mb(),
            models: ModelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_storage_dir() -> PathBuf {
    default_data_folder().join("uploads")
}

fn default_max_upload_mb() -> usize {
    512
}

fn default_backend() -> ModelBackend {
    ModelBackend::Remote
}

fn default_models_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl PipelineConfig {
    /// Overlay `SCRIBE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override::<String>("SCRIBE_BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(port) = env_override("SCRIBE_PORT") {
            self.port = port;
        }
        if let Some(dir) = env_override::<PathBuf>("SCRIBE_STORAGE_DIR") {
            self.storage_dir = dir;
        }
        if let Some(path) = env_override::<PathBuf>("SCRIBE_DATABASE_PATH") {
            self.database_path = Some(path);
        }
        if let Some(backend) = env_override("SCRIBE_MODEL_BACKEND") {
            self.models.backend = backend;
        }
        if let Some(url) = env_override::<String>("SCRIBE_MODELS_URL") {
            self.models.base_url = url;
        }
        if let Some(level) = env_override::<String>("SCRIBE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.models.timeout_secs)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            storage_dir: self.storage_dir.clone(),
            transcribe_options: TranscribeOptions {
                language: self.models.language.clone(),
            },
        }
    }
}
