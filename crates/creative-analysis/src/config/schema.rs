use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::stages::annotation::{DEFAULT_LLM_ENDPOINT, DEFAULT_LLM_MODEL};
use crate::stages::embedding::DEFAULT_EMBEDDING_MODEL;
use crate::worker::intake::AckPolicy;

/// Worker settings. Loaded from an optional JSON file, then overridden from
/// the environment (see [`crate::config::loader`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    pub project_id: String,
    pub dataset: String,
    pub bucket: String,
    pub subscription: String,
    /// Alternative Pub/Sub endpoint, e.g. the emulator.
    pub pubsub_endpoint: Option<String>,
    /// Alternative Cloud Storage endpoint.
    pub storage_endpoint: Option<String>,
    /// Serve blobs from this directory instead of Cloud Storage.
    pub blob_root: Option<PathBuf>,
    /// Where creative metadata and analytics rows live.
    pub metadata_backend: MetadataBackend,
    /// Alternative BigQuery endpoint.
    pub bigquery_endpoint: Option<String>,
    pub vector_index: String,
    pub vector_host: Option<String>,
    pub inference_endpoint: String,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub database_path: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub target_fps: f64,
    pub max_seconds: u32,
    pub embedding_dim: usize,
    pub embedding_model: String,
    pub stage_timeout_secs: u64,
    /// Upper bound on one media download.
    pub acquire_timeout_secs: u64,
    /// Upper bound on frame sampling for one creative.
    pub extract_timeout_secs: u64,
    /// Lease length requested while a job is running; renewed at half of it.
    pub ack_deadline_secs: u64,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub status_retries: u32,
    pub status_retry_backoff_ms: u64,
    pub ack_policy: AckPolicy,
    pub skip_completed: bool,
    pub segmenter: SegmenterBackend,
    pub log_format: LogFormat,
    /// Never read from or written to the config file.
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset: "creator_pulse".to_string(),
            bucket: "ltk-trending".to_string(),
            subscription: "creative-analysis-queue".to_string(),
            pubsub_endpoint: None,
            storage_endpoint: None,
            blob_root: None,
            metadata_backend: MetadataBackend::BigQuery,
            bigquery_endpoint: None,
            vector_index: "creative-embeddings".to_string(),
            vector_host: None,
            inference_endpoint: String::new(),
            llm_endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            database_path: None,
            scratch_dir: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            target_fps: 2.0,
            max_seconds: 10,
            embedding_dim: 512,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            stage_timeout_secs: 300,
            acquire_timeout_secs: 600,
            extract_timeout_secs: 300,
            ack_deadline_secs: 60,
            concurrency: 1,
            poll_interval_ms: 1000,
            status_retries: 3,
            status_retry_backoff_ms: 500,
            ack_policy: AckPolicy::Always,
            skip_completed: false,
            segmenter: SegmenterBackend::Local,
            log_format: LogFormat::Text,
            secrets: Secrets::default(),
        }
    }
}

/// Credentials resolved from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub pinecone_api_key: Option<SecretString>,
    pub google_access_token: Option<SecretString>,
    pub llm_api_key: Option<SecretString>,
    pub inference_api_key: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmenterBackend {
    /// Shot detection on decoded frames, no network.
    #[default]
    Local,
    Remote,
}

impl FromStr for SegmenterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SegmenterBackend::Local),
            "remote" => Ok(SegmenterBackend::Remote),
            other => Err(format!("expected 'local' or 'remote', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    BigQuery,
    /// Local SQLite file, for development and single-host runs.
    Sqlite,
}

impl FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bigquery" => Ok(MetadataBackend::BigQuery),
            "sqlite" => Ok(MetadataBackend::Sqlite),
            other => Err(format!("expected 'bigquery' or 'sqlite', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{}'", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}
