use std::time::Duration;

use crate::config::WorkerConfig;
use crate::media::SamplingParams;
use crate::vector::CREATIVES_NAMESPACE;

/// The orchestrator's view of the worker settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sampling: SamplingParams,
    pub embedding_dim: usize,
    /// Upper bound for a single stage invocation.
    pub stage_timeout: Duration,
    /// Upper bound for downloading the media object.
    pub acquire_timeout: Duration,
    /// Upper bound for frame sampling.
    pub extract_timeout: Duration,
    pub status_retries: u32,
    pub status_retry_backoff: Duration,
    /// Skip creatives already marked `completed` unless the job forces a
    /// recompute.
    pub skip_completed: bool,
    pub vector_namespace: String,
}

impl PipelineConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            sampling: SamplingParams::new(config.target_fps, config.max_seconds),
            embedding_dim: config.embedding_dim,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            status_retries: config.status_retries,
            status_retry_backoff: Duration::from_millis(config.status_retry_backoff_ms),
            skip_completed: config.skip_completed,
            vector_namespace: CREATIVES_NAMESPACE.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
