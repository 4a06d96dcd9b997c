pub mod bigquery;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod stages;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod vector;
pub mod worker;

pub use config::{load_from_env, WorkerConfig};
pub use error::{AnalysisError, ConfigError, ErrorKind, PublishError, Result, StageError};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig, PipelineContext, PipelineState};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use store::{AnalysisStatus, AnalyticsStore, Creative, MetadataStore, StoreError};
pub use worker::{AckPolicy, IntakeLoop, Job, JobResult};
