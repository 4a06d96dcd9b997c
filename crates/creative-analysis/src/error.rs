use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::state::PipelineState;
use crate::stages::StageKind;

/// Every failure a pipeline run can end with.
///
/// Errors are caught once at the top of the orchestrator and converted into a
/// `failed` status write; they never propagate past a single job.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transfer failed for '{uri}': {reason}")]
    Transfer { uri: String, reason: String },

    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Scratch area error for '{path}': {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::NotFound(_) => ErrorKind::NotFound,
            AnalysisError::Transfer { .. } => ErrorKind::Transfer,
            AnalysisError::Extraction(_) => ErrorKind::Extraction,
            AnalysisError::Stage(_) => ErrorKind::Stage,
            AnalysisError::Publish(_) => ErrorKind::Publish,
            AnalysisError::Metadata(_) => ErrorKind::Metadata,
            AnalysisError::Scratch { .. } => ErrorKind::Scratch,
            AnalysisError::InvalidTransition { .. } => ErrorKind::Internal,
        }
    }

    /// Only network/blob I/O faults are worth handing back to the queue.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Coarse error class used for logging and acknowledgment decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Transfer,
    Extraction,
    Stage,
    Publish,
    Metadata,
    Scratch,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Stage => "stage",
            ErrorKind::Publish => "publish",
            ErrorKind::Metadata => "metadata",
            ErrorKind::Scratch => "scratch",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transfer)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} is missing required input: {input}")]
    MissingInput {
        stage: StageKind,
        input: &'static str,
    },

    #[error("{stage} inference failed: {reason}")]
    Inference { stage: StageKind, reason: String },

    #[error("{stage} returned malformed output: {reason}")]
    MalformedOutput { stage: StageKind, reason: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: StageKind, seconds: u64 },
}

impl StageError {
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::MissingInput { stage, .. }
            | StageError::Inference { stage, .. }
            | StageError::MalformedOutput { stage, .. }
            | StageError::Timeout { stage, .. } => *stage,
        }
    }
}

/// Failure of one of the two independent result writes.
///
/// Neither write is rolled back: a vector failure after a successful analytics
/// write leaves analytics rows without a vector entry until the job reruns.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Analytics write failed: {0}")]
    Analytics(String),

    #[error("Vector index write failed after analytics write succeeded: {0}")]
    VectorPartial(String),
}

impl PublishError {
    pub fn is_partial(&self) -> bool {
        matches!(self, PublishError::VectorPartial(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Required setting '{name}' is not set")]
    Missing { name: String },

    #[error("Invalid value '{value}' for '{name}': {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transfer_is_transient() {
        let transfer = AnalysisError::Transfer {
            uri: "gs://bucket/a.mp4".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(transfer.is_transient());
        assert!(!AnalysisError::NotFound("c-1".to_string()).is_transient());
        assert!(!AnalysisError::Extraction("exit 1".to_string()).is_transient());
        assert!(!AnalysisError::Publish(PublishError::VectorPartial("503".to_string()))
            .is_transient());
    }

    #[test]
    fn test_stage_error_reports_stage() {
        let err = StageError::Timeout {
            stage: StageKind::Transcription,
            seconds: 30,
        };
        assert_eq!(err.stage(), StageKind::Transcription);
        assert_eq!(err.to_string(), "transcription timed out after 30s");

        let wrapped: AnalysisError = err.into();
        assert_eq!(wrapped.kind(), ErrorKind::Stage);
    }

    #[test]
    fn test_publish_partial_flag() {
        assert!(PublishError::VectorPartial("x".to_string()).is_partial());
        assert!(!PublishError::Analytics("x".to_string()).is_partial());
    }
}
