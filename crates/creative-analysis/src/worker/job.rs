use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::error::{AnalysisError, ErrorKind};
use crate::pipeline::state::PipelineState;

/// Why a message body could not be turned into a job.
#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Payload has no non-empty string 'creative_id'")]
    MissingCreativeId,

    #[error("Field '{0}' has the wrong type")]
    InvalidField(&'static str),
}

/// Inbound message body: `{"creative_id": "...", "force_recompute": false}`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub creative_id: String,
    pub force_recompute: bool,
}

impl JobRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let creative_id = object
            .get("creative_id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingCreativeId)?;

        let force_recompute = match object.get("force_recompute") {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => return Err(DecodeError::InvalidField("force_recompute")),
        };

        Ok(Self {
            creative_id: creative_id.to_string(),
            force_recompute,
        })
    }
}

/// One execution of the pipeline for one creative.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: Uuid,
    pub creative_id: String,
    pub force_recompute: bool,
    /// Delivery attempt reported by the transport, if any.
    pub delivery_attempt: Option<u32>,
}

impl Job {
    pub fn new(creative_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            creative_id: creative_id.into(),
            force_recompute: false,
            delivery_attempt: None,
        }
    }

    pub fn from_request(request: JobRequest, delivery_attempt: Option<u32>) -> Self {
        Self {
            force_recompute: request.force_recompute,
            delivery_attempt,
            ..Self::new(request.creative_id)
        }
    }

    pub fn with_force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// Already analyzed; nothing was recomputed.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: Uuid,
    pub creative_id: String,
    pub outcome: JobOutcome,
    /// State the run ended in.
    pub final_state: PipelineState,
    /// State the run was in when it failed.
    pub failed_in: Option<PipelineState>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Whether the terminal status write reached the metadata store.
    pub status_recorded: bool,
    pub duration: Duration,
}

impl JobResult {
    pub fn completed(job: &Job, duration: Duration) -> Self {
        Self {
            job_id: job.job_id,
            creative_id: job.creative_id.clone(),
            outcome: JobOutcome::Completed,
            final_state: PipelineState::Done,
            failed_in: None,
            error: None,
            error_kind: None,
            status_recorded: true,
            duration,
        }
    }

    pub fn skipped(job: &Job, duration: Duration) -> Self {
        Self {
            outcome: JobOutcome::Skipped,
            ..Self::completed(job, duration)
        }
    }

    pub fn failed(
        job: &Job,
        failed_in: PipelineState,
        error: &AnalysisError,
        status_recorded: bool,
        duration: Duration,
    ) -> Self {
        Self {
            job_id: job.job_id,
            creative_id: job.creative_id.clone(),
            outcome: JobOutcome::Failed,
            final_state: PipelineState::Failed,
            failed_in: Some(failed_in),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            status_recorded,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed | JobOutcome::Skipped)
    }

    /// Failed with an error class worth handing back to the queue.
    pub fn is_transient_failure(&self) -> bool {
        self.outcome == JobOutcome::Failed
            && self.error_kind.map(|k| k.is_transient()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal() {
        let request = JobRequest::decode(br#"{"creative_id": "c-1"}"#).unwrap();
        assert_eq!(request.creative_id, "c-1");
        assert!(!request.force_recompute);
    }

    #[test]
    fn test_decode_force_recompute() {
        let request =
            JobRequest::decode(br#"{"creative_id": "c-1", "force_recompute": true}"#).unwrap();
        assert!(request.force_recompute);

        let request =
            JobRequest::decode(br#"{"creative_id": "c-1", "force_recompute": null}"#).unwrap();
        assert!(!request.force_recompute);
    }

    #[test]
    fn test_decode_trims_creative_id() {
        let request = JobRequest::decode(br#"{"creative_id": "  c-1\n"}"#).unwrap();
        assert_eq!(request.creative_id, "c-1");
        assert_eq!(
            JobRequest::decode(br#"{"creative_id": "   "}"#),
            Err(DecodeError::MissingCreativeId)
        );
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let request =
            JobRequest::decode(br#"{"creative_id": "c-1", "source": "backfill"}"#).unwrap();
        assert_eq!(request.creative_id, "c-1");
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            JobRequest::decode(b"{creative_id: c-1"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            JobRequest::decode(b""),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_decode_not_object() {
        assert_eq!(
            JobRequest::decode(br#"["c-1"]"#),
            Err(DecodeError::NotAnObject)
        );
    }

    #[test]
    fn test_decode_missing_or_empty_creative_id() {
        for body in [
            br#"{}"#.as_slice(),
            br#"{"creative_id": ""}"#.as_slice(),
            br#"{"creative_id": "   "}"#.as_slice(),
            br#"{"creative_id": 42}"#.as_slice(),
        ] {
            assert_eq!(
                JobRequest::decode(body),
                Err(DecodeError::MissingCreativeId)
            );
        }
    }

    #[test]
    fn test_decode_wrong_force_type() {
        assert_eq!(
            JobRequest::decode(br#"{"creative_id": "c-1", "force_recompute": "yes"}"#),
            Err(DecodeError::InvalidField("force_recompute"))
        );
    }

    #[test]
    fn test_job_from_request() {
        let request = JobRequest {
            creative_id: "c-1".to_string(),
            force_recompute: true,
        };
        let job = Job::from_request(request, Some(3));
        assert_eq!(job.creative_id, "c-1");
        assert!(job.force_recompute);
        assert_eq!(job.delivery_attempt, Some(3));
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(Job::new("c-1").job_id, Job::new("c-1").job_id);
    }

    #[test]
    fn test_result_success() {
        let job = Job::new("c-1");
        let result = JobResult::completed(&job, Duration::from_secs(1));
        assert!(result.is_success());
        assert_eq!(result.final_state, PipelineState::Done);
        assert!(!result.is_transient_failure());

        let skipped = JobResult::skipped(&job, Duration::ZERO);
        assert!(skipped.is_success());
        assert_eq!(skipped.outcome, JobOutcome::Skipped);
    }

    #[test]
    fn test_result_failure_classification() {
        let job = Job::new("c-2");
        let transfer = AnalysisError::Transfer {
            uri: "gs://b/a.mp4".to_string(),
            reason: "reset".to_string(),
        };
        let result = JobResult::failed(
            &job,
            PipelineState::MetadataFetched,
            &transfer,
            true,
            Duration::ZERO,
        );
        assert!(!result.is_success());
        assert!(result.is_transient_failure());
        assert_eq!(result.failed_in, Some(PipelineState::MetadataFetched));

        let missing = AnalysisError::NotFound("gs://b/missing.mp4".to_string());
        let result = JobResult::failed(
            &job,
            PipelineState::MetadataFetched,
            &missing,
            true,
            Duration::ZERO,
        );
        assert!(!result.is_transient_failure());
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }
}
