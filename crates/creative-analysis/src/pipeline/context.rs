use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::{AnalysisError, StageError};
use crate::media::MediaType;
use crate::pipeline::state::PipelineState;
use crate::stages::{
    AnnotationOutput, EmbeddingOutput, SegmentationOutput, StageInput, StageKind,
    TranscriptionOutput,
};
use crate::store::Creative;
use crate::worker::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    /// Not applicable to this media type.
    Skipped,
}

/// How one stage went.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub status: StageStatus,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Outputs accumulated across stages for one run.
#[derive(Debug, Clone, Default)]
pub struct ResultBundle {
    pub segmentation: Option<SegmentationOutput>,
    pub embedding: Option<EmbeddingOutput>,
    pub transcription: Option<TranscriptionOutput>,
    pub annotation: Option<AnnotationOutput>,
    pub reports: Vec<StageReport>,
}

impl ResultBundle {
    /// Full transcript, or the empty string when there is none.
    pub fn transcript(&self) -> &str {
        self.transcription
            .as_ref()
            .map(|t| t.transcript_full.as_str())
            .unwrap_or("")
    }

    pub fn report(&self, stage: StageKind) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    pub fn record<T>(&mut self, stage: StageKind, result: &Result<T, StageError>, duration: Duration) {
        let (status, error) = match result {
            Ok(_) => (StageStatus::Succeeded, None),
            Err(e) => (StageStatus::Failed, Some(e.to_string())),
        };
        self.reports.push(StageReport {
            stage,
            status,
            duration,
            error,
        });
    }

    pub fn record_skipped(&mut self, stage: StageKind) {
        self.reports.push(StageReport {
            stage,
            status: StageStatus::Skipped,
            duration: Duration::ZERO,
            error: None,
        });
    }
}

/// Mutable state of a single run, threaded through every step.
#[derive(Debug)]
pub struct PipelineContext {
    pub job: Job,
    pub state: PipelineState,
    /// Every state entered, in order, starting with `Started`.
    pub history: Vec<PipelineState>,
    pub creative: Option<Creative>,
    pub media_path: Option<PathBuf>,
    pub frames: Vec<PathBuf>,
    pub bundle: ResultBundle,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            state: PipelineState::Started,
            history: vec![PipelineState::Started],
            creative: None,
            media_path: None,
            frames: Vec::new(),
            bundle: ResultBundle::default(),
        }
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), AnalysisError> {
        if !self.state.can_advance_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Failed` unless the run already ended.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = PipelineState::Failed;
            self.history.push(PipelineState::Failed);
        }
    }

    pub fn media_type(&self) -> Option<MediaType> {
        self.creative.as_ref().map(|c| c.media_type)
    }

    /// Verifies that every input `stage` declares is present.
    pub fn check_ready(&self, stage: StageKind) -> Result<(), StageError> {
        match stage
            .requirements()
            .iter()
            .find(|input| !self.has_input(**input))
        {
            Some(missing) => Err(StageError::MissingInput {
                stage,
                input: missing.as_str(),
            }),
            None => Ok(()),
        }
    }

    fn has_input(&self, input: StageInput) -> bool {
        match input {
            StageInput::Frames => !self.frames.is_empty(),
            StageInput::MediaPath => self.media_path.is_some(),
            StageInput::Transcript => match self.media_type() {
                Some(MediaType::Image) => true,
                Some(MediaType::Video) => self.bundle.transcription.is_some(),
                None => false,
            },
            StageInput::Niche => self.creative.is_some(),
            StageInput::VisionFeatures => self.bundle.segmentation.is_some(),
        }
    }
}
