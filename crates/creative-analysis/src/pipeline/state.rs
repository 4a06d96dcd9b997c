use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a run is in the analysis state machine.
///
/// The happy path is `Started → MetadataFetched → MediaReady → FramesReady →
/// VisionDone → TranscriptDone → Annotated → Published → Done`, where
/// `TranscriptDone` is skipped for images. `Failed` is reachable from every
/// non-terminal state. `MetadataFetched → Done` is the short-circuit taken
/// when an already-completed creative is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Started,
    MetadataFetched,
    MediaReady,
    FramesReady,
    VisionDone,
    TranscriptDone,
    Annotated,
    Published,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Started => "started",
            PipelineState::MetadataFetched => "metadata_fetched",
            PipelineState::MediaReady => "media_ready",
            PipelineState::FramesReady => "frames_ready",
            PipelineState::VisionDone => "vision_done",
            PipelineState::TranscriptDone => "transcript_done",
            PipelineState::Annotated => "annotated",
            PipelineState::Published => "published",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }

        matches!(
            (self, next),
            (Started, MetadataFetched)
                | (MetadataFetched, MediaReady)
                | (MetadataFetched, Done)
                | (MediaReady, FramesReady)
                | (FramesReady, VisionDone)
                | (VisionDone, TranscriptDone)
                | (VisionDone, Annotated)
                | (TranscriptDone, Annotated)
                | (Annotated, Published)
                | (Published, Done)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
