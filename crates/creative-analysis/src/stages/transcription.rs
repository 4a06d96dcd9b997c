use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::remote::{InlineFile, RemoteInference};
use super::{StageKind, Transcriber, TranscriptSegment, TranscriptionOutput};
use crate::error::StageError;

/// Length of the leading transcript window used for hook analysis.
pub const OPENING_WINDOW_SECS: f64 = 5.0;

impl TranscriptionOutput {
    /// Fills `transcript_first_5s` from timed segments when the backend left
    /// it empty.
    pub fn with_opening_window(mut self) -> Self {
        if self.transcript_first_5s.trim().is_empty() && !self.segments.is_empty() {
            self.transcript_first_5s = text_before(&self.segments, OPENING_WINDOW_SECS);
        }
        self
    }
}

/// Joins the text of segments that start before `secs`.
pub fn text_before(segments: &[TranscriptSegment], secs: f64) -> String {
    segments
        .iter()
        .filter(|s| s.start < secs)
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize)]
struct TranscriptionRequest {
    media: InlineFile,
}

/// Speech-to-text served by a remote Whisper-style endpoint.
pub struct RemoteTranscriber {
    remote: RemoteInference,
}

impl RemoteTranscriber {
    pub fn new(remote: RemoteInference) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Transcriber for RemoteTranscriber {
    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptionOutput, StageError> {
        let request = TranscriptionRequest {
            media: InlineFile::read(StageKind::Transcription, media_path).await?,
        };
        let output: TranscriptionOutput =
            self.remote.call(StageKind::Transcription, &request).await?;
        Ok(output.with_opening_window())
    }
}
