use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::remote::{inline_frames, InlineFile, RemoteInference};
use super::{SegmentationOutput, Segmenter, StageKind};
use crate::error::StageError;
use crate::sanitize;

const HISTOGRAM_BINS: usize = 32;

/// Histogram distance (0..=1) above which consecutive frames start a new shot.
pub const DEFAULT_CUT_THRESHOLD: f32 = 0.4;

/// Local segmenter that counts shots from luminance-histogram cuts.
///
/// Masks and text regions need a segmentation model and are left empty.
pub struct ShotDetectSegmenter {
    threshold: f32,
}

impl ShotDetectSegmenter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for ShotDetectSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_CUT_THRESHOLD)
    }
}

#[async_trait]
impl Segmenter for ShotDetectSegmenter {
    async fn segment(&self, frames: &[PathBuf]) -> Result<SegmentationOutput, StageError> {
        if frames.is_empty() {
            return Err(StageError::MissingInput {
                stage: StageKind::Segmentation,
                input: "frames",
            });
        }

        let frames = frames.to_vec();
        let threshold = self.threshold;
        let num_shots = tokio::task::spawn_blocking(move || count_shots(&frames, threshold))
            .await
            .map_err(|e| StageError::Inference {
                stage: StageKind::Segmentation,
                reason: format!("shot detection task failed: {}", e),
            })??;

        debug!("Detected {} shots", num_shots);

        Ok(SegmentationOutput {
            num_shots,
            ..Default::default()
        })
    }
}

fn count_shots(frames: &[PathBuf], threshold: f32) -> Result<u32, StageError> {
    let mut shots = 1u32;
    let mut previous: Option<[f32; HISTOGRAM_BINS]> = None;

    for frame in frames {
        let current = luminance_histogram(frame)?;
        if let Some(prev) = previous {
            if histogram_distance(&prev, &current) > threshold {
                shots += 1;
            }
        }
        previous = Some(current);
    }

    Ok(shots)
}

fn luminance_histogram(path: &Path) -> Result<[f32; HISTOGRAM_BINS], StageError> {
    let img = image::open(path).map_err(|e| StageError::Inference {
        stage: StageKind::Segmentation,
        reason: format!("failed to decode {}: {}", sanitize::redact_path(path), e),
    })?;
    let luma = img.to_luma8();

    let mut bins = [0f32; HISTOGRAM_BINS];
    for pixel in luma.pixels() {
        let bin = usize::from(pixel.0[0]) * HISTOGRAM_BINS / 256;
        bins[bin] += 1.0;
    }

    let total = (luma.width() as f32 * luma.height() as f32).max(1.0);
    for b in bins.iter_mut() {
        *b /= total;
    }
    Ok(bins)
}

/// Half the L1 distance between two normalized histograms, in `[0, 1]`.
fn histogram_distance(a: &[f32; HISTOGRAM_BINS], b: &[f32; HISTOGRAM_BINS]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>() / 2.0
}

#[derive(Serialize)]
struct FramesRequest {
    frames: Vec<InlineFile>,
}

/// Segmentation served by a remote model endpoint.
pub struct RemoteSegmenter {
    remote: RemoteInference,
}

impl RemoteSegmenter {
    pub fn new(remote: RemoteInference) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Segmenter for RemoteSegmenter {
    async fn segment(&self, frames: &[PathBuf]) -> Result<SegmentationOutput, StageError> {
        let request = FramesRequest {
            frames: inline_frames(StageKind::Segmentation, frames).await?,
        };
        self.remote.call(StageKind::Segmentation, &request).await
    }
}
