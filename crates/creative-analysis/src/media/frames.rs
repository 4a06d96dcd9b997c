//! Frame sampling for analysis stages.
//!
//! Videos are decoded into still frames at a fixed rate over a leading time
//! window; images are their own single-frame set. Frame files are named
//! `frame_00001.jpg`, `frame_00002.jpg`, ... so lexical order is temporal order.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info_span, Instrument};
use walkdir::WalkDir;

use crate::error::AnalysisError;
use crate::sanitize;

use super::MediaType;

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "jpg";
const MAX_STDERR_LEN: usize = 400;

/// Sampling rate and leading window for video frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub target_fps: f64,
    pub max_seconds: u32,
}

impl SamplingParams {
    pub fn new(target_fps: f64, max_seconds: u32) -> Self {
        Self {
            target_fps,
            max_seconds,
        }
    }

    /// Upper bound on frames that fall inside the sampling window.
    pub fn max_frames(&self) -> usize {
        (self.target_fps * f64::from(self.max_seconds)).ceil() as usize
    }
}

impl Default for SamplingParams {
    /// Two frames per second over the first ten seconds, where short-form hooks live.
    fn default() -> Self {
        Self::new(2.0, 10)
    }
}

/// Decodes a video into numbered JPEG frames inside `output_dir`.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(
        &self,
        media_path: &Path,
        output_dir: &Path,
        params: SamplingParams,
    ) -> Result<(), AnalysisError>;
}

/// Decodes frames by shelling out to `ffmpeg`.
pub struct FfmpegDecoder {
    binary: PathBuf,
}

impl FfmpegDecoder {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(media_path: &Path, output_dir: &Path, params: SamplingParams) -> Vec<String> {
        vec![
            "-nostdin".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            media_path.display().to_string(),
            "-vf".to_string(),
            format!("fps={}", params.target_fps),
            "-t".to_string(),
            params.max_seconds.to_string(),
            output_dir
                .join(format!("{}%05d.{}", FRAME_PREFIX, FRAME_EXTENSION))
                .display()
                .to_string(),
        ]
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameDecoder for FfmpegDecoder {
    async fn decode(
        &self,
        media_path: &Path,
        output_dir: &Path,
        params: SamplingParams,
    ) -> Result<(), AnalysisError> {
        let output = Command::new(&self.binary)
            .args(Self::args(media_path, output_dir, params))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AnalysisError::Extraction(format!(
                    "failed to spawn '{}': {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::Extraction(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                sanitize::truncate_body(stderr.trim(), MAX_STDERR_LEN)
            )));
        }

        Ok(())
    }
}

pub struct FrameSampler {
    decoder: Arc<dyn FrameDecoder>,
}

impl FrameSampler {
    pub fn new(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self { decoder }
    }

    /// Produces the ordered frame set for one asset.
    ///
    /// `frames_dir` must be an empty, job-owned directory; it is only touched
    /// for videos.
    pub async fn sample(
        &self,
        media_path: &Path,
        media_type: MediaType,
        params: SamplingParams,
        frames_dir: &Path,
    ) -> Result<Vec<PathBuf>, AnalysisError> {
        match media_type {
            MediaType::Image => Ok(vec![media_path.to_path_buf()]),
            MediaType::Video => {
                let span = info_span!("sample_frames",
                    media = %sanitize::redact_path(media_path),
                    fps = params.target_fps,
                    max_seconds = params.max_seconds,
                );
                self.sample_video(media_path, params, frames_dir)
                    .instrument(span)
                    .await
            }
        }
    }

    async fn sample_video(
        &self,
        media_path: &Path,
        params: SamplingParams,
        frames_dir: &Path,
    ) -> Result<Vec<PathBuf>, AnalysisError> {
        self.decoder.decode(media_path, frames_dir, params).await?;

        let mut frames = list_frames(frames_dir)?;
        if frames.is_empty() {
            return Err(AnalysisError::Extraction(format!(
                "decoder produced no frames for {}",
                sanitize::redact_path(media_path)
            )));
        }

        // The fps filter can emit one frame past the -t boundary.
        let cap = params.max_frames();
        if frames.len() > cap {
            debug!("Dropping {} frames past the window", frames.len() - cap);
            frames.truncate(cap);
        }

        debug!("Sampled {} frames", frames.len());
        Ok(frames)
    }
}

/// Lists `frame_*.jpg` files in `dir`, sorted by name.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut frames = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            AnalysisError::Extraction(format!("failed to list frames: {}", e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(FRAME_PREFIX))
            .unwrap_or(false)
            && path.extension().and_then(|e| e.to_str()) == Some(FRAME_EXTENSION);

        if is_frame {
            frames.push(path.to_path_buf());
        }
    }

    frames.sort();
    Ok(frames)
}
