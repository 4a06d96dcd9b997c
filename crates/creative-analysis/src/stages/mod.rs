//! Analysis stages.
//!
//! Each stage is a capability trait so backends can be swapped without
//! touching orchestration. `StageKind` names the stages and declares what
//! each needs from earlier steps; the orchestrator checks those inputs
//! against the result bundle before invoking a stage.

pub mod annotation;
pub mod embedding;
pub mod remote;
pub mod segmentation;
pub mod transcription;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{SegmenterBackend, WorkerConfig};
use crate::error::StageError;
use crate::media::MediaType;

pub use annotation::LlmAnnotator;
pub use embedding::RemoteEmbedder;
pub use remote::RemoteInference;
pub use segmentation::{RemoteSegmenter, ShotDetectSegmenter};
pub use transcription::RemoteTranscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Segmentation,
    Embedding,
    Transcription,
    Annotation,
}

/// An input a stage needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    /// The sampled frame sequence.
    Frames,
    /// The downloaded source asset.
    MediaPath,
    /// Transcript text; satisfied by the empty string for images.
    Transcript,
    /// The creative's niche from metadata.
    Niche,
    /// Segmentation output plus embedding tags.
    VisionFeatures,
}

impl StageInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageInput::Frames => "frames",
            StageInput::MediaPath => "media_path",
            StageInput::Transcript => "transcript",
            StageInput::Niche => "niche",
            StageInput::VisionFeatures => "vision_features",
        }
    }
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Segmentation => "segmentation",
            StageKind::Embedding => "embedding",
            StageKind::Transcription => "transcription",
            StageKind::Annotation => "annotation",
        }
    }

    pub fn requirements(&self) -> &'static [StageInput] {
        match self {
            StageKind::Segmentation | StageKind::Embedding => &[StageInput::Frames],
            StageKind::Transcription => &[StageInput::MediaPath],
            StageKind::Annotation => &[
                StageInput::Transcript,
                StageInput::Niche,
                StageInput::VisionFeatures,
            ],
        }
    }

    /// Whether the stage runs at all for this media type.
    pub fn applies_to(&self, media_type: MediaType) -> bool {
        match self {
            StageKind::Transcription => media_type == MediaType::Video,
            _ => true,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationOutput {
    pub num_shots: u32,
    #[serde(default)]
    pub product_masks: Vec<serde_json::Value>,
    #[serde(default)]
    pub face_masks: Vec<serde_json::Value>,
    #[serde(default)]
    pub text_regions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    #[serde(default)]
    pub creative_embedding: Vec<f32>,
    #[serde(default)]
    pub frame_embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub scene_tags: Vec<String>,
    #[serde(default)]
    pub style_tags: Vec<String>,
}

impl EmbeddingOutput {
    /// Checks the creative-level vector, mean-pooling frame vectors first
    /// when the backend only returned per-frame embeddings.
    pub fn validated(mut self, dimension: usize) -> Result<Self, StageError> {
        let malformed = |reason: String| StageError::MalformedOutput {
            stage: StageKind::Embedding,
            reason,
        };

        for (i, frame) in self.frame_embeddings.iter().enumerate() {
            if frame.len() != dimension {
                return Err(malformed(format!(
                    "frame embedding {} has dimension {}, expected {}",
                    i,
                    frame.len(),
                    dimension
                )));
            }
        }

        if self.creative_embedding.is_empty() && !self.frame_embeddings.is_empty() {
            self.creative_embedding = mean_pool(&self.frame_embeddings, dimension);
        }

        if self.creative_embedding.is_empty() {
            return Err(malformed("empty creative embedding".to_string()));
        }
        if self.creative_embedding.len() != dimension {
            return Err(malformed(format!(
                "creative embedding has dimension {}, expected {}",
                self.creative_embedding.len(),
                dimension
            )));
        }
        if !self.creative_embedding.iter().all(|v| v.is_finite()) {
            return Err(malformed("creative embedding has non-finite values".to_string()));
        }

        Ok(self)
    }
}

fn mean_pool(vectors: &[Vec<f32>], dimension: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dimension];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    sum.into_iter().map(|x| x / n).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    #[serde(default)]
    pub transcript_full: String,
    #[serde(default)]
    pub transcript_first_5s: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationOutput {
    pub hook_type: String,
    pub hook_text: String,
    pub hook_strength_score: f64,
    pub cta_type: String,
    pub cta_clarity_score: f64,
    pub sentiment_overall: String,
    pub pacing_style: String,
    pub virality_score: f64,
}

impl AnnotationOutput {
    /// Scores must be finite and within `[0, 1]`.
    pub fn validate(&self) -> Result<(), StageError> {
        for (name, score) in [
            ("hook_strength_score", self.hook_strength_score),
            ("cta_clarity_score", self.cta_clarity_score),
            ("virality_score", self.virality_score),
        ] {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(StageError::MalformedOutput {
                    stage: StageKind::Annotation,
                    reason: format!("{} out of range: {}", name, score),
                });
            }
        }
        Ok(())
    }
}

/// Visual signals handed to annotation and written to analytics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionFeatures {
    pub num_shots: u32,
    pub product_masks: Vec<serde_json::Value>,
    pub face_masks: Vec<serde_json::Value>,
    pub text_regions: Vec<serde_json::Value>,
    pub scene_tags: Vec<String>,
    pub style_tags: Vec<String>,
    pub embedding_model: String,
}

impl VisionFeatures {
    pub fn from_outputs(
        segmentation: &SegmentationOutput,
        embedding: Option<&EmbeddingOutput>,
        embedding_model: &str,
    ) -> Self {
        Self {
            num_shots: segmentation.num_shots,
            product_masks: segmentation.product_masks.clone(),
            face_masks: segmentation.face_masks.clone(),
            text_regions: segmentation.text_regions.clone(),
            scene_tags: embedding.map(|e| e.scene_tags.clone()).unwrap_or_default(),
            style_tags: embedding.map(|e| e.style_tags.clone()).unwrap_or_default(),
            embedding_model: embedding_model.to_string(),
        }
    }
}

/// Everything the annotation stage reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRequest {
    pub transcript: String,
    pub niche: String,
    pub vision: VisionFeatures,
}

/// Identifies which model and prompt produced an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationProvenance {
    pub model_name: String,
    pub prompt_version: String,
    pub annotation_version: String,
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, frames: &[PathBuf]) -> Result<SegmentationOutput, StageError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model, recorded with the features.
    fn model_id(&self) -> &str;

    async fn embed(&self, frames: &[PathBuf]) -> Result<EmbeddingOutput, StageError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptionOutput, StageError>;
}

#[async_trait]
pub trait Annotator: Send + Sync {
    fn provenance(&self) -> AnnotationProvenance;

    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationOutput, StageError>;
}

/// The four stage backends a pipeline runs with.
#[derive(Clone)]
pub struct StageSet {
    pub segmenter: Arc<dyn Segmenter>,
    pub embedder: Arc<dyn Embedder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub annotator: Arc<dyn Annotator>,
}

impl StageSet {
    /// Remote embedding, transcription and annotation backends, plus the
    /// configured segmenter.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.stage_timeout_secs);
        let remote = RemoteInference::new(
            config.inference_endpoint.clone(),
            config.secrets.inference_api_key.clone(),
            timeout,
        )?;

        let segmenter: Arc<dyn Segmenter> = match config.segmenter {
            SegmenterBackend::Local => Arc::new(ShotDetectSegmenter::default()),
            SegmenterBackend::Remote => Arc::new(RemoteSegmenter::new(remote.clone())),
        };
        let annotator = LlmAnnotator::new(
            config.llm_endpoint.clone(),
            config.llm_model.clone(),
            config.secrets.llm_api_key.clone(),
            timeout,
        )?;

        Ok(Self {
            segmenter,
            embedder: Arc::new(RemoteEmbedder::new(
                remote.clone(),
                config.embedding_model.clone(),
            )),
            transcriber: Arc::new(RemoteTranscriber::new(remote)),
            annotator: Arc::new(annotator),
        })
    }
}
