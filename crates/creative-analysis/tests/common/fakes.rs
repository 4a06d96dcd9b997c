//! In-memory stand-ins for the pipeline's external systems.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use creative_analysis::error::{AnalysisError, StageError};
use creative_analysis::media::{FrameDecoder, SamplingParams};
use creative_analysis::stages::{
    AnnotationOutput, AnnotationProvenance, AnnotationRequest, Annotator, Embedder,
    EmbeddingOutput, SegmentationOutput, Segmenter, StageKind, Transcriber, TranscriptSegment,
    TranscriptionOutput,
};
use creative_analysis::storage::{BlobError, BlobStore, StorageUri};
use creative_analysis::store::{
    AnalysisStatus, AnalyticsStore, AnnotationRecord, Creative, MetadataStore, StoreError,
    VisionFeatureRecord,
};
use creative_analysis::vector::{VectorError, VectorIndex, VectorRecord};

/// Shared failure and latency switches for a fake stage.
#[derive(Default)]
pub struct Switches {
    failing: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl Switches {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Counts the call, sleeps, then fails if switched on.
    async fn enter(&self, stage: StageKind) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StageError::Inference {
                stage,
                reason: "backend returned 500".to_string(),
            });
        }
        Ok(())
    }
}

/// Writes one frame per sampling tick of a clip of `duration_secs`, plus the
/// boundary frame ffmpeg emits at the end of the window.
pub struct FakeDecoder {
    pub duration_secs: f64,
}

#[async_trait]
impl FrameDecoder for FakeDecoder {
    async fn decode(
        &self,
        _media_path: &Path,
        output_dir: &Path,
        params: SamplingParams,
    ) -> Result<(), AnalysisError> {
        let window = self.duration_secs.min(f64::from(params.max_seconds));
        let count = (window * params.target_fps).floor() as usize + 1;
        for i in 1..=count {
            std::fs::write(output_dir.join(format!("frame_{:05}.jpg", i)), b"jpg")
                .map_err(|e| AnalysisError::Extraction(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSegmenter {
    pub switches: Switches,
    pub frames_seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(&self, frames: &[PathBuf]) -> Result<SegmentationOutput, StageError> {
        self.frames_seen.lock().unwrap().push(frames.len());
        self.switches.enter(StageKind::Segmentation).await?;
        Ok(SegmentationOutput {
            num_shots: 3,
            product_masks: vec![serde_json::json!({"label": "bottle", "frame": 2})],
            face_masks: vec![],
            text_regions: vec![serde_json::json!({"text": "50% OFF"})],
        })
    }
}

pub struct FakeEmbedder {
    pub dimension: usize,
    pub switches: Switches,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            switches: Switches::default(),
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        "fake-clip"
    }

    async fn embed(&self, frames: &[PathBuf]) -> Result<EmbeddingOutput, StageError> {
        self.switches.enter(StageKind::Embedding).await?;
        // Creative embedding left empty so the pipeline mean-pools frames
        Ok(EmbeddingOutput {
            creative_embedding: Vec::new(),
            frame_embeddings: frames.iter().map(|_| vec![0.25; self.dimension]).collect(),
            scene_tags: vec!["gym".to_string()],
            style_tags: vec!["ugc".to_string()],
        })
    }
}

#[derive(Default)]
pub struct FakeTranscriber {
    pub switches: Switches,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _media_path: &Path) -> Result<TranscriptionOutput, StageError> {
        self.switches.enter(StageKind::Transcription).await?;
        Ok(TranscriptionOutput {
            transcript_full: "Want to know my secret? Link in bio.".to_string(),
            transcript_first_5s: String::new(),
            language: "en".to_string(),
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.5,
                    text: "Want to know my secret?".to_string(),
                },
                TranscriptSegment {
                    start: 6.0,
                    end: 8.0,
                    text: "Link in bio.".to_string(),
                },
            ],
        })
    }
}

#[derive(Default)]
pub struct FakeAnnotator {
    pub switches: Switches,
    /// Returns a score outside `[0, 1]` when set.
    pub out_of_range: AtomicBool,
    pub requests: Mutex<Vec<AnnotationRequest>>,
}

#[async_trait]
impl Annotator for FakeAnnotator {
    fn provenance(&self) -> AnnotationProvenance {
        AnnotationProvenance {
            model_name: "fake-llm".to_string(),
            prompt_version: "v1.0".to_string(),
            annotation_version: "v1.0".to_string(),
        }
    }

    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationOutput, StageError> {
        self.requests.lock().unwrap().push(request.clone());
        self.switches.enter(StageKind::Annotation).await?;
        let virality_score = if self.out_of_range.load(Ordering::SeqCst) {
            1.7
        } else {
            0.64
        };
        Ok(AnnotationOutput {
            hook_type: "question".to_string(),
            hook_text: "Want to know my secret?".to_string(),
            hook_strength_score: 0.82,
            cta_type: "link_bio".to_string(),
            cta_clarity_score: 0.9,
            sentiment_overall: "positive".to_string(),
            pacing_style: "fast".to_string(),
            virality_score,
        })
    }
}

/// Vector index that keeps the latest record per (namespace, id).
#[derive(Default)]
pub struct MemoryIndex {
    pub failing: AtomicBool,
    pub upserts: AtomicUsize,
    pub records: Mutex<Vec<(String, VectorRecord)>>,
}

impl MemoryIndex {
    pub fn get(&self, namespace: &str, id: &str) -> Option<VectorRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|(ns, r)| ns == namespace && r.id == id)
            .map(|(_, r)| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), VectorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VectorError::Request("connection refused".to_string()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.retain(|(ns, r)| !(ns == namespace && r.id == record.id));
            stored.push((namespace.to_string(), record.clone()));
        }
        Ok(())
    }
}

/// Blob store whose every fetch fails with a transfer error.
pub struct UnreachableBlobStore;

#[async_trait]
impl BlobStore for UnreachableBlobStore {
    async fn fetch(&self, uri: &StorageUri, _destination: &Path) -> Result<PathBuf, BlobError> {
        Err(BlobError::Transfer {
            uri: uri.to_string(),
            reason: "connection reset by peer".to_string(),
        })
    }
}

/// Blob store that starts a download and then never delivers another byte.
pub struct StalledBlobStore;

#[async_trait]
impl BlobStore for StalledBlobStore {
    async fn fetch(&self, _uri: &StorageUri, destination: &Path) -> Result<PathBuf, BlobError> {
        let _ = std::fs::write(destination.with_extension("part"), b"partial");
        std::future::pending().await
    }
}

/// How a [`ScriptedDecoder`] behaves.
pub enum DecoderScript {
    /// Exits with an error, as ffmpeg does on a corrupt container.
    Fail,
    /// Succeeds without writing any frame.
    NoFrames,
    /// Never returns.
    Hang,
}

pub struct ScriptedDecoder(pub DecoderScript);

#[async_trait]
impl FrameDecoder for ScriptedDecoder {
    async fn decode(
        &self,
        _media_path: &Path,
        _output_dir: &Path,
        _params: SamplingParams,
    ) -> Result<(), AnalysisError> {
        match self.0 {
            DecoderScript::Fail => Err(AnalysisError::Extraction(
                "ffmpeg exited with exit status: 1: moov atom not found".to_string(),
            )),
            DecoderScript::NoFrames => Ok(()),
            DecoderScript::Hang => std::future::pending().await,
        }
    }
}

/// Metadata store whose backend is unreachable.
#[derive(Default)]
pub struct DownStore {
    pub status_writes: AtomicUsize,
}

#[async_trait]
impl MetadataStore for DownStore {
    async fn fetch_creative(&self, _creative_id: &str) -> Result<Option<Creative>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn update_status(
        &self,
        _creative_id: &str,
        _status: AnalysisStatus,
        _completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Serves reads from `inner` but fails every status write.
pub struct StatusWritesDown {
    pub inner: Arc<dyn MetadataStore>,
    pub status_writes: AtomicUsize,
}

impl StatusWritesDown {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            status_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MetadataStore for StatusWritesDown {
    async fn fetch_creative(&self, creative_id: &str) -> Result<Option<Creative>, StoreError> {
        self.inner.fetch_creative(creative_id).await
    }

    async fn update_status(
        &self,
        _creative_id: &str,
        _status: AnalysisStatus,
        _completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("deadline exceeded".to_string()))
    }
}

/// Analytics store that rejects every write.
#[derive(Default)]
pub struct RejectingAnalytics {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl AnalyticsStore for RejectingAnalytics {
    async fn upsert_vision_features(
        &self,
        _record: &VisionFeatureRecord,
    ) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }

    async fn upsert_annotations(&self, _record: &AnnotationRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("quota exceeded".to_string()))
    }
}
