//! Test harness for isolated pipeline runs.
//!
//! `TestHarness` owns a temp directory holding a local blob root and the
//! scratch root, an in-memory SQLite store, and fakes for every inference
//! backend. Fakes are shared with the pipeline so tests can flip failure
//! switches and inspect what was called.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use creative_analysis::db::{analytics_repo, Database, SqliteStore};
use creative_analysis::media::MediaType;
use creative_analysis::pipeline::{
    Collaborators, NoopProgress, Pipeline, PipelineConfig, PipelineContext, ProgressReporter,
};
use creative_analysis::stages::StageSet;
use creative_analysis::storage::{BlobStore, LocalBlobStore, ScratchArea};
use creative_analysis::store::{AnalysisStatus, Creative, MetadataStore};
use creative_analysis::worker::{Job, JobResult};

use super::fakes::{
    FakeAnnotator, FakeDecoder, FakeEmbedder, FakeSegmenter, FakeTranscriber, MemoryIndex,
};

pub const BUCKET: &str = "creatives-raw";
pub const EMBEDDING_DIM: usize = 8;

pub struct TestHarness {
    temp_dir: TempDir,
    pub blob_root: PathBuf,
    pub scratch_root: PathBuf,
    pub store: Arc<SqliteStore>,
    pub index: Arc<MemoryIndex>,
    pub segmenter: Arc<FakeSegmenter>,
    pub embedder: Arc<FakeEmbedder>,
    pub transcriber: Arc<FakeTranscriber>,
    pub annotator: Arc<FakeAnnotator>,
    /// Clip length the fake decoder pretends every video has.
    pub video_seconds: f64,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blob_root = temp_dir.path().join("blobs");
        let scratch_root = temp_dir.path().join("scratch");
        std::fs::create_dir_all(blob_root.join(BUCKET)).expect("Failed to create bucket dir");

        let db = Database::open_in_memory().expect("Failed to open test database");

        Self {
            temp_dir,
            blob_root,
            scratch_root,
            store: Arc::new(SqliteStore::new(db)),
            index: Arc::new(MemoryIndex::default()),
            segmenter: Arc::new(FakeSegmenter::default()),
            embedder: Arc::new(FakeEmbedder::new(EMBEDDING_DIM)),
            transcriber: Arc::new(FakeTranscriber::default()),
            annotator: Arc::new(FakeAnnotator::default()),
            video_seconds: 12.0,
        }
    }

    /// Pipeline settings used by default: 2 fps over 10 s, short timeouts and
    /// no status retry delay.
    pub fn config() -> PipelineConfig {
        PipelineConfig {
            embedding_dim: EMBEDDING_DIM,
            stage_timeout: std::time::Duration::from_secs(5),
            status_retry_backoff: std::time::Duration::from_millis(1),
            ..PipelineConfig::default()
        }
    }

    /// Writes a placeholder object into the test bucket and registers a pending
    /// creative pointing at it.
    pub async fn add_creative(&self, creative_id: &str, media_type: MediaType, object: &str) {
        self.write_object(object, b"media-bytes");
        self.register(creative_id, media_type, object).await;
    }

    /// Registers a creative without writing its object.
    pub async fn register(&self, creative_id: &str, media_type: MediaType, object: &str) {
        let creative = Creative::new(
            creative_id,
            format!("gs://{}/{}", BUCKET, object),
            media_type,
            "fitness",
            "tiktok",
        );
        self.store
            .put_creative(&creative)
            .await
            .expect("Failed to insert creative");
    }

    pub fn write_object(&self, object: &str, body: &[u8]) {
        let path = self.blob_root.join(BUCKET).join(object);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create object dir");
        }
        std::fs::write(path, body).expect("Failed to write object");
    }

    pub fn stages(&self) -> StageSet {
        StageSet {
            segmenter: self.segmenter.clone(),
            embedder: self.embedder.clone(),
            transcriber: self.transcriber.clone(),
            annotator: self.annotator.clone(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with_blobs(Arc::new(LocalBlobStore::new(self.blob_root.clone())))
    }

    pub fn collaborators_with_blobs(&self, blobs: Arc<dyn BlobStore>) -> Collaborators {
        Collaborators {
            metadata: self.store.clone(),
            analytics: self.store.clone(),
            vectors: self.index.clone(),
            blobs,
            decoder: Arc::new(FakeDecoder {
                duration_secs: self.video_seconds,
            }),
            stages: self.stages(),
            scratch: ScratchArea::new(self.scratch_root.clone()),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(Self::config())
    }

    pub fn pipeline_with(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(config, self.collaborators())
    }

    /// Runs one job for `creative_id` through a default pipeline.
    pub async fn run(&self, creative_id: &str) -> (JobResult, PipelineContext) {
        self.pipeline().run(Job::new(creative_id), &NoopProgress).await
    }

    pub async fn run_with(
        &self,
        pipeline: &Pipeline,
        job: Job,
        progress: &dyn ProgressReporter,
    ) -> (JobResult, PipelineContext) {
        pipeline.run(job, progress).await
    }

    pub async fn creative(&self, creative_id: &str) -> Creative {
        self.store
            .fetch_creative(creative_id)
            .await
            .expect("Failed to fetch creative")
            .expect("Creative not found")
    }

    pub async fn status(&self, creative_id: &str) -> AnalysisStatus {
        self.creative(creative_id).await.analysis_status
    }

    pub fn vision_row(&self, creative_id: &str) -> Option<analytics_repo::VisionFeatureRow> {
        analytics_repo::find_vision_features(self.store.database(), creative_id)
            .expect("Failed to query vision features")
    }

    pub fn annotation_row(&self, creative_id: &str) -> Option<analytics_repo::AnnotationRow> {
        analytics_repo::find_annotation(self.store.database(), creative_id)
            .expect("Failed to query annotations")
    }

    /// Entries left under the scratch root.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.scratch_root) {
            Ok(entries) => entries
                .map(|e| e.expect("Failed to read scratch entry").path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
