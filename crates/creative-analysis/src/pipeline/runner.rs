use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{AnalysisError, StageError};
use crate::media::{FrameDecoder, FrameSampler};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::progress::{ProgressEvent, ProgressReporter};
use crate::pipeline::publisher::ResultPublisher;
use crate::pipeline::state::PipelineState;
use crate::pipeline::status::StatusTracker;
use crate::sanitize;
use crate::stages::{AnnotationRequest, StageKind, StageSet, VisionFeatures};
use crate::storage::{local_extension, BlobStore, ScratchArea, ScratchHandle, StorageUri};
use crate::store::{AnalysisStatus, AnalyticsStore, MetadataStore};
use crate::vector::{VectorIndex, VectorMetadata};
use crate::worker::job::{Job, JobResult};

/// External systems a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn MetadataStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub vectors: Arc<dyn VectorIndex>,
    pub blobs: Arc<dyn BlobStore>,
    pub decoder: Arc<dyn FrameDecoder>,
    pub stages: StageSet,
    pub scratch: ScratchArea,
}

/// How a run that did not fail ended.
enum Completion {
    Done,
    Skipped,
}

struct StageRun<T> {
    result: Result<T, StageError>,
    duration: Duration,
}

/// Runs one creative through acquisition, sampling, the analysis stages,
/// publishing and the final status write.
pub struct Pipeline {
    config: PipelineConfig,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    scratch: ScratchArea,
    sampler: FrameSampler,
    stages: StageSet,
    publisher: ResultPublisher,
    status: StatusTracker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, parts: Collaborators) -> Self {
        let publisher = ResultPublisher::new(
            parts.analytics,
            parts.vectors,
            config.vector_namespace.clone(),
        );
        let status = StatusTracker::new(
            parts.metadata.clone(),
            config.status_retries,
            config.status_retry_backoff,
        );

        Self {
            metadata: parts.metadata,
            blobs: parts.blobs,
            scratch: parts.scratch,
            sampler: FrameSampler::new(parts.decoder),
            stages: parts.stages,
            publisher,
            status,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the job to a terminal state. Never returns an error: failures are
    /// logged, written to the creative's status and reported in the result.
    pub async fn run(
        &self,
        job: Job,
        progress: &dyn ProgressReporter,
    ) -> (JobResult, PipelineContext) {
        let span = info_span!("pipeline",
            job_id = %job.job_id,
            creative_id = %job.creative_id,
            force_recompute = job.force_recompute,
        );
        self.run_job(job, progress).instrument(span).await
    }

    async fn run_job(
        &self,
        job: Job,
        progress: &dyn ProgressReporter,
    ) -> (JobResult, PipelineContext) {
        let started = Instant::now();
        let mut ctx = PipelineContext::new(job);
        let mut scratch = None;

        info!("Starting analysis");
        let outcome = self.execute(&mut ctx, &mut scratch, progress).await;

        if let Some(handle) = scratch.take() {
            let path = sanitize::redact_path(handle.path());
            if let Err(e) = handle.release() {
                warn!(scratch = %path, "Failed to release scratch directory: {}", e);
            }
        }

        match outcome {
            Ok(Completion::Done) => {
                let result = JobResult::completed(&ctx.job, started.elapsed());
                info!(
                    duration_ms = result.duration.as_millis() as u64,
                    frames = ctx.frames.len(),
                    "Analysis completed"
                );
                progress.report(ProgressEvent::Completed);
                (result, ctx)
            }
            Ok(Completion::Skipped) => {
                progress.report(ProgressEvent::Skipped);
                (JobResult::skipped(&ctx.job, started.elapsed()), ctx)
            }
            Err(e) => {
                let failed_in = ctx.state;
                error!(
                    creative_id = %ctx.job.creative_id,
                    state = %failed_in,
                    kind = %e.kind(),
                    "Analysis failed: {}", e
                );
                ctx.fail();
                let recorded = self.status.mark_failed(&ctx.job.creative_id).await;
                progress.report(ProgressEvent::Failed {
                    state: failed_in,
                    error: e.to_string(),
                });
                let result = JobResult::failed(&ctx.job, failed_in, &e, recorded, started.elapsed());
                (result, ctx)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext,
        scratch: &mut Option<ScratchHandle>,
        progress: &dyn ProgressReporter,
    ) -> Result<Completion, AnalysisError> {
        let creative_id = ctx.job.creative_id.clone();

        // Step 1: Metadata
        let creative = self
            .metadata
            .fetch_creative(&creative_id)
            .await
            .map_err(|e| AnalysisError::Metadata(e.to_string()))?
            .ok_or_else(|| AnalysisError::NotFound(format!("creative '{}'", creative_id)))?;
        ctx.creative = Some(creative.clone());
        self.advance(
            ctx,
            PipelineState::MetadataFetched,
            format!("Fetched {} creative", creative.media_type),
            progress,
        )?;

        if self.config.skip_completed
            && !ctx.job.force_recompute
            && creative.analysis_status == AnalysisStatus::Completed
        {
            info!("Creative already analyzed, skipping");
            ctx.advance(PipelineState::Done)?;
            return Ok(Completion::Skipped);
        }

        if let Err(e) = self.status.mark_processing(&creative_id).await {
            warn!("Failed to record processing status: {}", e);
        }

        // Step 2: Acquire media into a job-owned scratch directory
        let uri = StorageUri::parse(&creative.storage_uri)?;
        let handle = self.scratch.acquire(&creative_id, ctx.job.job_id)?;
        let destination = handle.media_path(&local_extension(&uri, creative.media_type));
        let frames_dir = handle.frames_dir()?;
        *scratch = Some(handle);

        let span = info_span!("acquire_media", uri = %sanitize::redact_uri(&creative.storage_uri));
        let limit = self.config.acquire_timeout;
        let media_path = tokio::time::timeout(limit, self.blobs.fetch(&uri, &destination))
            .instrument(span)
            .await
            .map_err(|_| AnalysisError::Transfer {
                uri: sanitize::redact_uri(&creative.storage_uri),
                reason: format!("timed out after {:?}", limit),
            })??;
        ctx.media_path = Some(media_path.clone());
        self.advance(ctx, PipelineState::MediaReady, "Media downloaded", progress)?;

        // Step 3: Frames
        let limit = self.config.extract_timeout;
        let sampling = self.sampler.sample(
            &media_path,
            creative.media_type,
            self.config.sampling,
            &frames_dir,
        );
        ctx.frames = tokio::time::timeout(limit, sampling)
            .await
            .map_err(|_| {
                AnalysisError::Extraction(format!("timed out after {:?}", limit))
            })??;
        let message = format!("Sampled {} frames", ctx.frames.len());
        self.advance(ctx, PipelineState::FramesReady, message, progress)?;

        // Step 4: Segmentation, embedding and transcription in parallel
        ctx.check_ready(StageKind::Segmentation)?;
        ctx.check_ready(StageKind::Embedding)?;
        let transcribe = StageKind::Transcription.applies_to(creative.media_type);
        if transcribe {
            ctx.check_ready(StageKind::Transcription)?;
        }

        let frames = ctx.frames.as_slice();
        let dimension = self.config.embedding_dim;
        let (segmentation_run, embedding_run, transcription_run) = tokio::join!(
            self.run_stage(
                StageKind::Segmentation,
                self.stages.segmenter.segment(frames),
            ),
            self.run_stage(
                StageKind::Embedding,
                async move {
                    self.stages
                        .embedder
                        .embed(frames)
                        .await
                        .and_then(|output| output.validated(dimension))
                },
            ),
            async {
                if !transcribe {
                    return None;
                }
                let run = self
                    .run_stage(StageKind::Transcription, async {
                        self.stages
                            .transcriber
                            .transcribe(&media_path)
                            .await
                            .map(|output| output.with_opening_window())
                    })
                    .await;
                Some(run)
            },
        );

        ctx.bundle.record(
            StageKind::Segmentation,
            &segmentation_run.result,
            segmentation_run.duration,
        );
        ctx.bundle.record(
            StageKind::Embedding,
            &embedding_run.result,
            embedding_run.duration,
        );
        match &transcription_run {
            Some(run) => ctx
                .bundle
                .record(StageKind::Transcription, &run.result, run.duration),
            None => ctx.bundle.record_skipped(StageKind::Transcription),
        }

        let segmentation = segmentation_run.result?;
        let embedding = embedding_run.result?;
        let vision = VisionFeatures::from_outputs(
            &segmentation,
            Some(&embedding),
            self.stages.embedder.model_id(),
        );
        let creative_embedding = embedding.creative_embedding.clone();
        let message = format!("Detected {} shots", segmentation.num_shots);
        ctx.bundle.segmentation = Some(segmentation);
        ctx.bundle.embedding = Some(embedding);
        self.advance(ctx, PipelineState::VisionDone, message, progress)?;

        if let Some(run) = transcription_run {
            let transcription = run.result?;
            let message = format!("Transcribed {} segments", transcription.segments.len());
            ctx.bundle.transcription = Some(transcription);
            self.advance(ctx, PipelineState::TranscriptDone, message, progress)?;
        }

        // Step 5: Annotation over everything gathered so far
        ctx.check_ready(StageKind::Annotation)?;
        let request = AnnotationRequest {
            transcript: ctx.bundle.transcript().to_string(),
            niche: creative.niche.clone(),
            vision: vision.clone(),
        };
        let annotation_run = self
            .run_stage(StageKind::Annotation, async {
                self.stages
                    .annotator
                    .annotate(&request)
                    .await
                    .and_then(|annotation| annotation.validate().map(|()| annotation))
            })
            .await;
        ctx.bundle.record(
            StageKind::Annotation,
            &annotation_run.result,
            annotation_run.duration,
        );
        let annotation = annotation_run.result?;
        ctx.bundle.annotation = Some(annotation.clone());
        self.advance(ctx, PipelineState::Annotated, "Annotated", progress)?;

        // Step 6: Publish
        let metadata = VectorMetadata {
            platform: creative.platform.clone(),
            niche: creative.niche.clone(),
            media_type: creative.media_type,
        };
        self.publisher
            .publish(
                &creative_id,
                &vision,
                &annotation,
                &self.stages.annotator.provenance(),
                &creative_embedding,
                &metadata,
            )
            .instrument(info_span!("publish"))
            .await?;
        self.advance(ctx, PipelineState::Published, "Results published", progress)?;

        // Step 7: Status
        self.status
            .mark_completed(&creative_id)
            .await
            .map_err(|e| AnalysisError::Metadata(e.to_string()))?;
        self.advance(ctx, PipelineState::Done, "Status recorded", progress)?;

        Ok(Completion::Done)
    }

    fn advance(
        &self,
        ctx: &mut PipelineContext,
        state: PipelineState,
        message: impl Into<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<(), AnalysisError> {
        ctx.advance(state)?;
        let message = message.into();
        debug!(state = %state, "{}", message);
        progress.report(ProgressEvent::State { state, message });
        Ok(())
    }

    /// Runs a stage future under the stage timeout.
    async fn run_stage<T, F>(&self, stage: StageKind, future: F) -> StageRun<T>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let span = info_span!("stage", stage = %stage);
        let started = Instant::now();
        let limit = self.config.stage_timeout;

        let result = match tokio::time::timeout(limit, future).instrument(span).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                stage,
                seconds: limit.as_secs(),
            }),
        };
        let duration = started.elapsed();

        match &result {
            Ok(_) => debug!(
                stage = %stage,
                duration_ms = duration.as_millis() as u64,
                "Stage finished"
            ),
            Err(e) => warn!(stage = %stage, "Stage failed: {}", e),
        }

        StageRun { result, duration }
    }
}
