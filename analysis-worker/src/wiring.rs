//! Builds the intake loop and its collaborators from config.

use std::error::Error;
use std::sync::Arc;

use creative_analysis::bigquery::BigQueryStore;
use creative_analysis::config::{MetadataBackend, WorkerConfig};
use creative_analysis::db::{self, Database, SqliteStore};
use creative_analysis::error::ConfigError;
use creative_analysis::media::FfmpegDecoder;
use creative_analysis::pipeline::{Collaborators, Pipeline, PipelineConfig};
use creative_analysis::queue::PubSubSubscription;
use creative_analysis::stages::StageSet;
use creative_analysis::storage::{BlobStore, GcsBlobStore, LocalBlobStore, ScratchArea};
use creative_analysis::store::{AnalyticsStore, MetadataStore};
use creative_analysis::vector::PineconeIndex;
use creative_analysis::worker::{IntakeConfig, IntakeLoop};
use tracing::info;

fn missing(name: &str) -> ConfigError {
    ConfigError::Missing {
        name: name.to_string(),
    }
}

type Stores = (Arc<dyn MetadataStore>, Arc<dyn AnalyticsStore>);

fn build_stores(config: &WorkerConfig) -> Result<Stores, Box<dyn Error>> {
    match config.metadata_backend {
        MetadataBackend::BigQuery => {
            info!(
                project = %config.project_id,
                dataset = %config.dataset,
                "Using BigQuery metadata store"
            );
            let store = Arc::new(BigQueryStore::connect(
                config.bigquery_endpoint.as_deref(),
                &config.project_id,
                &config.dataset,
                config.secrets.google_access_token.clone(),
            )?);
            let metadata: Arc<dyn MetadataStore> = store.clone();
            let analytics: Arc<dyn AnalyticsStore> = store;
            Ok((metadata, analytics))
        }
        MetadataBackend::Sqlite => {
            let database_path = config
                .database_path
                .clone()
                .or_else(|| db::default_database_path(&config.dataset))
                .ok_or_else(|| missing("ANALYSIS_DATABASE_PATH"))?;
            let store = Arc::new(SqliteStore::new(Database::open(&database_path)?));
            let metadata: Arc<dyn MetadataStore> = store.clone();
            let analytics: Arc<dyn AnalyticsStore> = store;
            Ok((metadata, analytics))
        }
    }
}

pub fn build_intake(config: &WorkerConfig) -> Result<IntakeLoop, Box<dyn Error>> {
    let (metadata, analytics) = build_stores(config)?;

    let token = config.secrets.google_access_token.clone();
    let blobs: Arc<dyn BlobStore> = match (&config.blob_root, &config.storage_endpoint) {
        (Some(root), _) => {
            info!("Serving media from local directory {}", root.display());
            Arc::new(LocalBlobStore::new(root.clone()))
        }
        (None, Some(endpoint)) => Arc::new(GcsBlobStore::with_base_url(
            endpoint.clone(),
            token.clone(),
        )?),
        (None, None) => Arc::new(GcsBlobStore::new(token.clone())?),
    };

    let vector_host = config
        .vector_host
        .as_deref()
        .ok_or_else(|| missing("PINECONE_HOST"))?;
    let vector_key = config
        .secrets
        .pinecone_api_key
        .clone()
        .ok_or_else(|| missing("PINECONE_API_KEY"))?;
    let vectors = Arc::new(PineconeIndex::new(vector_host, vector_key)?);

    let scratch = ScratchArea::new(
        config
            .scratch_dir
            .clone()
            .unwrap_or_else(ScratchArea::default_root),
    );
    info!("Scratch root {}", scratch.root().display());

    let pipeline = Pipeline::new(
        PipelineConfig::from_config(config),
        Collaborators {
            metadata,
            analytics,
            vectors,
            blobs,
            decoder: Arc::new(FfmpegDecoder::new(config.ffmpeg_path.clone())),
            stages: StageSet::from_config(config)?,
            scratch,
        },
    );

    let subscription = match &config.pubsub_endpoint {
        Some(endpoint) => PubSubSubscription::with_base_url(
            endpoint,
            &config.project_id,
            &config.subscription,
            token,
        )?,
        None => PubSubSubscription::new(&config.project_id, &config.subscription, token)?,
    };

    Ok(IntakeLoop::new(
        Arc::new(subscription),
        Arc::new(pipeline),
        IntakeConfig::from_config(config),
    ))
}
