pub mod pinecone;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaType;

pub use pinecone::PineconeIndex;

/// Namespace creative embeddings are written to.
pub const CREATIVES_NAMESPACE: &str = "creatives";

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Vector index request failed: {0}")]
    Request(String),

    #[error("Vector index rejected upsert: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub platform: String,
    pub niche: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Namespaced vector index; upserts replace any vector with the same id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), VectorError>;
}
