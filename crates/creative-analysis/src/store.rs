//! Contracts for the metadata and analytics stores.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::media::MediaType;
use crate::stages::{AnnotationOutput, AnnotationProvenance, VisionFeatures};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid stored value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected query: {0}")]
    Rejected(String),

    #[error("No creative with id '{0}'")]
    UnknownCreative(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "processing" => Ok(AnalysisStatus::Processing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status '{}'", other)),
        }
    }
}

/// Metadata record for one creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creative {
    pub creative_id: String,
    pub storage_uri: String,
    pub media_type: MediaType,
    pub niche: String,
    pub platform: String,
    pub analysis_status: AnalysisStatus,
    pub analysis_completed_at: Option<DateTime<Utc>>,
}

impl Creative {
    /// A fresh `pending` creative.
    pub fn new(
        creative_id: impl Into<String>,
        storage_uri: impl Into<String>,
        media_type: MediaType,
        niche: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            creative_id: creative_id.into(),
            storage_uri: storage_uri.into(),
            media_type,
            niche: niche.into(),
            platform: platform.into(),
            analysis_status: AnalysisStatus::Pending,
            analysis_completed_at: None,
        }
    }
}

/// Row written to `creative_vision_features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionFeatureRecord {
    pub creative_id: String,
    #[serde(flatten)]
    pub features: VisionFeatures,
}

/// Row written to `creative_llm_annotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub creative_id: String,
    #[serde(flatten)]
    pub provenance: AnnotationProvenance,
    #[serde(flatten)]
    pub annotation: AnnotationOutput,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Point lookup; `None` when the creative does not exist.
    async fn fetch_creative(&self, creative_id: &str) -> Result<Option<Creative>, StoreError>;

    /// Sets `analysis_status`. `completed_at` is only written for `completed`.
    /// Fails with [`StoreError::UnknownCreative`] when no row matches.
    async fn update_status(
        &self,
        creative_id: &str,
        status: AnalysisStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

/// Upserts keyed by `creative_id`, so replays leave one row per creative.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn upsert_vision_features(&self, record: &VisionFeatureRecord)
        -> Result<(), StoreError>;

    async fn upsert_annotations(&self, record: &AnnotationRecord) -> Result<(), StoreError>;
}
