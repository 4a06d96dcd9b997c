//! SQLite-backed metadata and analytics stores.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use super::analytics_repo::{self, AnnotationRow, VisionFeatureRow};
use super::creative_repo::{self, CreativeRow};
use super::{Database, DatabaseError};
use crate::media::MediaType;
use crate::store::{
    AnalysisStatus, AnalyticsStore, AnnotationRecord, Creative, MetadataStore, StoreError,
    VisionFeatureRecord,
};

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts or replaces a creative record.
    pub async fn put_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        let row = CreativeRow::from(creative);
        self.blocking(move |db| creative_repo::upsert(db, &row)).await
    }

    /// Runs a repository call on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(StoreError::from)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<&Creative> for CreativeRow {
    fn from(c: &Creative) -> Self {
        Self {
            creative_id: c.creative_id.clone(),
            storage_uri: c.storage_uri.clone(),
            media_type: c.media_type.as_str().to_string(),
            niche: c.niche.clone(),
            platform: c.platform.clone(),
            analysis_status: c.analysis_status.as_str().to_string(),
            analysis_completed_at: c.analysis_completed_at.map(format_timestamp),
        }
    }
}

impl TryFrom<CreativeRow> for Creative {
    type Error = StoreError;

    fn try_from(row: CreativeRow) -> Result<Self, Self::Error> {
        let media_type = row
            .media_type
            .parse::<MediaType>()
            .map_err(|_| StoreError::InvalidValue {
                field: "media_type",
                value: row.media_type.clone(),
            })?;
        let analysis_status = row
            .analysis_status
            .parse::<AnalysisStatus>()
            .map_err(|_| StoreError::InvalidValue {
                field: "analysis_status",
                value: row.analysis_status.clone(),
            })?;
        let analysis_completed_at = match row.analysis_completed_at {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|_| StoreError::InvalidValue {
                        field: "analysis_completed_at",
                        value: ts.clone(),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            creative_id: row.creative_id,
            storage_uri: row.storage_uri,
            media_type,
            niche: row.niche,
            platform: row.platform,
            analysis_status,
            analysis_completed_at,
        })
    }
}

fn to_json<T: serde::Serialize>(field: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::InvalidValue {
        field,
        value: e.to_string(),
    })
}

impl TryFrom<&VisionFeatureRecord> for VisionFeatureRow {
    type Error = StoreError;

    fn try_from(r: &VisionFeatureRecord) -> Result<Self, Self::Error> {
        let f = &r.features;
        Ok(Self {
            creative_id: r.creative_id.clone(),
            num_shots: f.num_shots,
            product_masks: to_json("product_masks", &f.product_masks)?,
            face_masks: to_json("face_masks", &f.face_masks)?,
            text_regions: to_json("text_regions", &f.text_regions)?,
            scene_tags: to_json("scene_tags", &f.scene_tags)?,
            style_tags: to_json("style_tags", &f.style_tags)?,
            embedding_model: f.embedding_model.clone(),
        })
    }
}

impl From<&AnnotationRecord> for AnnotationRow {
    fn from(r: &AnnotationRecord) -> Self {
        let a = &r.annotation;
        Self {
            creative_id: r.creative_id.clone(),
            model_name: r.provenance.model_name.clone(),
            prompt_version: r.provenance.prompt_version.clone(),
            annotation_version: r.provenance.annotation_version.clone(),
            hook_type: a.hook_type.clone(),
            hook_text: a.hook_text.clone(),
            hook_strength_score: a.hook_strength_score,
            cta_type: a.cta_type.clone(),
            cta_clarity_score: a.cta_clarity_score,
            sentiment_overall: a.sentiment_overall.clone(),
            pacing_style: a.pacing_style.clone(),
            virality_score: a.virality_score,
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn fetch_creative(&self, creative_id: &str) -> Result<Option<Creative>, StoreError> {
        let id = creative_id.to_string();
        let row = self
            .blocking(move |db| creative_repo::find_by_id(db, &id))
            .await?;
        row.map(Creative::try_from).transpose()
    }

    async fn update_status(
        &self,
        creative_id: &str,
        status: AnalysisStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let id = creative_id.to_string();
        let completed_at = match status {
            AnalysisStatus::Completed => completed_at.map(format_timestamp),
            _ => None,
        };

        let changed = self
            .blocking(move |db| {
                creative_repo::update_status(db, &id, status.as_str(), completed_at.as_deref())
            })
            .await?;

        if changed == 0 {
            warn!(
                "Status update to {} matched no creative '{}'",
                status, creative_id
            );
            return Err(StoreError::UnknownCreative(creative_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for SqliteStore {
    async fn upsert_vision_features(
        &self,
        record: &VisionFeatureRecord,
    ) -> Result<(), StoreError> {
        let row = VisionFeatureRow::try_from(record)?;
        self.blocking(move |db| analytics_repo::upsert_vision_features(db, &row))
            .await
    }

    async fn upsert_annotations(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        let row = AnnotationRow::from(record);
        self.blocking(move |db| analytics_repo::upsert_annotation(db, &row))
            .await
    }
}
