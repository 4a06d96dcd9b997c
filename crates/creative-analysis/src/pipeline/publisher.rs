use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PublishError;
use crate::stages::{AnnotationOutput, AnnotationProvenance, VisionFeatures};
use crate::store::{AnalyticsStore, AnnotationRecord, VisionFeatureRecord};
use crate::vector::{VectorIndex, VectorMetadata, VectorRecord};

/// Writes a finished analysis to the analytics store, then the vector index.
///
/// The two writes are independent and nothing is rolled back. Every write is
/// keyed by `creative_id`, so rerunning a job converges on the same rows.
pub struct ResultPublisher {
    analytics: Arc<dyn AnalyticsStore>,
    vectors: Arc<dyn VectorIndex>,
    namespace: String,
}

impl ResultPublisher {
    pub fn new(
        analytics: Arc<dyn AnalyticsStore>,
        vectors: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            analytics,
            vectors,
            namespace: namespace.into(),
        }
    }

    pub async fn publish(
        &self,
        creative_id: &str,
        vision_features: &VisionFeatures,
        annotations: &AnnotationOutput,
        provenance: &AnnotationProvenance,
        embedding: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), PublishError> {
        let vision_record = VisionFeatureRecord {
            creative_id: creative_id.to_string(),
            features: vision_features.clone(),
        };
        self.analytics
            .upsert_vision_features(&vision_record)
            .await
            .map_err(|e| PublishError::Analytics(e.to_string()))?;

        let annotation_record = AnnotationRecord {
            creative_id: creative_id.to_string(),
            provenance: provenance.clone(),
            annotation: annotations.clone(),
        };
        self.analytics
            .upsert_annotations(&annotation_record)
            .await
            .map_err(|e| PublishError::Analytics(e.to_string()))?;

        let record = VectorRecord {
            id: creative_id.to_string(),
            values: embedding.to_vec(),
            metadata: metadata.clone(),
        };
        if let Err(e) = self.vectors.upsert(&self.namespace, &[record]).await {
            warn!(
                creative_id = %creative_id,
                "Analytics rows written but vector upsert failed: {}", e
            );
            return Err(PublishError::VectorPartial(e.to_string()));
        }

        info!(
            creative_id = %creative_id,
            namespace = %self.namespace,
            dimension = embedding.len(),
            "Published analysis results"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{analytics_repo, Database, SqliteStore};
    use crate::media::MediaType;
    use crate::vector::VectorError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingIndex {
        fail: bool,
        upserts: Mutex<Vec<(String, Vec<VectorRecord>)>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<(), VectorError> {
            if self.fail {
                return Err(VectorError::Request("503 Service Unavailable".to_string()));
            }
            self.upserts
                .lock()
                .unwrap()
                .push((namespace.to_string(), records.to_vec()));
            Ok(())
        }
    }

    fn annotation() -> AnnotationOutput {
        AnnotationOutput {
            hook_type: "question".to_string(),
            hook_text: "Want to know my secret?".to_string(),
            hook_strength_score: 0.8,
            cta_type: "link_bio".to_string(),
            cta_clarity_score: 0.7,
            sentiment_overall: "positive".to_string(),
            pacing_style: "fast".to_string(),
            virality_score: 0.6,
        }
    }

    fn provenance() -> AnnotationProvenance {
        AnnotationProvenance {
            model_name: "gpt-4o".to_string(),
            prompt_version: "v1.0".to_string(),
            annotation_version: "v1.0".to_string(),
        }
    }

    fn metadata() -> VectorMetadata {
        VectorMetadata {
            platform: "tiktok".to_string(),
            niche: "fitness".to_string(),
            media_type: MediaType::Video,
        }
    }

    async fn publish(
        publisher: &ResultPublisher,
        creative_id: &str,
    ) -> Result<(), PublishError> {
        let vision = VisionFeatures {
            num_shots: 3,
            embedding_model: "ViT-B/32".to_string(),
            ..VisionFeatures::default()
        };
        publisher
            .publish(
                creative_id,
                &vision,
                &annotation(),
                &provenance(),
                &[0.5, 0.5],
                &metadata(),
            )
            .await
    }

    #[tokio::test]
    async fn test_publish_writes_analytics_then_vector() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(SqliteStore::new(db.clone()));
        let index = Arc::new(RecordingIndex::default());
        let publisher = ResultPublisher::new(store, index.clone(), "creatives");

        publish(&publisher, "c-1").await.unwrap();

        let row = analytics_repo::find_vision_features(&db, "c-1").unwrap().unwrap();
        assert_eq!(row.num_shots, 3);
        assert!(analytics_repo::find_annotation(&db, "c-1").unwrap().is_some());

        let upserts = index.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, "creatives");
        assert_eq!(upserts[0].1[0].id, "c-1");
        assert_eq!(upserts[0].1[0].values, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_vector_failure_is_partial() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(SqliteStore::new(db.clone()));
        let index = Arc::new(RecordingIndex {
            fail: true,
            ..RecordingIndex::default()
        });
        let publisher = ResultPublisher::new(store, index, "creatives");

        let err = publish(&publisher, "c-1").await.unwrap_err();
        assert!(err.is_partial());
        // Analytics rows stay in place
        assert!(analytics_repo::find_vision_features(&db, "c-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_republish_keeps_one_row() {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(SqliteStore::new(db.clone()));
        let index = Arc::new(RecordingIndex::default());
        let publisher = ResultPublisher::new(store, index, "creatives");

        publish(&publisher, "c-1").await.unwrap();
        publish(&publisher, "c-1").await.unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM creative_llm_annotations",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
