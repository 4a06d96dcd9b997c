//! BigQuery-backed metadata and analytics stores.
//!
//! Creatives live in `<project>.<dataset>.creatives`; analysis results are
//! merged into `creative_vision_features` and `creative_llm_annotations`,
//! keyed by `creative_id`.

pub mod client;

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::SecretString;
use tracing::{debug, warn};

pub use client::{BigQueryClient, QueryParameter, QueryResult, Row};

use crate::media::MediaType;
use crate::store::{
    AnalysisStatus, AnalyticsStore, AnnotationRecord, Creative, MetadataStore, StoreError,
    VisionFeatureRecord,
};

pub const CREATIVES_TABLE: &str = "creatives";
pub const VISION_FEATURES_TABLE: &str = "creative_vision_features";
pub const ANNOTATIONS_TABLE: &str = "creative_llm_annotations";

/// Project ids may be domain-scoped (`example.com:proj`); datasets are plain.
static RE_PROJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9.:-]{1,62}[a-z0-9]$").unwrap());
static RE_DATASET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,1024}$").unwrap());

pub struct BigQueryStore {
    client: BigQueryClient,
    dataset: String,
}

impl BigQueryStore {
    /// Table names are spliced into SQL, so both identifiers are checked here.
    pub fn new(client: BigQueryClient, dataset: &str) -> Result<Self, StoreError> {
        if !RE_PROJECT.is_match(client.project_id()) {
            return Err(StoreError::InvalidValue {
                field: "project_id",
                value: client.project_id().to_string(),
            });
        }
        if !RE_DATASET.is_match(dataset) {
            return Err(StoreError::InvalidValue {
                field: "dataset",
                value: dataset.to_string(),
            });
        }

        Ok(Self {
            client,
            dataset: dataset.to_string(),
        })
    }

    /// Connects to the public endpoint, or `base_url` when given.
    pub fn connect(
        base_url: Option<&str>,
        project_id: &str,
        dataset: &str,
        token: Option<SecretString>,
    ) -> Result<Self, StoreError> {
        let client = match base_url {
            Some(url) => BigQueryClient::with_base_url(url, project_id, token),
            None => BigQueryClient::new(project_id, token),
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::new(client, dataset)
    }

    fn table(&self, name: &str) -> String {
        format!("`{}.{}.{}`", self.client.project_id(), self.dataset, name)
    }

    fn select_creative_sql(&self) -> String {
        format!(
            "SELECT creative_id, storage_uri, media_type, niche, platform, analysis_status, \
             UNIX_MICROS(analysis_completed_at) AS analysis_completed_at_us \
             FROM {} WHERE creative_id = @creative_id LIMIT 1",
            self.table(CREATIVES_TABLE)
        )
    }

    fn update_status_sql(&self, with_timestamp: bool) -> String {
        let completed = if with_timestamp {
            ", analysis_completed_at = @completed_at"
        } else {
            ""
        };
        format!(
            "UPDATE {} SET analysis_status = @status{} WHERE creative_id = @creative_id",
            self.table(CREATIVES_TABLE),
            completed
        )
    }

    /// Upsert keyed by `creative_id`; every parameter is a column of the same name.
    fn merge_sql(&self, table: &str, parameters: &[QueryParameter]) -> String {
        let columns: Vec<&str> = parameters.iter().map(|p| p.name()).collect();
        let source = columns
            .iter()
            .map(|c| format!("@{c} AS {c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .filter(|c| **c != "creative_id")
            .map(|c| format!("{c} = S.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let values = columns
            .iter()
            .map(|c| format!("S.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "MERGE {} T USING (SELECT {}) S ON T.creative_id = S.creative_id \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            self.table(table),
            source,
            updates,
            columns.join(", "),
            values
        )
    }
}

fn vision_parameters(record: &VisionFeatureRecord) -> Result<Vec<QueryParameter>, StoreError> {
    let f = &record.features;
    let json = |field: &'static str, value: &[serde_json::Value]| {
        serde_json::to_string(value).map_err(|e| StoreError::InvalidValue {
            field,
            value: e.to_string(),
        })
    };

    Ok(vec![
        QueryParameter::string("creative_id", &record.creative_id),
        QueryParameter::int64("num_shots", i64::from(f.num_shots)),
        QueryParameter::string("product_masks", json("product_masks", &f.product_masks)?),
        QueryParameter::string("face_masks", json("face_masks", &f.face_masks)?),
        QueryParameter::string("text_regions", json("text_regions", &f.text_regions)?),
        QueryParameter::string_array("scene_tags", &f.scene_tags),
        QueryParameter::string_array("style_tags", &f.style_tags),
        QueryParameter::string("embedding_model", &f.embedding_model),
    ])
}

fn annotation_parameters(record: &AnnotationRecord) -> Vec<QueryParameter> {
    let a = &record.annotation;
    let p = &record.provenance;
    vec![
        QueryParameter::string("creative_id", &record.creative_id),
        QueryParameter::string("model_name", &p.model_name),
        QueryParameter::string("prompt_version", &p.prompt_version),
        QueryParameter::string("annotation_version", &p.annotation_version),
        QueryParameter::string("hook_type", &a.hook_type),
        QueryParameter::string("hook_text", &a.hook_text),
        QueryParameter::float64("hook_strength_score", a.hook_strength_score),
        QueryParameter::string("cta_type", &a.cta_type),
        QueryParameter::float64("cta_clarity_score", a.cta_clarity_score),
        QueryParameter::string("sentiment_overall", &a.sentiment_overall),
        QueryParameter::string("pacing_style", &a.pacing_style),
        QueryParameter::float64("virality_score", a.virality_score),
    ]
}

fn creative_from_row(row: &Row) -> Result<Creative, StoreError> {
    let required = |field: &'static str| {
        row.get_str(field).ok_or_else(|| StoreError::InvalidValue {
            field,
            value: "NULL".to_string(),
        })
    };

    let media_type_raw = required("media_type")?;
    let media_type =
        media_type_raw
            .parse::<MediaType>()
            .map_err(|_| StoreError::InvalidValue {
                field: "media_type",
                value: media_type_raw.to_string(),
            })?;

    // Rows inserted upstream without a status have not been analyzed yet
    let analysis_status = match row.get_str("analysis_status") {
        None => AnalysisStatus::Pending,
        Some(raw) => raw
            .parse::<AnalysisStatus>()
            .map_err(|_| StoreError::InvalidValue {
                field: "analysis_status",
                value: raw.to_string(),
            })?,
    };

    let analysis_completed_at = match row.get_str("analysis_completed_at_us") {
        None => None,
        Some(raw) => {
            let invalid = || StoreError::InvalidValue {
                field: "analysis_completed_at",
                value: raw.to_string(),
            };
            let micros = raw.parse::<i64>().map_err(|_| invalid())?;
            Some(DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(invalid)?)
        }
    };

    Ok(Creative {
        creative_id: required("creative_id")?.to_string(),
        storage_uri: required("storage_uri")?.to_string(),
        media_type,
        niche: row.get_str("niche").unwrap_or_default().to_string(),
        platform: row.get_str("platform").unwrap_or_default().to_string(),
        analysis_status,
        analysis_completed_at,
    })
}

#[async_trait]
impl MetadataStore for BigQueryStore {
    async fn fetch_creative(&self, creative_id: &str) -> Result<Option<Creative>, StoreError> {
        let result = self
            .client
            .query(
                &self.select_creative_sql(),
                &[QueryParameter::string("creative_id", creative_id)],
            )
            .await?;
        result.rows.first().map(creative_from_row).transpose()
    }

    async fn update_status(
        &self,
        creative_id: &str,
        status: AnalysisStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut parameters = vec![
            QueryParameter::string("creative_id", creative_id),
            QueryParameter::string("status", status.as_str()),
        ];
        let completed_at = match status {
            AnalysisStatus::Completed => completed_at,
            _ => None,
        };
        if let Some(ts) = completed_at {
            parameters.push(QueryParameter::timestamp("completed_at", ts));
        }

        let result = self
            .client
            .query(&self.update_status_sql(completed_at.is_some()), &parameters)
            .await?;

        if result.affected_rows == Some(0) {
            warn!(
                "Status update to {} matched no creative '{}'",
                status, creative_id
            );
            return Err(StoreError::UnknownCreative(creative_id.to_string()));
        }
        debug!(creative_id = %creative_id, status = %status, "Status updated");
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for BigQueryStore {
    async fn upsert_vision_features(
        &self,
        record: &VisionFeatureRecord,
    ) -> Result<(), StoreError> {
        let parameters = vision_parameters(record)?;
        self.client
            .query(&self.merge_sql(VISION_FEATURES_TABLE, &parameters), &parameters)
            .await
            .map(|_| ())
    }

    async fn upsert_annotations(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        let parameters = annotation_parameters(record);
        self.client
            .query(&self.merge_sql(ANNOTATIONS_TABLE, &parameters), &parameters)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{AnnotationOutput, AnnotationProvenance, VisionFeatures};

    fn store() -> BigQueryStore {
        let client = BigQueryClient::with_base_url("http://localhost:9050", "my-project", None)
            .unwrap();
        BigQueryStore::new(client, "creator_pulse").unwrap()
    }

    fn row(values: serde_json::Value) -> Row {
        Row::from_json(values)
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let client = || BigQueryClient::with_base_url("http://localhost:9050", "p-1", None).unwrap();
        assert!(BigQueryStore::new(client(), "creator_pulse").is_ok());
        assert!(matches!(
            BigQueryStore::new(client(), "x`; DROP TABLE creatives; --"),
            Err(StoreError::InvalidValue { field: "dataset", .. })
        ));

        let bad_project =
            BigQueryClient::with_base_url("http://localhost:9050", "p`.x", None).unwrap();
        assert!(matches!(
            BigQueryStore::new(bad_project, "creator_pulse"),
            Err(StoreError::InvalidValue { field: "project_id", .. })
        ));
    }

    #[test]
    fn test_select_sql_is_parameterized() {
        let sql = store().select_creative_sql();
        assert!(sql.contains("FROM `my-project.creator_pulse.creatives`"));
        assert!(sql.contains("WHERE creative_id = @creative_id"));
        assert!(sql.contains("UNIX_MICROS(analysis_completed_at)"));
    }

    #[test]
    fn test_update_sql_only_sets_timestamp_when_given() {
        let store = store();
        assert_eq!(
            store.update_status_sql(false),
            "UPDATE `my-project.creator_pulse.creatives` SET analysis_status = @status \
             WHERE creative_id = @creative_id"
        );
        assert!(store
            .update_status_sql(true)
            .contains("analysis_completed_at = @completed_at"));
    }

    #[test]
    fn test_merge_sql_keys_on_creative_id() {
        let parameters = vec![
            QueryParameter::string("creative_id", "c-1"),
            QueryParameter::int64("num_shots", 2),
            QueryParameter::string("embedding_model", "ViT-B/32"),
        ];
        let sql = store().merge_sql(VISION_FEATURES_TABLE, &parameters);

        assert_eq!(
            sql,
            "MERGE `my-project.creator_pulse.creative_vision_features` T \
             USING (SELECT @creative_id AS creative_id, @num_shots AS num_shots, \
             @embedding_model AS embedding_model) S ON T.creative_id = S.creative_id \
             WHEN MATCHED THEN UPDATE SET num_shots = S.num_shots, \
             embedding_model = S.embedding_model \
             WHEN NOT MATCHED THEN INSERT (creative_id, num_shots, embedding_model) \
             VALUES (S.creative_id, S.num_shots, S.embedding_model)"
        );
    }

    #[test]
    fn test_vision_parameters_cover_every_column() {
        let record = VisionFeatureRecord {
            creative_id: "c-1".to_string(),
            features: VisionFeatures {
                num_shots: 4,
                product_masks: vec![serde_json::json!({"box": [0, 0, 10, 10]})],
                scene_tags: vec!["kitchen".to_string()],
                embedding_model: "ViT-B/32".to_string(),
                ..Default::default()
            },
        };
        let parameters = vision_parameters(&record).unwrap();
        let names: Vec<&str> = parameters.iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "creative_id",
                "num_shots",
                "product_masks",
                "face_masks",
                "text_regions",
                "scene_tags",
                "style_tags",
                "embedding_model"
            ]
        );

        let masks = serde_json::to_value(&parameters[2]).unwrap();
        assert_eq!(
            masks["parameterValue"]["value"],
            r#"[{"box":[0,0,10,10]}]"#
        );
    }

    #[test]
    fn test_annotation_parameters() {
        let record = AnnotationRecord {
            creative_id: "c-1".to_string(),
            provenance: AnnotationProvenance {
                model_name: "gpt-4o".to_string(),
                prompt_version: "v1.0".to_string(),
                annotation_version: "v1.0".to_string(),
            },
            annotation: AnnotationOutput {
                hook_type: "question".to_string(),
                hook_text: "Want to know my secret?".to_string(),
                hook_strength_score: 0.85,
                cta_type: "link_bio".to_string(),
                cta_clarity_score: 0.9,
                sentiment_overall: "positive".to_string(),
                pacing_style: "medium".to_string(),
                virality_score: 0.72,
            },
        };
        let parameters = annotation_parameters(&record);
        assert_eq!(parameters.len(), 12);

        let virality = serde_json::to_value(parameters.last().unwrap()).unwrap();
        assert_eq!(virality["name"], "virality_score");
        assert_eq!(virality["parameterType"]["type"], "FLOAT64");
        assert_eq!(virality["parameterValue"]["value"], "0.72");
    }

    #[test]
    fn test_creative_from_row() {
        let creative = creative_from_row(&row(serde_json::json!({
            "creative_id": "c-1",
            "storage_uri": "gs://ltk-trending/videos/c-1.mp4",
            "media_type": "video",
            "niche": "beauty",
            "platform": null,
            "analysis_status": "completed",
            "analysis_completed_at_us": "1709647629000000",
        })))
        .unwrap();

        assert_eq!(creative.media_type, MediaType::Video);
        assert_eq!(creative.platform, "");
        assert_eq!(creative.analysis_status, AnalysisStatus::Completed);
        assert_eq!(
            creative.analysis_completed_at.unwrap().timestamp(),
            1_709_647_629
        );
    }

    #[test]
    fn test_creative_without_status_is_pending() {
        let creative = creative_from_row(&row(serde_json::json!({
            "creative_id": "c-2",
            "storage_uri": "gs://ltk-trending/images/c-2.jpg",
            "media_type": "image",
            "analysis_status": null,
            "analysis_completed_at_us": null,
        })))
        .unwrap();

        assert_eq!(creative.analysis_status, AnalysisStatus::Pending);
        assert!(creative.analysis_completed_at.is_none());
        assert_eq!(creative.niche, "");
    }

    #[test]
    fn test_creative_with_bad_media_type() {
        let result = creative_from_row(&row(serde_json::json!({
            "creative_id": "c-3",
            "storage_uri": "gs://b/c-3.gif",
            "media_type": "animation",
        })));
        assert!(matches!(
            result,
            Err(StoreError::InvalidValue { field: "media_type", .. })
        ));
    }
}
