//! Analytics repository for `creative_vision_features` and
//! `creative_llm_annotations`.
//!
//! Both tables are keyed by `creative_id` and written with upserts, so a
//! replayed job leaves exactly one row per creative in each.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw vision-features row. List columns hold JSON arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionFeatureRow {
    pub creative_id: String,
    pub num_shots: u32,
    pub product_masks: String,
    pub face_masks: String,
    pub text_regions: String,
    pub scene_tags: String,
    pub style_tags: String,
    pub embedding_model: String,
}

impl VisionFeatureRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            creative_id: row.get("creative_id")?,
            num_shots: row.get("num_shots")?,
            product_masks: row.get("product_masks")?,
            face_masks: row.get("face_masks")?,
            text_regions: row.get("text_regions")?,
            scene_tags: row.get("scene_tags")?,
            style_tags: row.get("style_tags")?,
            embedding_model: row.get("embedding_model")?,
        })
    }
}

/// A raw annotation row.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub creative_id: String,
    pub model_name: String,
    pub prompt_version: String,
    pub annotation_version: String,
    pub hook_type: String,
    pub hook_text: String,
    pub hook_strength_score: f64,
    pub cta_type: String,
    pub cta_clarity_score: f64,
    pub sentiment_overall: String,
    pub pacing_style: String,
    pub virality_score: f64,
}

impl AnnotationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            creative_id: row.get("creative_id")?,
            model_name: row.get("model_name")?,
            prompt_version: row.get("prompt_version")?,
            annotation_version: row.get("annotation_version")?,
            hook_type: row.get("hook_type")?,
            hook_text: row.get("hook_text")?,
            hook_strength_score: row.get("hook_strength_score")?,
            cta_type: row.get("cta_type")?,
            cta_clarity_score: row.get("cta_clarity_score")?,
            sentiment_overall: row.get("sentiment_overall")?,
            pacing_style: row.get("pacing_style")?,
            virality_score: row.get("virality_score")?,
        })
    }
}

pub fn upsert_vision_features(db: &Database, row: &VisionFeatureRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO creative_vision_features (creative_id, num_shots, product_masks,
             face_masks, text_regions, scene_tags, style_tags, embedding_model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(creative_id) DO UPDATE SET
                num_shots = excluded.num_shots,
                product_masks = excluded.product_masks,
                face_masks = excluded.face_masks,
                text_regions = excluded.text_regions,
                scene_tags = excluded.scene_tags,
                style_tags = excluded.style_tags,
                embedding_model = excluded.embedding_model",
            params![
                row.creative_id,
                row.num_shots,
                row.product_masks,
                row.face_masks,
                row.text_regions,
                row.scene_tags,
                row.style_tags,
                row.embedding_model,
            ],
        )?;
        Ok(())
    })
}

pub fn find_vision_features(
    db: &Database,
    creative_id: &str,
) -> Result<Option<VisionFeatureRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM creative_vision_features WHERE creative_id = ?1")?;
        let mut rows = stmt.query_map(params![creative_id], VisionFeatureRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

pub fn upsert_annotation(db: &Database, row: &AnnotationRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO creative_llm_annotations (creative_id, model_name, prompt_version,
             annotation_version, hook_type, hook_text, hook_strength_score, cta_type,
             cta_clarity_score, sentiment_overall, pacing_style, virality_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(creative_id) DO UPDATE SET
                model_name = excluded.model_name,
                prompt_version = excluded.prompt_version,
                annotation_version = excluded.annotation_version,
                hook_type = excluded.hook_type,
                hook_text = excluded.hook_text,
                hook_strength_score = excluded.hook_strength_score,
                cta_type = excluded.cta_type,
                cta_clarity_score = excluded.cta_clarity_score,
                sentiment_overall = excluded.sentiment_overall,
                pacing_style = excluded.pacing_style,
                virality_score = excluded.virality_score",
            params![
                row.creative_id,
                row.model_name,
                row.prompt_version,
                row.annotation_version,
                row.hook_type,
                row.hook_text,
                row.hook_strength_score,
                row.cta_type,
                row.cta_clarity_score,
                row.sentiment_overall,
                row.pacing_style,
                row.virality_score,
            ],
        )?;
        Ok(())
    })
}

pub fn find_annotation(
    db: &Database,
    creative_id: &str,
) -> Result<Option<AnnotationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM creative_llm_annotations WHERE creative_id = ?1")?;
        let mut rows = stmt.query_map(params![creative_id], AnnotationRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn vision(id: &str, shots: u32) -> VisionFeatureRow {
        VisionFeatureRow {
            creative_id: id.to_string(),
            num_shots: shots,
            product_masks: "[]".to_string(),
            face_masks: "[]".to_string(),
            text_regions: "[]".to_string(),
            scene_tags: r#"["indoor","lifestyle"]"#.to_string(),
            style_tags: r#"["minimal","bright"]"#.to_string(),
            embedding_model: "ViT-B/32".to_string(),
        }
    }

    fn annotation(id: &str, virality: f64) -> AnnotationRow {
        AnnotationRow {
            creative_id: id.to_string(),
            model_name: "gpt-4o".to_string(),
            prompt_version: "v1.0".to_string(),
            annotation_version: "v1.0".to_string(),
            hook_type: "question".to_string(),
            hook_text: "Want to know my secret?".to_string(),
            hook_strength_score: 0.85,
            cta_type: "link_bio".to_string(),
            cta_clarity_score: 0.9,
            sentiment_overall: "positive".to_string(),
            pacing_style: "medium".to_string(),
            virality_score: virality,
        }
    }

    fn count(db: &Database, table: &str) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get(0)
            })?)
        })
        .unwrap()
    }

    #[test]
    fn test_vision_upsert_is_idempotent() {
        let db = test_db();
        upsert_vision_features(&db, &vision("c-1", 3)).unwrap();
        upsert_vision_features(&db, &vision("c-1", 3)).unwrap();

        assert_eq!(count(&db, "creative_vision_features"), 1);
        assert_eq!(find_vision_features(&db, "c-1").unwrap().unwrap(), vision("c-1", 3));
    }

    #[test]
    fn test_vision_upsert_overwrites() {
        let db = test_db();
        upsert_vision_features(&db, &vision("c-1", 3)).unwrap();
        upsert_vision_features(&db, &vision("c-1", 5)).unwrap();

        let row = find_vision_features(&db, "c-1").unwrap().unwrap();
        assert_eq!(row.num_shots, 5);
    }

    #[test]
    fn test_annotation_upsert_is_idempotent() {
        let db = test_db();
        upsert_annotation(&db, &annotation("c-1", 0.72)).unwrap();
        upsert_annotation(&db, &annotation("c-1", 0.72)).unwrap();

        assert_eq!(count(&db, "creative_llm_annotations"), 1);
        assert_eq!(
            find_annotation(&db, "c-1").unwrap().unwrap(),
            annotation("c-1", 0.72)
        );
    }

    #[test]
    fn test_find_missing_rows() {
        let db = test_db();
        assert!(find_vision_features(&db, "c-404").unwrap().is_none());
        assert!(find_annotation(&db, "c-404").unwrap().is_none());
    }
}
