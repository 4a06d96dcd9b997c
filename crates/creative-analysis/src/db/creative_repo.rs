//! Creative repository for the `creatives` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw creative row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct CreativeRow {
    pub creative_id: String,
    pub storage_uri: String,
    pub media_type: String,
    pub niche: String,
    pub platform: String,
    pub analysis_status: String,
    pub analysis_completed_at: Option<String>,
}

impl CreativeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            creative_id: row.get("creative_id")?,
            storage_uri: row.get("storage_uri")?,
            media_type: row.get("media_type")?,
            niche: row.get("niche")?,
            platform: row.get("platform")?,
            analysis_status: row.get("analysis_status")?,
            analysis_completed_at: row.get("analysis_completed_at")?,
        })
    }
}

/// Inserts a creative, replacing any existing row with the same ID.
pub fn upsert(db: &Database, creative: &CreativeRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO creatives (creative_id, storage_uri, media_type, niche, platform,
             analysis_status, analysis_completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(creative_id) DO UPDATE SET
                storage_uri = excluded.storage_uri,
                media_type = excluded.media_type,
                niche = excluded.niche,
                platform = excluded.platform,
                analysis_status = excluded.analysis_status,
                analysis_completed_at = excluded.analysis_completed_at,
                updated_at = datetime('now')",
            params![
                creative.creative_id,
                creative.storage_uri,
                creative.media_type,
                creative.niche,
                creative.platform,
                creative.analysis_status,
                creative.analysis_completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a creative by its ID.
pub fn find_by_id(db: &Database, creative_id: &str) -> Result<Option<CreativeRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT creative_id, storage_uri, media_type, niche, platform, analysis_status,
             analysis_completed_at FROM creatives WHERE creative_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![creative_id], CreativeRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Sets `analysis_status`; `completed_at` is only written when provided.
///
/// Returns the number of rows changed (0 when the creative does not exist).
pub fn update_status(
    db: &Database,
    creative_id: &str,
    status: &str,
    completed_at: Option<&str>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = match completed_at {
            Some(ts) => conn.execute(
                "UPDATE creatives SET analysis_status = ?2, analysis_completed_at = ?3,
                 updated_at = datetime('now') WHERE creative_id = ?1",
                params![creative_id, status, ts],
            )?,
            None => conn.execute(
                "UPDATE creatives SET analysis_status = ?2, updated_at = datetime('now')
                 WHERE creative_id = ?1",
                params![creative_id, status],
            )?,
        };
        Ok(changed)
    })
}

/// Counts creatives with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM creatives WHERE analysis_status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(id: &str) -> CreativeRow {
        CreativeRow {
            creative_id: id.to_string(),
            storage_uri: format!("gs://ltk-trending/videos/{}.mp4", id),
            media_type: "video".to_string(),
            niche: "beauty".to_string(),
            platform: "tiktok".to_string(),
            analysis_status: "pending".to_string(),
            analysis_completed_at: None,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = test_db();
        upsert(&db, &sample("c-1")).unwrap();

        let found = find_by_id(&db, "c-1").unwrap().unwrap();
        assert_eq!(found, sample("c-1"));
        assert!(find_by_id(&db, "c-404").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let db = test_db();
        upsert(&db, &sample("c-1")).unwrap();

        let mut changed = sample("c-1");
        changed.niche = "fitness".to_string();
        upsert(&db, &changed).unwrap();

        assert_eq!(find_by_id(&db, "c-1").unwrap().unwrap().niche, "fitness");
    }

    #[test]
    fn test_update_status_without_timestamp_keeps_previous() {
        let db = test_db();
        upsert(&db, &sample("c-1")).unwrap();

        update_status(&db, "c-1", "completed", Some("2026-01-01T00:00:00Z")).unwrap();
        update_status(&db, "c-1", "processing", None).unwrap();

        let row = find_by_id(&db, "c-1").unwrap().unwrap();
        assert_eq!(row.analysis_status, "processing");
        assert_eq!(
            row.analysis_completed_at.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_update_status_missing_creative() {
        let db = test_db();
        assert_eq!(update_status(&db, "c-404", "failed", None).unwrap(), 0);
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        upsert(&db, &sample("c-1")).unwrap();
        upsert(&db, &sample("c-2")).unwrap();
        update_status(&db, "c-2", "failed", None).unwrap();

        assert_eq!(count_by_status(&db, "pending").unwrap(), 1);
        assert_eq!(count_by_status(&db, "failed").unwrap(), 1);
    }
}
