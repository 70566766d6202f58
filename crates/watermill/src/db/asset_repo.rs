//! Asset repository - the upload-side records the pipeline reads from.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{conversion_error, parse_timestamp, timestamp, Database, DatabaseError};
use crate::model::{Asset, AssetStatus};

/// Fields supplied by the upload pipeline when it accepts a file.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub name: String,
    pub path: PathBuf,
    pub content_type: Option<String>,
    pub size: i64,
}

impl NewAsset {
    /// Builds a new asset record, guessing the content type from the path.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, size: i64) -> Self {
        let path = path.into();
        let content_type = detect_content_type(&path);
        Self {
            name: name.into(),
            path,
            content_type,
            size,
        }
    }
}

fn detect_content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

fn from_row(row: &Row<'_>) -> Result<Asset, rusqlite::Error> {
    let path: String = row.get("path")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Asset {
        id: row.get("id")?,
        name: row.get("name")?,
        path: PathBuf::from(path),
        content_type: row.get("content_type")?,
        size: row.get("size")?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}

/// Inserts a new asset in `pending` upload state and returns it.
pub fn insert(db: &Database, asset: &NewAsset) -> Result<Asset, DatabaseError> {
    let now = Utc::now();
    let stamp = timestamp(now);
    let id = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO assets (name, path, content_type, size, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                asset.name,
                asset.path.to_string_lossy(),
                asset.content_type,
                asset.size,
                AssetStatus::Pending.as_str(),
                stamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    get(db, id)
}

/// Finds an asset by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<Asset>, DatabaseError> {
    db.with_conn(|conn| {
        let asset = conn
            .query_row(
                "SELECT id, name, path, content_type, size, status, created_at, updated_at
                 FROM assets WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?;
        Ok(asset)
    })
}

/// Like [`find_by_id`] but treats absence as an error.
pub fn get(db: &Database, id: i64) -> Result<Asset, DatabaseError> {
    find_by_id(db, id)?.ok_or_else(|| DatabaseError::RowNotFound {
        table: "assets",
        id: id.to_string(),
    })
}

/// Updates the upload lifecycle status.
pub fn update_status(db: &Database, id: i64, status: AssetStatus) -> Result<(), DatabaseError> {
    let changed = db.with_conn(|conn| {
        Ok(conn.execute(
            "UPDATE assets SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), timestamp(Utc::now())],
        )?)
    })?;
    if changed == 0 {
        return Err(DatabaseError::RowNotFound {
            table: "assets",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaKind;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let asset = insert(&db, &NewAsset::new("Report", "/uploads/report.pdf", 2048)).unwrap();

        let found = find_by_id(&db, asset.id).unwrap().unwrap();
        assert_eq!(found.name, "Report");
        assert_eq!(found.path, PathBuf::from("/uploads/report.pdf"));
        assert_eq!(found.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(found.size, 2048);
        assert_eq!(found.status, AssetStatus::Pending);
        assert_eq!(found.media_kind(), Some(MediaKind::Document));
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 42).unwrap().is_none());
        assert!(matches!(
            get(&db, 42),
            Err(DatabaseError::RowNotFound { table: "assets", .. })
        ));
    }

    #[test]
    fn test_unknown_extension_has_no_content_type() {
        let asset = NewAsset::new("blob", "/uploads/blob.xyz123", 1);
        assert!(asset.content_type.is_none());
    }

    #[test]
    fn test_update_status() {
        let db = test_db();
        let asset = insert(&db, &NewAsset::new("Clip", "/uploads/clip.mp4", 10)).unwrap();

        update_status(&db, asset.id, AssetStatus::Completed).unwrap();
        assert_eq!(get(&db, asset.id).unwrap().status, AssetStatus::Completed);

        assert!(update_status(&db, 999, AssetStatus::Failed).is_err());
    }
}
