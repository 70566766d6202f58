//! Processed-asset repository - the per-(asset, user) watermark state rows.
//!
//! Every state transition is a single statement so that concurrent callers
//! (orchestrator requests, workers, the reaper, other processes sharing the
//! database file) converge without in-memory locks. Transitions that depend
//! on the current status are compare-and-set: they report whether they won.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{conversion_error, parse_timestamp, timestamp, Database, DatabaseError};
use crate::model::{ProcessedAsset, ProcessingStatus};

const COLUMNS: &str = "id, asset_id, user_id, status, cache_path, processed_at, error_msg, \
                       job_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<ProcessedAsset, rusqlite::Error> {
    let status: String = row.get("status")?;
    let cache_path: Option<String> = row.get("cache_path")?;
    let processed_at: Option<String> = row.get("processed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ProcessedAsset {
        id: row.get("id")?,
        asset_id: row.get("asset_id")?,
        user_id: row.get("user_id")?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        cache_path: cache_path.map(PathBuf::from),
        processed_at: processed_at
            .map(|p| parse_timestamp(5, &p))
            .transpose()?,
        error_msg: row.get("error_msg")?,
        job_id: row.get("job_id")?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}

fn select_by_pair(
    conn: &Connection,
    asset_id: i64,
    user_id: &str,
) -> Result<Option<ProcessedAsset>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM processed_assets WHERE asset_id = ?1 AND user_id = ?2"),
        params![asset_id, user_id],
        from_row,
    )
    .optional()
}

/// Creates the row for (asset, user) in `queued` state unless one exists.
///
/// Returns the row that is now stored and whether this call created it.
/// The unique constraint on the pair makes the insert the arbiter: of two
/// concurrent callers exactly one sees `true`.
pub fn insert_if_absent(
    db: &Database,
    asset_id: i64,
    user_id: &str,
    job_id: &str,
) -> Result<(ProcessedAsset, bool), DatabaseError> {
    let stamp = timestamp(Utc::now());
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT INTO processed_assets (asset_id, user_id, status, job_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (asset_id, user_id) DO NOTHING",
            params![
                asset_id,
                user_id,
                ProcessingStatus::Queued.as_str(),
                job_id,
                stamp
            ],
        )? == 1;

        let row = select_by_pair(conn, asset_id, user_id)?.ok_or_else(|| {
            DatabaseError::RowNotFound {
                table: "processed_assets",
                id: format!("{asset_id}/{user_id}"),
            }
        })?;
        Ok((row, inserted))
    })
}

/// Finds the row for an (asset, user) pair.
pub fn find_by_pair(
    db: &Database,
    asset_id: i64,
    user_id: &str,
) -> Result<Option<ProcessedAsset>, DatabaseError> {
    db.with_conn(|conn| Ok(select_by_pair(conn, asset_id, user_id)?))
}

/// Finds a row by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ProcessedAsset>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM processed_assets WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists every row, newest first.
pub fn list(db: &Database) -> Result<Vec<ProcessedAsset>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM processed_assets ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a row back to `queued` if it is still in `from`, clearing the
/// completion and failure fields and recording the new job id.
pub fn requeue(
    db: &Database,
    id: i64,
    from: ProcessingStatus,
    job_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets
             SET status = ?3, cache_path = NULL, processed_at = NULL, error_msg = NULL,
                 job_id = ?4, updated_at = ?5
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                from.as_str(),
                ProcessingStatus::Queued.as_str(),
                job_id,
                timestamp(Utc::now())
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Like [`requeue`], but only if the row has not been touched since
/// `stale_before`. Recovers pairs whose job was lost.
pub fn requeue_stale(
    db: &Database,
    id: i64,
    from: ProcessingStatus,
    stale_before: DateTime<Utc>,
    job_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets
             SET status = ?3, cache_path = NULL, processed_at = NULL, error_msg = NULL,
                 job_id = ?4, updated_at = ?5
             WHERE id = ?1 AND status = ?2 AND updated_at < ?6",
            params![
                id,
                from.as_str(),
                ProcessingStatus::Queued.as_str(),
                job_id,
                timestamp(Utc::now()),
                timestamp(stale_before)
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Claims the pair for processing: `queued → processing`.
///
/// Returns `None` when the row is missing or not queued, which means the
/// job that asked for it is stale.
pub fn claim(
    db: &Database,
    asset_id: i64,
    user_id: &str,
) -> Result<Option<ProcessedAsset>, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets SET status = ?3, updated_at = ?4
             WHERE asset_id = ?1 AND user_id = ?2 AND status = ?5",
            params![
                asset_id,
                user_id,
                ProcessingStatus::Processing.as_str(),
                timestamp(Utc::now()),
                ProcessingStatus::Queued.as_str()
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(select_by_pair(conn, asset_id, user_id)?)
    })
}

/// Records a successful run of `job_id`.
///
/// Returns `false` if the row has since been handed to another job, in
/// which case nothing is written.
pub fn mark_completed(
    db: &Database,
    id: i64,
    job_id: &str,
    cache_path: &Path,
    processed_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets
             SET status = ?3, cache_path = ?4, processed_at = ?5, error_msg = NULL, updated_at = ?6
             WHERE id = ?1 AND job_id = ?2",
            params![
                id,
                job_id,
                ProcessingStatus::Completed.as_str(),
                cache_path.to_string_lossy(),
                timestamp(processed_at),
                timestamp(Utc::now())
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Records a failed run of `job_id` (or a job that never made it onto the
/// queue). Same ownership rule as [`mark_completed`].
pub fn mark_failed(
    db: &Database,
    id: i64,
    job_id: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets
             SET status = ?3, error_msg = ?4, cache_path = NULL, processed_at = NULL, updated_at = ?5
             WHERE id = ?1 AND job_id = ?2",
            params![
                id,
                job_id,
                ProcessingStatus::Failed.as_str(),
                error,
                timestamp(Utc::now())
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Fails the pair if `job_id` still owns it and has not finished.
///
/// Used when a worker holds a job but could not claim its row, so that the
/// row is not left waiting for a job that is already gone.
pub fn abandon(
    db: &Database,
    asset_id: i64,
    user_id: &str,
    job_id: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE processed_assets
             SET status = ?4, error_msg = ?5, cache_path = NULL, processed_at = NULL, updated_at = ?6
             WHERE asset_id = ?1 AND user_id = ?2 AND job_id = ?3 AND status IN (?7, ?8)",
            params![
                asset_id,
                user_id,
                job_id,
                ProcessingStatus::Failed.as_str(),
                error,
                timestamp(Utc::now()),
                ProcessingStatus::Queued.as_str(),
                ProcessingStatus::Processing.as_str()
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Completed rows whose `processed_at` is strictly older than `cutoff`.
pub fn find_expired(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ProcessedAsset>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM processed_assets
             WHERE status = ?1 AND processed_at IS NOT NULL AND processed_at < ?2
             ORDER BY processed_at"
        ))?;
        let rows = stmt
            .query_map(
                params![ProcessingStatus::Completed.as_str(), timestamp(cutoff)],
                from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a row if it is still an expired completed entry.
///
/// A row that was re-queued or refreshed since it was selected survives.
pub fn delete_expired(
    db: &Database,
    id: i64,
    cutoff: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM processed_assets
             WHERE id = ?1 AND status = ?2 AND processed_at < ?3",
            params![
                id,
                ProcessingStatus::Completed.as_str(),
                timestamp(cutoff)
            ],
        )?;
        Ok(changed == 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::asset_repo::{self, NewAsset};
    use chrono::Duration;

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let asset = asset_repo::insert(&db, &NewAsset::new("a", "/uploads/a.pdf", 10)).unwrap();
        (db, asset.id)
    }

    #[test]
    fn test_insert_if_absent_creates_once() {
        let (db, asset_id) = test_db();

        let (row, created) = insert_if_absent(&db, asset_id, "u1", "job-1").unwrap();
        assert!(created);
        assert_eq!(row.status, ProcessingStatus::Queued);
        assert_eq!(row.job_id.as_deref(), Some("job-1"));
        assert!(row.cache_path.is_none());
        assert!(row.processed_at.is_none());

        let (again, created) = insert_if_absent(&db, asset_id, "u1", "job-2").unwrap();
        assert!(!created);
        assert_eq!(again.id, row.id);
        assert_eq!(again.job_id.as_deref(), Some("job-1"));

        assert_eq!(list(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_pairs_are_independent() {
        let (db, asset_id) = test_db();
        let (r1, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();
        let (r2, created) = insert_if_absent(&db, asset_id, "u2", "j2").unwrap();
        assert!(created);
        assert_ne!(r1.id, r2.id);
    }

    #[test]
    fn test_concurrent_inserts_create_one_row() {
        let (db, asset_id) = test_db();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    insert_if_absent(&db, asset_id, "u1", &format!("job-{i}"))
                        .unwrap()
                        .1
                })
            })
            .collect();
        let created: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(created, 1);
        assert_eq!(list(&db).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_only_from_queued() {
        let (db, asset_id) = test_db();
        assert!(claim(&db, asset_id, "u1").unwrap().is_none());

        insert_if_absent(&db, asset_id, "u1", "j1").unwrap();
        let claimed = claim(&db, asset_id, "u1").unwrap().unwrap();
        assert_eq!(claimed.status, ProcessingStatus::Processing);

        // Second claim loses.
        assert!(claim(&db, asset_id, "u1").unwrap().is_none());
    }

    #[test]
    fn test_completed_fields_follow_status() {
        let (db, asset_id) = test_db();
        let (row, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();

        assert!(mark_completed(&db, row.id, "j1", Path::new("/cache/u1/a.pdf"), Utc::now()).unwrap());
        let done = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.cache_path, Some(PathBuf::from("/cache/u1/a.pdf")));
        assert!(done.processed_at.is_some());

        assert!(requeue(&db, row.id, ProcessingStatus::Completed, "j2").unwrap());
        let queued = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(queued.status, ProcessingStatus::Queued);
        assert!(queued.cache_path.is_none());
        assert!(queued.processed_at.is_none());
        assert_eq!(queued.job_id.as_deref(), Some("j2"));
    }

    #[test]
    fn test_failed_clears_completion_and_requeue_clears_error() {
        let (db, asset_id) = test_db();
        let (row, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();

        assert!(mark_failed(&db, row.id, "j1", "ffmpeg exploded").unwrap());
        let failed = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.error_msg.as_deref(), Some("ffmpeg exploded"));
        assert!(failed.cache_path.is_none());

        // Wrong expected status loses the compare-and-set.
        assert!(!requeue(&db, row.id, ProcessingStatus::Completed, "j2").unwrap());
        assert!(requeue(&db, row.id, ProcessingStatus::Failed, "j2").unwrap());
        let queued = find_by_id(&db, row.id).unwrap().unwrap();
        assert!(queued.error_msg.is_none());
    }

    #[test]
    fn test_find_and_delete_expired() {
        let (db, asset_id) = test_db();
        let now = Utc::now();
        let (old, _) = insert_if_absent(&db, asset_id, "old", "j1").unwrap();
        let (fresh, _) = insert_if_absent(&db, asset_id, "fresh", "j2").unwrap();
        let (queued, _) = insert_if_absent(&db, asset_id, "queued", "j3").unwrap();

        mark_completed(&db, old.id, "j1", Path::new("/c/old"), now - Duration::hours(2)).unwrap();
        mark_completed(&db, fresh.id, "j2", Path::new("/c/fresh"), now).unwrap();

        let cutoff = now - Duration::hours(1);
        let expired = find_expired(&db, cutoff).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old.id);

        assert!(!delete_expired(&db, fresh.id, cutoff).unwrap());
        assert!(!delete_expired(&db, queued.id, cutoff).unwrap());
        assert!(delete_expired(&db, old.id, cutoff).unwrap());
        assert!(find_by_id(&db, old.id).unwrap().is_none());
    }

    #[test]
    fn test_superseded_job_cannot_finish_row() {
        let (db, asset_id) = test_db();
        let (row, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();
        claim(&db, asset_id, "u1").unwrap().unwrap();
        assert!(requeue(&db, row.id, ProcessingStatus::Processing, "j2").unwrap());

        let late = mark_completed(&db, row.id, "j1", Path::new("/cache/u1/a.pdf"), Utc::now());
        assert!(!late.unwrap());
        assert!(!mark_failed(&db, row.id, "j1", "late").unwrap());
        let current = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(current.status, ProcessingStatus::Queued);
        assert_eq!(current.job_id.as_deref(), Some("j2"));
    }

    #[test]
    fn test_abandon_only_unfinished_rows_of_the_job() {
        let (db, asset_id) = test_db();
        let (row, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();

        assert!(!abandon(&db, asset_id, "u1", "other", "lost").unwrap());
        assert!(abandon(&db, asset_id, "u1", "j1", "lost").unwrap());
        let failed = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(failed.status, ProcessingStatus::Failed);
        assert_eq!(failed.error_msg.as_deref(), Some("lost"));

        // Finished rows are left alone.
        assert!(!abandon(&db, asset_id, "u1", "j1", "again").unwrap());
    }

    #[test]
    fn test_requeue_stale_respects_cutoff() {
        let (db, asset_id) = test_db();
        let (row, _) = insert_if_absent(&db, asset_id, "u1", "j1").unwrap();

        let before_insert = row.updated_at - Duration::seconds(1);
        let queued = ProcessingStatus::Queued;
        assert!(!requeue_stale(&db, row.id, queued, before_insert, "j2").unwrap());

        let after_insert = row.updated_at + Duration::seconds(1);
        let processing = ProcessingStatus::Processing;
        assert!(!requeue_stale(&db, row.id, processing, after_insert, "j2").unwrap());
        assert!(requeue_stale(&db, row.id, queued, after_insert, "j2").unwrap());
        let current = find_by_id(&db, row.id).unwrap().unwrap();
        assert_eq!(current.job_id.as_deref(), Some("j2"));
    }
}
