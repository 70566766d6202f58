//! Periodic deletion of expired results.

use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::ResultCache;
use crate::db::{processed_repo, Database, DatabaseError};
use crate::error::WorkerError;
use crate::model::{ProcessedAsset, ProcessingStatus};
use crate::queue::JobQueue;

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Expired rows selected at the start of the pass.
    pub scanned: usize,
    pub removed: usize,
    /// Rows left in place because their file or row could not be deleted.
    pub failed: usize,
}

pub struct CacheReaper {
    db: Database,
    queue: JobQueue,
    cache: ResultCache,
    interval: Duration,
    retention: Duration,
}

impl CacheReaper {
    pub fn new(
        db: Database,
        queue: JobQueue,
        cache: ResultCache,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            db,
            queue,
            cache,
            interval,
            retention,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// One pass against the current time.
    pub fn run_once(&self) -> Result<ReapReport, DatabaseError> {
        self.run_at(Utc::now())
    }

    /// One pass treating `now` as the current time. Rows with
    /// `processed_at` strictly before `now - retention` are deleted.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<ReapReport, DatabaseError> {
        let _span = tracing::info_span!("cache.reap").entered();
        let cutoff = self.cutoff(now);

        let expired = processed_repo::find_expired(&self.db, cutoff)?;
        let mut report = ReapReport {
            scanned: expired.len(),
            ..ReapReport::default()
        };

        for row in &expired {
            if self.reap_row(row, cutoff) {
                report.removed += 1;
            } else {
                report.failed += 1;
            }
        }

        match self.queue.purge_expired_statuses() {
            Ok(0) => {}
            Ok(n) => log::debug!("Purged {} expired job status entries", n),
            Err(e) => log::warn!("Failed to purge job status entries: {}", e),
        }

        if report.scanned > 0 {
            log::info!(
                "Cache reap: {} expired, {} removed, {} failed",
                report.scanned,
                report.removed,
                report.failed
            );
        }
        Ok(report)
    }

    fn reap_row(&self, row: &ProcessedAsset, cutoff: DateTime<Utc>) -> bool {
        // Re-read so a row refreshed since selection keeps its file.
        match processed_repo::find_by_id(&self.db, row.id) {
            Ok(Some(current))
                if current.status == ProcessingStatus::Completed
                    && current.processed_at.is_some_and(|at| at < cutoff) => {}
            Ok(_) => return false,
            Err(e) => {
                log::error!("Failed to re-read processed asset {}: {}", row.id, e);
                return false;
            }
        }

        if let Some(path) = &row.cache_path {
            if let Err(e) = self.cache.remove(path) {
                log::warn!("Keeping processed asset {}: {}", row.id, e);
                return false;
            }
        }

        match processed_repo::delete_expired(&self.db, row.id, cutoff) {
            Ok(deleted) => deleted,
            Err(e) => {
                log::error!("Failed to delete processed asset {}: {}", row.id, e);
                false
            }
        }
    }

    /// Runs [`run_once`](Self::run_once) every interval on a dedicated
    /// thread until the returned handle is stopped. The interval is
    /// measured from the end of the previous pass.
    pub fn start(self) -> Result<ReaperHandle, WorkerError> {
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name("watermill-reaper".to_string())
            .spawn(move || {
                log::info!(
                    "Cache reaper started (interval {:?}, retention {:?})",
                    self.interval,
                    self.retention
                );
                loop {
                    match stop_rx.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = self.run_once() {
                                log::error!("Cache reap failed: {}", e);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("Cache reaper stopped");
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(ReaperHandle { stop_tx, handle })
    }
}

/// Running reaper thread.
pub struct ReaperHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the reaper and waits for an in-progress pass to finish.
    pub fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            log::error!("Cache reaper thread panicked");
        }
    }
}
