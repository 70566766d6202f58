//! Entry point for "give me my watermarked copy" requests.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::ResultCache;
use crate::db::{asset_repo, processed_repo, Database, DatabaseError};
use crate::model::{Asset, ProcessedAsset, ProcessingStatus, UserIdentity};
use crate::queue::{Job, JobQueue, QueueError};
use crate::sanitize::is_safe_identifier;

/// Times a request re-inspects a row that vanished under it.
const MAX_ATTEMPTS: usize = 3;

/// How long a row may sit in `queued` or `processing` without any update
/// before a request treats its job as lost.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid user identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Asset {0} not found")]
    NotFound(i64),

    #[error("Asset {asset_id} has unsupported media type '{media_type}'")]
    UnsupportedMediaType { asset_id: i64, media_type: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to enqueue job: {0}")]
    Enqueue(#[from] QueueError),

    #[error("Asset {asset_id} for user {user_id} changed state too often to settle")]
    Contended { asset_id: i64, user_id: String },
}

impl OrchestratorError {
    /// HTTP status the upstream handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_) => 400,
            Self::NotFound(_) => 404,
            Self::UnsupportedMediaType { .. } => 415,
            Self::Database(_) | Self::Enqueue(_) | Self::Contended { .. } => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The watermarked copy is on disk and can be streamed.
    Ready {
        cache_path: PathBuf,
        download_name: String,
    },
    /// A new job was enqueued by this request.
    Queued { job_id: String },
    /// Work for the pair is already queued or running.
    InProgress {
        status: ProcessingStatus,
        job_id: Option<String>,
    },
}

impl RequestOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ready { .. } => 200,
            Self::Queued { .. } => 201,
            Self::InProgress { .. } => 202,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    queue: JobQueue,
    cache: ResultCache,
    stale_after: Duration,
}

impl Orchestrator {
    pub fn new(db: Database, queue: JobQueue, cache: ResultCache) -> Self {
        Self {
            db,
            queue,
            cache,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Serves the cached copy, or makes sure exactly one job is working on it.
    pub fn request(
        &self,
        asset_id: i64,
        user: &UserIdentity,
    ) -> Result<RequestOutcome, OrchestratorError> {
        let _span =
            tracing::info_span!("orchestrator.request", asset_id, user_id = %user.id).entered();

        validate_user_id(&user.id)?;

        let asset = asset_repo::find_by_id(&self.db, asset_id)?
            .ok_or(OrchestratorError::NotFound(asset_id))?;
        let kind = asset
            .media_kind()
            .ok_or_else(|| OrchestratorError::UnsupportedMediaType {
                asset_id,
                media_type: describe_media_type(&asset),
            })?;

        for _ in 0..MAX_ATTEMPTS {
            let job = Job::new(&asset, kind, user);
            let (row, inserted) =
                processed_repo::insert_if_absent(&self.db, asset.id, &user.id, &job.id)?;

            if inserted {
                log::info!("Queuing asset {} for user {}", asset.id, user.id);
                return self.enqueue(row.id, job);
            }

            let outcome = match row.status {
                ProcessingStatus::Completed => match &row.cache_path {
                    Some(path) if self.cache.is_present(path) => {
                        return Ok(RequestOutcome::Ready {
                            cache_path: path.clone(),
                            download_name: asset.download_name(),
                        });
                    }
                    _ => {
                        log::info!(
                            "Cached copy of asset {} for user {} is gone, re-queuing",
                            asset.id,
                            user.id
                        );
                        self.requeue(&row, job, None)?
                    }
                },
                ProcessingStatus::Failed => {
                    log::info!(
                        "Retrying failed asset {} for user {}: {}",
                        asset.id,
                        user.id,
                        row.error_msg.as_deref().unwrap_or("unknown error")
                    );
                    self.requeue(&row, job, None)?
                }
                ProcessingStatus::Queued | ProcessingStatus::Processing => {
                    let cutoff = self.stale_cutoff();
                    if row.updated_at < cutoff {
                        log::warn!(
                            "Asset {} for user {} has been {} since {}, re-queuing",
                            asset.id,
                            user.id,
                            row.status,
                            row.updated_at
                        );
                        self.requeue(&row, job, Some(cutoff))?
                    } else {
                        Some(RequestOutcome::InProgress {
                            status: row.status,
                            job_id: row.job_id,
                        })
                    }
                }
            };

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }

        Err(OrchestratorError::Contended {
            asset_id,
            user_id: user.id.clone(),
        })
    }

    /// Resets `row` to queued and enqueues `job`. With `stale_before`, the
    /// reset also requires the row to be untouched since then. If another
    /// caller moved the row first, reports its current state instead. `None`
    /// means the row disappeared and the request should start over.
    fn requeue(
        &self,
        row: &ProcessedAsset,
        job: Job,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<Option<RequestOutcome>, OrchestratorError> {
        let won = match stale_before {
            Some(cutoff) => {
                processed_repo::requeue_stale(&self.db, row.id, row.status, cutoff, &job.id)?
            }
            None => processed_repo::requeue(&self.db, row.id, row.status, &job.id)?,
        };
        if won {
            return self.enqueue(row.id, job).map(Some);
        }

        Ok(processed_repo::find_by_id(&self.db, row.id)?.map(|current| {
            RequestOutcome::InProgress {
                status: current.status,
                job_id: current.job_id,
            }
        }))
    }

    fn enqueue(&self, row_id: i64, job: Job) -> Result<RequestOutcome, OrchestratorError> {
        if let Err(e) = self.queue.enqueue(&job) {
            log::error!("Failed to enqueue job {}: {}", job.id, e);
            let message = format!("Failed to enqueue job: {}", e);
            if let Err(db_err) = processed_repo::mark_failed(&self.db, row_id, &job.id, &message) {
                log::error!("Failed to mark processed asset {} failed: {}", row_id, db_err);
            }
            return Err(OrchestratorError::Enqueue(e));
        }

        if let Err(e) = self.queue.set_job_status(&job.id, ProcessingStatus::Queued) {
            log::warn!("Failed to mirror status of job {}: {}", job.id, e);
        }
        Ok(RequestOutcome::Queued { job_id: job.id })
    }

    fn stale_cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Current processing row for the pair, if any.
    pub fn status(
        &self,
        asset_id: i64,
        user_id: &str,
    ) -> Result<Option<ProcessedAsset>, OrchestratorError> {
        validate_user_id(user_id)?;
        Ok(processed_repo::find_by_pair(&self.db, asset_id, user_id)?)
    }

    /// Every processing row, newest first.
    pub fn list_processing(&self) -> Result<Vec<ProcessedAsset>, OrchestratorError> {
        Ok(processed_repo::list(&self.db)?)
    }
}

fn validate_user_id(user_id: &str) -> Result<(), OrchestratorError> {
    if is_safe_identifier(user_id) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidIdentifier(user_id.to_string()))
    }
}

fn describe_media_type(asset: &Asset) -> String {
    asset
        .content_type
        .clone()
        .or_else(|| {
            asset
                .path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
