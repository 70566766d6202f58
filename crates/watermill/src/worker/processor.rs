//! Handling of a single dequeued job.

use std::path::PathBuf;

use chrono::Utc;

use crate::cache::ResultCache;
use crate::db::{asset_repo, processed_repo, Database};
use crate::error::WorkerError;
use crate::model::ProcessingStatus;
use crate::queue::{Job, JobQueue};
use crate::sanitize::hash_path;
use crate::watermark::{TransformVariant, WatermarkRegistry};

/// Everything a worker needs, shared by all workers of a pool.
pub struct WorkerContext {
    pub db: Database,
    pub queue: JobQueue,
    pub cache: ResultCache,
    pub registry: WatermarkRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        cache_path: PathBuf,
        variant: TransformVariant,
    },
    Failed(String),
    /// The row was missing, not queued, or handed to a newer job, so this
    /// job was stale.
    Skipped,
}

/// Claims, transforms and records one job. Never panics on job errors;
/// failures are written to the row.
pub fn process_job(ctx: &WorkerContext, job: &Job) -> JobOutcome {
    let _span = tracing::info_span!(
        "worker.job",
        job_id = %job.id,
        asset_id = job.asset_id,
        user_id = %job.user_id
    )
    .entered();

    let row = match processed_repo::claim(&ctx.db, job.asset_id, &job.user_id) {
        Ok(Some(row)) => row,
        Ok(None) => {
            log::info!(
                "Skipping job {}: asset {} for user {} is not queued",
                job.id,
                job.asset_id,
                job.user_id
            );
            return JobOutcome::Skipped;
        }
        Err(e) => {
            // The job is off the queue; leave the row failed so the next
            // request retries instead of waiting on it.
            let message = format!("Failed to claim job: {}", e);
            log::error!("Job {}: {}", job.id, message);
            if let Err(e) =
                processed_repo::abandon(&ctx.db, job.asset_id, &job.user_id, &job.id, &message)
            {
                log::error!("Failed to release row of job {}: {}", job.id, e);
            }
            mirror_status(ctx, job, ProcessingStatus::Failed);
            return JobOutcome::Failed(message);
        }
    };
    mirror_status(ctx, job, ProcessingStatus::Processing);

    match watermark(ctx, job) {
        Ok((cache_path, variant)) => {
            let recorded =
                processed_repo::mark_completed(&ctx.db, row.id, &job.id, &cache_path, Utc::now());
            match recorded {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!("Job {} was superseded before it finished", job.id);
                    return JobOutcome::Skipped;
                }
                Err(e) => {
                    let message = format!("Failed to record completion: {}", e);
                    log::error!("Job {}: {}", job.id, message);
                    record_failure(ctx, job, row.id, &message);
                    return JobOutcome::Failed(message);
                }
            }
            mirror_status(ctx, job, ProcessingStatus::Completed);
            log::info!("Job {} completed ({:?})", job.id, variant);
            JobOutcome::Completed {
                cache_path,
                variant,
            }
        }
        Err(e) => {
            let message = e.to_string();
            log::warn!("Job {} failed: {}", job.id, message);
            record_failure(ctx, job, row.id, &message);
            JobOutcome::Failed(message)
        }
    }
}

/// Best effort. A row this leaves behind in `processing` is recovered by
/// the orchestrator once it goes stale.
fn record_failure(ctx: &WorkerContext, job: &Job, row_id: i64, message: &str) {
    match processed_repo::mark_failed(&ctx.db, row_id, &job.id, message) {
        Ok(true) => {}
        Ok(false) => log::warn!("Job {} was superseded before it failed", job.id),
        Err(e) => log::error!("Failed to record failure of job {}: {}", job.id, e),
    }
    mirror_status(ctx, job, ProcessingStatus::Failed);
}

fn watermark(ctx: &WorkerContext, job: &Job) -> crate::Result<(PathBuf, TransformVariant)> {
    let asset = asset_repo::find_by_id(&ctx.db, job.asset_id)?
        .ok_or_else(|| WorkerError::JobFailed(format!("Asset {} no longer exists", job.asset_id)))?;
    let kind = asset.media_kind().ok_or_else(|| {
        WorkerError::JobFailed(format!("Asset {} is not a watermarkable type", asset.id))
    })?;

    let cache_path = ctx.cache.path_for(&job.user_id, &asset.path)?;
    ctx.cache.ensure_parent(&cache_path)?;

    log::debug!("Watermarking source {} ({})", hash_path(&asset.path), kind);
    let variant = ctx
        .registry
        .apply(kind, &asset.path, &cache_path, &job.watermark_label())?;
    Ok((cache_path, variant))
}

fn mirror_status(ctx: &WorkerContext, job: &Job, status: ProcessingStatus) {
    if let Err(e) = ctx.queue.set_job_status(&job.id, status) {
        log::warn!("Failed to mirror status of job {}: {}", job.id, e);
    }
}
