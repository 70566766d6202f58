//! Wiring of the store, queue, cache, worker pool and reaper into one
//! running pipeline.

use std::sync::Arc;

use crate::cache::{CacheReaper, ReaperHandle, ResultCache};
use crate::config::{validate_config, Config};
use crate::db::Database;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::queue::{JobQueue, QueueBackend, SqliteBackend};
use crate::watermark::WatermarkRegistry;
use crate::worker::{WorkerContext, WorkerPool};

pub struct Service {
    db: Database,
    queue: JobQueue,
    orchestrator: Orchestrator,
    pool: WorkerPool,
    reaper: ReaperHandle,
}

impl Service {
    /// Opens the database named in `config`, queues jobs in it and uses the
    /// lopdf/ffmpeg transforms.
    pub fn start(config: &Config) -> Result<Self> {
        validate_config(config)?;

        let db = Database::open(&config.database_path)?;
        let backend: Arc<dyn QueueBackend> =
            Arc::new(SqliteBackend::new(db.clone(), config.queue.poll_interval()));
        let registry = WatermarkRegistry::new(&config.watermark);

        Self::start_with(config, db, backend, registry)
    }

    /// Starts the pipeline on explicit components.
    pub fn start_with(
        config: &Config,
        db: Database,
        backend: Arc<dyn QueueBackend>,
        registry: WatermarkRegistry,
    ) -> Result<Self> {
        validate_config(config)?;

        let queue = JobQueue::new(backend, config.queue.list_key.clone())
            .with_status_ttl(config.queue.status_ttl());
        let cache = ResultCache::new(&config.cache_directory);
        cache.ensure_dir()?;

        let ctx = Arc::new(WorkerContext {
            db: db.clone(),
            queue: queue.clone(),
            cache: cache.clone(),
            registry,
        });
        let pool = WorkerPool::start(ctx, config.worker_count, config.queue.poll_interval())?;

        let reaper = CacheReaper::new(
            db.clone(),
            queue.clone(),
            cache.clone(),
            config.reaper.interval(),
            config.reaper.retention(),
        );
        let reaper = match reaper.start() {
            Ok(handle) => handle,
            Err(e) => {
                pool.shutdown();
                return Err(e.into());
            }
        };

        let orchestrator = Orchestrator::new(db.clone(), queue.clone(), cache)
            .with_stale_after(config.queue.stale_after());

        log::info!(
            "Watermill started: {} workers, cache at {}",
            pool.size(),
            config.cache_directory.display()
        );

        Ok(Self {
            db,
            queue,
            orchestrator,
            pool,
            reaper,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Stops the reaper, then lets every worker finish its current job.
    /// Jobs still waiting in the queue stay there for the next start.
    pub fn shutdown(self) {
        log::info!("Shutting down watermill...");
        self.reaper.stop();
        self.pool.shutdown();
        log::info!("Watermill stopped");
    }
}
