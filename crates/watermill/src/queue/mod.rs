pub mod backend;
pub mod error;
pub mod job;
pub mod memory;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use backend::{QueueBackend, SqliteBackend};
pub use error::QueueError;
pub use job::Job;
pub use memory::MemoryBackend;

use crate::model::ProcessingStatus;

/// Name of the list jobs are pushed to unless configured otherwise.
pub const DEFAULT_LIST_KEY: &str = "processing_queue";

/// How long a mirrored job status stays readable.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Key of the status mirror entry for a job.
pub fn status_key(job_id: &str) -> String {
    format!("job_status:{}", job_id)
}

/// Durable FIFO of serialized [`Job`]s on top of a [`QueueBackend`].
///
/// Cloning is cheap; every clone talks to the same backend handle.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    list_key: String,
    status_ttl: Duration,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, list_key: impl Into<String>) -> Self {
        Self {
            backend,
            list_key: list_key.into(),
            status_ttl: DEFAULT_STATUS_TTL,
        }
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    /// Serializes `job` and appends it to the tail of the queue.
    pub fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        self.backend.push(&self.list_key, &payload)?;
        log::debug!("Enqueued job {} for asset {}", job.id, job.asset_id);
        Ok(())
    }

    /// Blocks until a job is available and returns the oldest one.
    pub fn dequeue(&self) -> Result<Job, QueueError> {
        loop {
            if let Some(job) = self.dequeue_timeout(Duration::MAX)? {
                return Ok(job);
            }
        }
    }

    /// Returns the oldest job, waiting at most `timeout` for one.
    ///
    /// Payloads that do not decode are logged and dropped; the wait goes on
    /// with the next item.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = backend::deadline_after(timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };

            let Some(payload) = self.backend.pop(&self.list_key, remaining)? else {
                return Ok(None);
            };

            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => {
                    log::error!(
                        "Dropping malformed payload from '{}': {} ({} bytes)",
                        self.list_key,
                        e,
                        payload.len()
                    );
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
        }
    }

    /// Number of jobs waiting to be picked up.
    pub fn pending(&self) -> Result<usize, QueueError> {
        self.backend.pending(&self.list_key)
    }

    /// Mirrors a job's status into the expiring key/value area.
    pub fn set_job_status(&self, job_id: &str, status: ProcessingStatus) -> Result<(), QueueError> {
        self.backend
            .set_with_expiry(&status_key(job_id), status.as_str(), self.status_ttl)
    }

    /// Last mirrored status for a job, if it has not expired.
    pub fn job_status(&self, job_id: &str) -> Result<Option<String>, QueueError> {
        self.backend.get(&status_key(job_id))
    }

    pub fn purge_expired_statuses(&self) -> Result<usize, QueueError> {
        self.backend.purge_expired()
    }
}
