use thiserror::Error;

/// Errors from the job queue and its backends.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The job could not be encoded. Always a programming error.
    #[error("Failed to serialize job: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Queue storage error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Queue lock poisoned")]
    LockPoisoned,
}
