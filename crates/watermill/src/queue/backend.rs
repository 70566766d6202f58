//! Transport primitives behind the job queue.
//!
//! A backend offers a named FIFO list with push / blocking pop, and a small
//! expiring key/value area used to mirror job status for cheap polling.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::error::QueueError;
use crate::db::{timestamp, Database};

pub trait QueueBackend: Send + Sync {
    /// Appends `payload` to the tail of `list_key`.
    fn push(&self, list_key: &str, payload: &str) -> Result<(), QueueError>;

    /// Removes and returns the oldest payload of `list_key`, waiting up to
    /// `timeout` for one to arrive. `Duration::MAX` waits indefinitely.
    fn pop(&self, list_key: &str, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Number of payloads waiting in `list_key`.
    fn pending(&self, list_key: &str) -> Result<usize, QueueError>;

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError>;

    /// Returns the value for `key` unless it is missing or expired.
    fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Drops expired key/value entries, returning how many were removed.
    fn purge_expired(&self) -> Result<usize, QueueError>;
}

/// Deadline for a wait of `timeout`; `None` means no deadline.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Durable backend storing the lists in the SQLite database.
///
/// Every process that opens the same database file shares the queue. Pops
/// are a single `DELETE … RETURNING` statement, so one consumer wins each
/// item. Waiters in this process are woken on push; pushes from other
/// processes are observed by polling every `poll_interval`.
pub struct SqliteBackend {
    db: Database,
    poll_interval: Duration,
    // Push generation counter, bumped on every local push.
    signal: Arc<(Mutex<u64>, Condvar)>,
}

impl SqliteBackend {
    pub fn new(db: Database, poll_interval: Duration) -> Self {
        Self {
            db,
            poll_interval,
            signal: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    fn try_pop(&self, list_key: &str) -> Result<Option<String>, QueueError> {
        let payload = self.db.with_conn(|conn| {
            let payload = conn
                .query_row(
                    "DELETE FROM queue_items
                     WHERE id = (SELECT id FROM queue_items WHERE list_key = ?1 ORDER BY id LIMIT 1)
                     RETURNING payload",
                    params![list_key],
                    |r| r.get::<_, String>(0),
                )
                .optional()?;
            Ok(payload)
        })?;
        Ok(payload)
    }

    fn generation(&self) -> Result<u64, QueueError> {
        let (lock, _) = &*self.signal;
        let generation = lock.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(*generation)
    }
}

impl QueueBackend for SqliteBackend {
    fn push(&self, list_key: &str, payload: &str) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_items (list_key, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![list_key, payload, timestamp(Utc::now())],
            )?;
            Ok(())
        })?;

        let (lock, cvar) = &*self.signal;
        let mut generation = lock.lock().map_err(|_| QueueError::LockPoisoned)?;
        *generation = generation.wrapping_add(1);
        cvar.notify_all();
        Ok(())
    }

    fn pop(&self, list_key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = deadline_after(timeout);

        loop {
            let seen = self.generation()?;
            if let Some(payload) = self.try_pop(list_key)? {
                return Ok(Some(payload));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };

            let (lock, cvar) = &*self.signal;
            let generation = lock.lock().map_err(|_| QueueError::LockPoisoned)?;
            if *generation == seen {
                let _ = cvar
                    .wait_timeout(generation, wait)
                    .map_err(|_| QueueError::LockPoisoned)?;
            }
        }
    }

    fn pending(&self, list_key: &str) -> Result<usize, QueueError> {
        let count = self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_items WHERE list_key = ?1",
                params![list_key],
                |r| r.get(0),
            )?;
            Ok(count)
        })?;
        Ok(count as usize)
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| QueueError::Backend(format!("Invalid expiry for '{}': {}", key, e)))?;
        let expires_at = timestamp(Utc::now() + ttl);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let value = self.db.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                    params![key, timestamp(Utc::now())],
                    |r| r.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })?;
        Ok(value)
    }

    fn purge_expired(&self) -> Result<usize, QueueError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM kv_entries WHERE expires_at <= ?1",
                params![timestamp(Utc::now())],
            )?)
        })?;
        Ok(removed)
    }
}
