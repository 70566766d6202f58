//! Process-local backend for embedding the pipeline without a shared store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::backend::{deadline_after, QueueBackend};
use super::error::QueueError;

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    entries: HashMap<String, (String, Instant)>,
}

/// In-memory lists and expiring entries. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    available: Condvar,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueBackend for MemoryBackend {
    fn push(&self, list_key: &str, payload: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;
        state
            .lists
            .entry(list_key.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.available.notify_all();
        Ok(())
    }

    fn pop(&self, list_key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;

        loop {
            if let Some(payload) = state.lists.get_mut(list_key).and_then(VecDeque::pop_front) {
                return Ok(Some(payload));
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| QueueError::LockPoisoned)?
                        .0
                }
                None => self
                    .available
                    .wait(state)
                    .map_err(|_| QueueError::LockPoisoned)?,
            };
        }
    }

    fn pending(&self, list_key: &str) -> Result<usize, QueueError> {
        let state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(state.lists.get(list_key).map_or(0, VecDeque::len))
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| QueueError::Backend(format!("Invalid expiry for '{}'", key)))?;
        let mut state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;
        state
            .entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    fn purge_expired(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::LockPoisoned)?;
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - state.entries.len())
    }
}
