use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::processor::{process_job, WorkerContext};

struct WorkerHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Fixed set of threads pulling jobs from the queue.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. Each one waits at most `poll_interval`
    /// on the queue before re-checking its stop signal.
    pub fn start(
        ctx: Arc<WorkerContext>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be greater than zero".to_string(),
            ));
        }

        let mut pool = Self {
            workers: Vec::with_capacity(worker_count),
        };

        for worker_id in 0..worker_count {
            let (stop_tx, stop_rx) = bounded::<()>(1);
            let worker_ctx = Arc::clone(&ctx);

            let spawned = thread::Builder::new()
                .name(format!("watermill-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, worker_ctx, stop_rx, poll_interval));

            match spawned {
                Ok(thread) => pool.workers.push(WorkerHandle {
                    stop: stop_tx,
                    thread,
                }),
                Err(e) => {
                    pool.shutdown();
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker and waits for all of them. A job that is being
    /// processed runs to completion first.
    pub fn shutdown(self) {
        info!("Shutting down worker pool...");

        for worker in &self.workers {
            let _ = worker.stop.try_send(());
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.thread.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn should_stop(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn run_worker(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    stop: Receiver<()>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if should_stop(&stop) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match ctx.queue.dequeue_timeout(poll_interval) {
            Ok(Some(job)) => {
                debug!("Worker {} processing job {}", worker_id, job.id);
                process_job(&ctx, &job);
            }
            Ok(None) => {}
            Err(e) => {
                error!("Worker {} failed to dequeue: {}", worker_id, e);
                // Back off before the next attempt.
                match stop.recv_timeout(poll_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        }
    }

    debug!("Worker {} exiting", worker_id);
}
