//! Bounded worker pool: W workers draining one shared task channel.
//!
//! Submission backpressure comes from the channel bound; a full queue makes
//! `add_task` wait. A queued task is delivered to exactly one worker, in
//! channel order; execution order across workers is unspecified. Worker
//! errors are logged and never reach the submitter.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Capacity of the task queue; the dispatcher's result channel matches it
/// to keep workers and dispatcher from deadlocking on each other.
pub const TASK_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Closed,
}

/// A unit of background work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier used in worker logs.
    fn id(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

pub struct WorkerPool {
    concurrency: usize,
    sender: std::sync::Mutex<Option<mpsc::Sender<Arc<dyn Task>>>>,
    receiver: std::sync::Mutex<Option<mpsc::Receiver<Arc<dyn Task>>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let (tx, rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        Self {
            concurrency: concurrency.max(1),
            sender: std::sync::Mutex::new(Some(tx)),
            receiver: std::sync::Mutex::new(Some(rx)),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Submit a task; waits while the queue is full.
    pub async fn add_task(&self, task: Arc<dyn Task>) -> Result<(), PoolError> {
        let sender = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .cloned()
            .ok_or(PoolError::Closed)?;

        sender.send(task).await.map_err(|_| PoolError::Closed)
    }

    /// Spawn the workers. Calling it twice is a no-op.
    pub fn run_background(&self) {
        let Some(receiver) = self.receiver.lock().unwrap().take() else {
            tracing::warn!("worker pool already running");
            return;
        };

        let shared = Arc::new(Mutex::new(receiver));
        let mut workers = self.workers.lock().unwrap();

        for worker_id in 1..=self.concurrency {
            let queue = Arc::clone(&shared);
            workers.push(tokio::spawn(async move {
                tracing::debug!(worker = worker_id, "worker started");
                loop {
                    let task = { queue.lock().await.recv().await };
                    let Some(task) = task else { break };

                    if let Err(e) = task.run().await {
                        tracing::warn!(worker = worker_id, task = task.id(), "task failed: {e:#}");
                    }
                }
                tracing::debug!(worker = worker_id, "worker stopped");
            }));
        }

        tracing::info!(workers = self.concurrency, "worker pool started");
    }

    /// Close the queue and wait for the workers to drain it and exit.
    pub async fn stop(&self) {
        self.sender.lock().unwrap().take();

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!("worker pool stopped");
    }
}
