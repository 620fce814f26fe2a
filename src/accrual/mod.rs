//! Accrual dispatcher: periodically fans open orders out to the worker
//! pool and applies the answers in batches.
//!
//! One background coroutine owns the result channel. Each tick submits one
//! poll task per open order; results accumulate between ticks and are
//! applied as a pair of batch calls (statuses, then the non-zero accruals).
//! Applying the same reply twice is harmless: terminal orders drop out of
//! the open set and the credit insert is guarded in SQL.

pub mod client;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::cache::MemCache;
use crate::models::AccrualReply;
use crate::store::StoreError;
use crate::workerpool::{Task, WorkerPool, TASK_QUEUE_CAPACITY};

pub use client::{AccrualClient, ClientError, External};

/// Default dispatcher tick, milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Matches the task queue so workers pushing results can never deadlock
/// against the dispatcher submitting tasks.
const RESULT_QUEUE_CAPACITY: usize = TASK_QUEUE_CAPACITY;

/// Poll one order number against the external service and forward the
/// reply into the dispatcher's result channel.
struct PollTask {
    number: String,
    external: Arc<dyn External>,
    results: mpsc::Sender<AccrualReply>,
}

#[async_trait]
impl Task for PollTask {
    fn id(&self) -> &str {
        &self.number
    }

    async fn run(&self) -> anyhow::Result<()> {
        let reply = self
            .external
            .order_accrual(&self.number)
            .await
            .with_context(|| format!("poll order {}", self.number))?;

        self.results
            .send(reply)
            .await
            .context("result channel closed")?;
        Ok(())
    }
}

pub struct AccrualService {
    cache: Arc<MemCache>,
    pool: Arc<WorkerPool>,
    external: Arc<dyn External>,
    interval: Duration,
    results_tx: mpsc::Sender<AccrualReply>,
    results_rx: std::sync::Mutex<Option<mpsc::Receiver<AccrualReply>>>,
}

impl AccrualService {
    pub fn new(
        cache: Arc<MemCache>,
        pool: Arc<WorkerPool>,
        external: Arc<dyn External>,
        interval: Duration,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(RESULT_QUEUE_CAPACITY);
        Self {
            cache,
            pool,
            external,
            interval,
            results_tx,
            results_rx: std::sync::Mutex::new(Some(results_rx)),
        }
    }

    /// The dispatcher loop. Exits when `shutdown` flips to true; in-flight
    /// poll tasks finish inside the worker pool, their late results are
    /// simply dropped with the channel.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut results) = self.results_rx.lock().unwrap().take() else {
            tracing::warn!("accrual dispatcher already running");
            return;
        };

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buffer: Vec<AccrualReply> = Vec::new();
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "accrual dispatcher started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(reply) = results.recv() => {
                    buffer.push(reply);
                }
                _ = ticker.tick() => {
                    self.poll_open_orders().await;

                    if !buffer.is_empty() {
                        self.apply(&buffer).await;
                        buffer.clear();
                    }
                }
            }
        }

        tracing::info!("accrual dispatcher stopped");
    }

    /// Submit one poll task per open order. A full task queue blocks here,
    /// which is the intended backpressure on a slow external service.
    async fn poll_open_orders(&self) {
        let numbers = match self.cache.open_orders().await {
            Ok(numbers) => numbers,
            Err(StoreError::Unavailable) => {
                tracing::debug!("skipping poll, store not configured");
                return;
            }
            Err(e) => {
                tracing::warn!("cannot list open orders: {e}");
                return;
            }
        };

        for number in numbers {
            let task = Arc::new(PollTask {
                number,
                external: Arc::clone(&self.external),
                results: self.results_tx.clone(),
            });

            if let Err(e) = self.pool.add_task(task).await {
                tracing::warn!("cannot submit poll task: {e}");
                return;
            }
        }
    }

    /// Two-step batch apply: order statuses first, then a ledger credit for
    /// every reply that actually carries points.
    async fn apply(&self, replies: &[AccrualReply]) {
        if let Err(e) = self.cache.update_order_statuses(replies).await {
            tracing::warn!("errors when updating order statuses: {e}");
        }

        let credits = credited(replies);
        if credits.is_empty() {
            return;
        }

        if let Err(e) = self.cache.insert_accruals(&credits).await {
            tracing::warn!("errors when inserting accruals: {e}");
        }
    }
}

/// Replies with a non-zero accrual, keyed by order number. A later reply
/// for the same number within one batch wins.
fn credited(replies: &[AccrualReply]) -> HashMap<String, AccrualReply> {
    replies
        .iter()
        .filter(|r| !r.accrual.is_zero())
        .map(|r| (r.order.clone(), r.clone()))
        .collect()
}
