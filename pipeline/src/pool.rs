use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::client::{PredictError, Prediction, Predictor};
use crate::queue::{DispatchTask, QueueReceiver};

/// Where a pool reports finished dispatches.
pub trait DispatchSink: Send + Sync + 'static {
    /// Whether tasks of this session generation should still be dispatched
    /// and their results applied.
    fn is_current(&self, generation: u64) -> bool;

    fn complete(&self, task: &DispatchTask, outcome: Result<Prediction, PredictError>);
}

#[derive(Debug, Default)]
pub struct PoolCounters {
    active: AtomicUsize,
    dispatched: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl PoolCounters {
    /// Requests currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Queued windows dropped without dispatch because their session ended.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }
}

/// Fixed set of workers draining a dispatch queue, one request per window.
///
/// The worker count is the concurrency cap: each worker has at most one
/// request outstanding, and an idle worker is always parked on the queue,
/// so a window starts as soon as a slot frees up. Workers exit once the
/// queue's producer is dropped and the remaining tasks are drained.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn spawn(
        size: usize,
        receiver: Arc<QueueReceiver>,
        predictor: Arc<dyn Predictor>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        let counters = Arc::new(PoolCounters::default());
        let workers = (0..size)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&predictor),
                    Arc::clone(&sink),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        debug!(workers = size, predictor = predictor.name(), "worker pool started");
        Self { workers, counters }
    }

    pub fn counters(&self) -> &Arc<PoolCounters> {
        &self.counters
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "dispatch worker panicked");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<QueueReceiver>,
    predictor: Arc<dyn Predictor>,
    sink: Arc<dyn DispatchSink>,
    counters: Arc<PoolCounters>,
) {
    while let Some(task) = receiver.dequeue().await {
        if !sink.is_current(task.generation) {
            counters.discarded.fetch_add(1, Ordering::SeqCst);
            debug!(
                worker = id,
                window = task.window.seq,
                generation = task.generation,
                "session ended, dropping queued window"
            );
            continue;
        }

        counters.active.fetch_add(1, Ordering::SeqCst);
        counters.dispatched.fetch_add(1, Ordering::SeqCst);
        debug!(
            worker = id,
            window = task.window.seq,
            pending = receiver.len(),
            "dispatching window"
        );

        let outcome = predictor.predict(&task.window).await;
        if outcome.is_err() {
            counters.failed.fetch_add(1, Ordering::SeqCst);
        }
        sink.complete(&task, outcome);

        counters.active.fetch_sub(1, Ordering::SeqCst);
    }
    info!(worker = id, "dispatch worker stopped");
}
