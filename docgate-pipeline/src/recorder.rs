/// Background usage recording
///
/// Request handlers hand finished usage records to [`UsageRecorder::record`],
/// which never waits on storage: records go onto a bounded channel drained by
/// a fixed pool of worker tasks. A full queue drops the record with a
/// warning; the request is never slowed down by analytics.
///
/// # Architecture
///
/// ```text
/// handler ──try_send──> [bounded mpsc] ──> worker 0..N ──append (5 s budget)──> UsageStore
///                                               ▲
///                                  CancellationToken (shutdown: drain, then exit)
/// ```
///
/// # Example
///
/// ```no_run
/// use docgate_pipeline::recorder::{RecorderConfig, UsageRecorder};
/// use docgate_shared::store::Stores;
///
/// # async fn example() {
/// let stores = Stores::in_memory();
/// let (recorder, handle) = UsageRecorder::spawn(stores.usage.clone(), RecorderConfig::default());
///
/// // recorder.record(record) from request handlers...
///
/// handle.shutdown().await; // drains everything still queued
/// # }
/// ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use docgate_shared::models::usage::NewUsageRecord;
use docgate_shared::store::UsageStore;

/// Budget for a single usage write
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Recorder pool configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Number of worker tasks
    pub workers: usize,

    /// Queue capacity
    pub capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            workers: 4,
            capacity: 1024,
        }
    }
}

/// Non-blocking entry point for usage records
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<NewUsageRecord>,
}

/// Owns the worker pool; used to shut it down
pub struct RecorderHandle {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl UsageRecorder {
    /// Starts the worker pool
    pub fn spawn(store: Arc<dyn UsageStore>, config: RecorderConfig) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = CancellationToken::new();

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    store.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            capacity = config.capacity.max(1),
            "Usage recorder started"
        );

        (Self { tx }, RecorderHandle { shutdown, workers })
    }

    /// Queues a record without waiting
    ///
    /// Drops the record with a warning if the queue is full or the pool has
    /// shut down.
    pub fn record(&self, record: NewUsageRecord) {
        if let Err(e) = self.tx.try_send(record) {
            let (reason, record) = match e {
                mpsc::error::TrySendError::Full(record) => ("queue full", record),
                mpsc::error::TrySendError::Closed(record) => ("recorder stopped", record),
            };
            warn!(
                reason,
                user_id = %record.user_id,
                operation = %record.operation_name,
                "Dropping usage record"
            );
        }
    }
}

impl RecorderHandle {
    /// Stops the workers after they drain the queue
    pub async fn shutdown(self) {
        info!("Shutting down usage recorder");
        self.shutdown.cancel();

        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Usage recorder worker panicked");
            }
        }

        info!("Usage recorder stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<NewUsageRecord>>>,
    store: Arc<dyn UsageStore>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Usage recorder worker started");

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                record = rx.recv() => record,
                _ = shutdown.cancelled() => None,
            }
        };

        match next {
            Some(record) => write(&*store, record).await,
            None => break,
        }
    }

    // Drain whatever is still queued
    loop {
        let next = rx.lock().await.try_recv().ok();
        match next {
            Some(record) => write(&*store, record).await,
            None => break,
        }
    }

    debug!(worker_id, "Usage recorder worker stopped");
}

async fn write(store: &dyn UsageStore, record: NewUsageRecord) {
    let user_id = record.user_id.clone();
    let operation = record.operation_name.clone();

    match tokio::time::timeout(WRITE_TIMEOUT, store.append(record)).await {
        Ok(Ok(())) => debug!(user_id = %user_id, operation = %operation, "Usage recorded"),
        Ok(Err(e)) => error!(user_id = %user_id, operation = %operation, error = %e, "Failed to record usage"),
        Err(_) => error!(user_id = %user_id, operation = %operation, "Timed out recording usage"),
    }
}
