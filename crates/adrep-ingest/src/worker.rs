//! Persistence worker pool
//!
//! Batches are persisted on spawned tasks, at most `size` at a time across all
//! jobs. The caller reserves a permit first and hands it to [`PersistencePool::dispatch`]
//! together with the batch; the permit is released when the task finishes.
//!
//! A failing task trips the job's abort token *before* releasing its permit, so
//! an orchestrator waiting for that permit always observes the abort first.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::chunk::Batch;
use crate::error::IngestError;
use crate::models::JobId;
use crate::storage::UpsertSink;
use crate::tracker::JobTracker;

/// Result of one batch task: the number of records saved
pub type BatchOutcome = Result<usize, IngestError>;

/// Job-scoped context every batch task reports into
#[derive(Clone)]
pub struct BatchContext {
    pub job_id: JobId,
    pub tracker: Arc<JobTracker>,
    pub abort: CancellationToken,
}

/// Bounded pool executing batch upserts
#[derive(Clone)]
pub struct PersistencePool {
    sink: Arc<dyn UpsertSink>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl PersistencePool {
    pub fn new(sink: Arc<dyn UpsertSink>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            sink,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sink(&self) -> &Arc<dyn UpsertSink> {
        &self.sink
    }

    /// Permits not currently held by a running batch
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free worker slot
    pub async fn reserve(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Persist `batch` on a new task tracked by `in_flight`
    pub fn dispatch(
        &self,
        permit: OwnedSemaphorePermit,
        batch: Batch,
        ctx: BatchContext,
        in_flight: &mut JoinSet<BatchOutcome>,
    ) {
        let sink = Arc::clone(&self.sink);

        in_flight.spawn(async move {
            let sequence = batch.sequence;
            let records = batch.len();

            let outcome = match sink.upsert_batch(&batch.records).await {
                Ok(()) => {
                    ctx.tracker.record_saved(ctx.job_id, records as u64);
                    debug!(job_id = ctx.job_id, sequence, records, "Batch persisted");
                    Ok(records)
                },
                Err(source) => {
                    error!(
                        job_id = ctx.job_id,
                        sequence,
                        records,
                        error = %source,
                        "Batch failed to persist"
                    );
                    ctx.abort.cancel();
                    Err(IngestError::Persistence {
                        sequence,
                        records,
                        source,
                    })
                },
            };

            drop(permit);
            outcome
        });
    }
}
