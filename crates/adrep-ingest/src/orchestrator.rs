//! Import orchestrator
//!
//! Wires header resolution, the two-pass parse, chunking and the persistence
//! pool into one background run per job:
//!
//! ```text
//! STARTING -> READING_HEADER -> VALIDATING_HEADER -> COUNTING -> PROCESSING -> PERSISTING -> COMPLETED
//!                  |                   |                |            |             |
//!                  +-------------------+----------------+------------+-------------+--> FAILED
//! ```
//!
//! [`ImportOrchestrator::submit`] registers the job and returns its id right
//! away. Execution waits for one of `job_workers` slots, then runs to a terminal
//! state. Row errors are counted and skipped; header, stream and persistence
//! errors fail the job. A row that is not valid UTF-8 is a row error. The first
//! failing batch stops further batches from being issued; batches already
//! running are awaited before the job is marked failed.
//!
//! Cancellation only fails a job while rows are still being read. Once the last
//! batch has been issued the job runs to completion even if a cancel arrives.

use std::sync::Arc;

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::chunk::{Batch, ChunkBuilder};
use crate::config::IngestConfig;
use crate::error::{IngestError, RowError};
use crate::headers::ResolvedHeader;
use crate::models::JobId;
use crate::parser::parse_row;
use crate::progress::{Phase, ProgressSnapshot};
use crate::storage::UpsertSink;
use crate::tracker::{CompletionSummary, JobStatus, JobTracker};
use crate::worker::{BatchContext, BatchOutcome, PersistencePool};

/// Shared handle to the ingestion pipeline
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: IngestConfig,
    tracker: Arc<JobTracker>,
    pool: PersistencePool,
    job_permits: Arc<Semaphore>,
    tasks: TaskTracker,
    stopping: CancellationToken,
}

fn csv_reader(data: &[u8]) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data)
}

impl ImportOrchestrator {
    pub fn new(config: IngestConfig, sink: Arc<dyn UpsertSink>) -> Self {
        let pool = PersistencePool::new(sink, config.persistence_workers);
        let job_permits = Arc::new(Semaphore::new(config.job_workers.max(1)));

        Self {
            inner: Arc::new(Inner {
                config,
                tracker: Arc::new(JobTracker::new()),
                pool,
                job_permits,
                tasks: TaskTracker::new(),
                stopping: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.inner.tracker
    }

    pub fn sink(&self) -> &Arc<dyn UpsertSink> {
        self.inner.pool.sink()
    }

    /// Register a job for `data` and start it in the background
    ///
    /// Returns as soon as the job id is allocated; nothing is parsed yet.
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        data: impl Into<Arc<[u8]>>,
        filename: impl Into<String>,
    ) -> Result<JobId, IngestError> {
        if self.inner.tasks.is_closed() {
            return Err(IngestError::ShuttingDown);
        }

        let data: Arc<[u8]> = data.into();
        let filename = filename.into();
        let job_id = self.inner.tracker.create_job(filename.as_str());
        let job_token = self
            .inner
            .tracker
            .cancellation_token(job_id)
            .unwrap_or_default();

        info!(job_id, filename = %filename, bytes = data.len(), "Import job submitted");

        let inner = Arc::clone(&self.inner);
        self.inner
            .tasks
            .spawn(async move { inner.run_job(job_id, data, job_token).await });

        Ok(job_id)
    }

    /// Status string for a job, `NOT_FOUND` if unknown
    pub fn status(&self, job_id: JobId) -> String {
        self.inner.tracker.status_line(job_id)
    }

    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.inner.tracker.status(job_id)
    }

    pub fn progress(&self, job_id: JobId) -> Option<ProgressSnapshot> {
        self.inner.tracker.progress(job_id)
    }

    /// Request cooperative cancellation; false for unknown or finished jobs
    pub fn cancel(&self, job_id: JobId) -> bool {
        let requested = self.inner.tracker.cancel(job_id);
        if requested {
            info!(job_id, "Import cancellation requested");
        }
        requested
    }

    /// Jobs submitted but not yet finished
    pub fn running(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Periodically evict finished jobs past their retention period
    pub fn start_retention_sweeper(&self) -> JoinHandle<()> {
        let tracker = Arc::clone(&self.inner.tracker);
        let stopping = self.inner.stopping.clone();
        let retention = self.inner.config.job_retention();
        let period = self.inner.config.retention_sweep();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stopping.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = tracker.purge_finished(retention);
                        if evicted > 0 {
                            debug!(evicted, remaining = tracker.len(), "Evicted finished import jobs");
                        }
                    }
                }
            }
        })
    }

    /// Stop accepting jobs and drain the running ones
    ///
    /// Running jobs get the configured grace period. Whatever is still running
    /// after that is cancelled and given one more grace period to wind down.
    pub async fn shutdown(&self) {
        let grace = self.inner.config.shutdown_grace();
        self.inner.tasks.close();
        self.inner.stopping.cancel();

        info!(
            running = self.inner.tasks.len(),
            grace_secs = grace.as_secs(),
            "Shutting down importer"
        );

        if tokio::time::timeout(grace, self.inner.tasks.wait()).await.is_ok() {
            info!("All import jobs finished");
            return;
        }

        warn!(
            running = self.inner.tasks.len(),
            "Import jobs still running after grace period, cancelling"
        );
        self.inner.tracker.cancel_all();

        if tokio::time::timeout(grace, self.inner.tasks.wait()).await.is_err() {
            warn!(
                running = self.inner.tasks.len(),
                "Import jobs did not stop after cancellation"
            );
        }
    }
}

impl Inner {
    async fn run_job(self: Arc<Self>, job_id: JobId, data: Arc<[u8]>, job_token: CancellationToken) {
        let slot = tokio::select! {
            biased;
            _ = job_token.cancelled() => None,
            permit = Arc::clone(&self.job_permits).acquire_owned() => permit.ok(),
        };
        let Some(_slot) = slot else {
            self.tracker.fail(job_id, IngestError::Cancelled.to_string());
            warn!(job_id, "Import job cancelled before it started");
            return;
        };

        match self.execute(job_id, &data, &job_token).await {
            Ok(summary) => {
                self.tracker.complete(job_id, summary);
                info!(
                    job_id,
                    processed = summary.processed,
                    errors = summary.errors,
                    saved = summary.saved,
                    "Import job completed"
                );
            },
            Err(err) => {
                self.tracker.fail(job_id, err.to_string());
                error!(job_id, error = %err, "Import job failed");
            },
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        data: &Arc<[u8]>,
        job_token: &CancellationToken,
    ) -> Result<CompletionSummary, IngestError> {
        self.tracker.set_phase(job_id, Phase::ReadingHeader);
        let mut reader = csv_reader(data);
        let mut raw_header = StringRecord::new();
        if !reader.read_record(&mut raw_header)? || raw_header.iter().all(|c| c.trim().is_empty()) {
            return Err(IngestError::EmptyFile);
        }
        let header = ResolvedHeader::resolve(&raw_header);

        self.tracker.set_phase(job_id, Phase::ValidatingHeader);
        let unexpected = header.unexpected();
        if !unexpected.is_empty() {
            warn!(job_id, columns = ?unexpected, "Ignoring unexpected columns");
        }
        header.validate()?;
        debug!(job_id, columns = ?header.names(), "Header resolved");

        if job_token.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        self.tracker.set_phase(job_id, Phase::Counting);
        let total = count_rows(Arc::clone(data)).await?;
        self.tracker.set_total(job_id, total);
        info!(job_id, total, "Counted data rows");

        self.tracker.set_phase(job_id, Phase::Processing);
        let mut run = JobRun::new(self, job_id, job_token.child_token());
        let mut chunks = ChunkBuilder::new(self.config.batch_size);
        let mut raw = ByteRecord::new();
        let mut processed: u64 = 0;
        let mut errors: u64 = 0;
        let mut unflushed: u64 = 0;
        let flush_every = self.config.progress_interval.max(1);

        while !run.abort.is_cancelled() {
            match reader.read_byte_record(&mut raw) {
                Ok(true) => {},
                Ok(false) => break,
                Err(err) => {
                    // Batches already issued still finish before the job fails
                    match run.abandon().await {
                        Ok(saved) => {
                            warn!(job_id, saved, "Drained issued batches after read error");
                        },
                        Err(drain_err) => {
                            warn!(
                                job_id,
                                error = %drain_err,
                                "Issued batch failed while draining after read error"
                            );
                        },
                    }
                    self.tracker.record_processed(job_id, unflushed);
                    return Err(err.into());
                },
            }
            let line = raw.position().map_or(0, |p| p.line());

            let outcome = match StringRecord::from_byte_record(std::mem::take(&mut raw)) {
                Ok(record) => {
                    let outcome = parse_row(&header, &record);
                    raw = record.into_byte_record();
                    outcome
                },
                Err(err) => {
                    let cell = err.utf8_error().field() + 1;
                    raw = err.into_byte_record();
                    Err(RowError::InvalidEncoding { cell })
                },
            };

            match outcome {
                Ok(parsed) => {
                    processed += 1;
                    unflushed += 1;
                    if let Some(batch) = chunks.push(parsed) {
                        if !run.dispatch(batch).await {
                            break;
                        }
                    }
                },
                Err(err) => {
                    errors += 1;
                    self.tracker.record_error(job_id, 1);
                    let content = raw
                        .iter()
                        .map(String::from_utf8_lossy)
                        .collect::<Vec<_>>()
                        .join(",");
                    warn!(job_id, line, raw = %content, error = %err, "Skipping invalid row");
                },
            }

            if (processed + errors) % flush_every == 0 {
                self.tracker.record_processed(job_id, unflushed);
                unflushed = 0;
                run.reap();
                tokio::task::yield_now().await;
            }
        }
        self.tracker.record_processed(job_id, unflushed);

        if !run.abort.is_cancelled() {
            if let Some(batch) = chunks.finish() {
                run.dispatch(batch).await;
            }
        }
        let interrupted = job_token.is_cancelled();

        self.tracker.set_phase(job_id, Phase::Persisting);
        info!(
            job_id,
            processed,
            errors,
            batches = chunks.issued(),
            "Waiting for batches to persist"
        );
        let saved = run.drain().await?;

        if interrupted {
            return Err(IngestError::Cancelled);
        }
        if job_token.is_cancelled() {
            debug!(job_id, "Cancellation arrived after the last batch was issued");
        }

        Ok(CompletionSummary {
            processed,
            errors,
            saved,
        })
    }
}

/// Counting pass: number of data rows after the header
async fn count_rows(data: Arc<[u8]>) -> Result<u64, IngestError> {
    tokio::task::spawn_blocking(move || {
        let mut reader = csv_reader(&data);
        let mut record = ByteRecord::new();
        let mut rows = 0u64;

        reader.read_byte_record(&mut record)?;
        while reader.read_byte_record(&mut record)? {
            rows += 1;
        }
        Ok::<u64, IngestError>(rows)
    })
    .await?
}

/// In-flight batch bookkeeping for one job
struct JobRun<'a> {
    inner: &'a Inner,
    job_id: JobId,
    abort: CancellationToken,
    in_flight: JoinSet<BatchOutcome>,
    saved: u64,
    failure: Option<IngestError>,
}

impl<'a> JobRun<'a> {
    fn new(inner: &'a Inner, job_id: JobId, abort: CancellationToken) -> Self {
        Self {
            inner,
            job_id,
            abort,
            in_flight: JoinSet::new(),
            saved: 0,
            failure: None,
        }
    }

    /// Hand a batch to the pool unless the job has been aborted
    async fn dispatch(&mut self, batch: Batch) -> bool {
        self.reap();

        let permit = tokio::select! {
            biased;
            _ = self.abort.cancelled() => None,
            permit = self.inner.pool.reserve() => permit,
        };

        match permit {
            Some(permit) if !self.abort.is_cancelled() => {
                debug!(
                    job_id = self.job_id,
                    sequence = batch.sequence,
                    records = batch.len(),
                    "Dispatching batch"
                );
                let ctx = BatchContext {
                    job_id: self.job_id,
                    tracker: Arc::clone(&self.inner.tracker),
                    abort: self.abort.clone(),
                };
                self.inner.pool.dispatch(permit, batch, ctx, &mut self.in_flight);
                true
            },
            _ => {
                debug!(
                    job_id = self.job_id,
                    sequence = batch.sequence,
                    "Job aborted, batch not issued"
                );
                false
            },
        }
    }

    /// Collect batches that already finished without waiting
    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            self.absorb(result);
        }
    }

    fn absorb(&mut self, result: Result<BatchOutcome, JoinError>) {
        match result {
            Ok(Ok(records)) => self.saved += records as u64,
            Ok(Err(err)) => {
                self.failure.get_or_insert(err);
            },
            Err(join_err) => {
                self.abort.cancel();
                self.failure.get_or_insert(IngestError::Task(join_err));
            },
        }
    }

    /// Stop issuing batches and wait for the ones already issued
    async fn abandon(&mut self) -> Result<u64, IngestError> {
        self.abort.cancel();
        self.drain().await
    }

    /// Await every issued batch; the first failure wins
    async fn drain(&mut self) -> Result<u64, IngestError> {
        while let Some(result) = self.in_flight.join_next().await {
            self.absorb(result);
        }
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self.saved),
        }
    }
}
