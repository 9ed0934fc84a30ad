//! Job tracker
//!
//! Owns identity, status and progress for every import job. The tracker is an
//! explicitly constructed value shared behind an `Arc`; each job's mutable state
//! sits behind its own lock so pollers never observe a half-written snapshot.
//!
//! Terminal statuses are final. Once a job is `COMPLETED` or `FAILED`, further
//! mutations are ignored and logged.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::JobId;
use crate::progress::{Phase, ProgressSnapshot};

/// Status line prefix used for failed jobs
pub const FAILED_PREFIX: &str = "FAILED:";

/// Status line returned for unknown job ids
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Counters reported when a job completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionSummary {
    pub processed: u64,
    pub errors: u64,
    pub saved: u64,
}

/// Job status as seen by pollers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Completed(CompletionSummary),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::InProgress => f.write_str("IN_PROGRESS"),
            JobStatus::Completed(summary) => write!(
                f,
                "COMPLETED: Processed {} records, {} errors.",
                summary.processed, summary.errors
            ),
            JobStatus::Failed(message) => write!(f, "{} {}", FAILED_PREFIX, message),
        }
    }
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress: ProgressSnapshot,
    finished_at: Option<Instant>,
}

#[derive(Debug)]
struct JobEntry {
    filename: String,
    cancel: CancellationToken,
    state: RwLock<JobState>,
}

impl JobEntry {
    fn read<R>(&self, f: impl FnOnce(&JobState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Registry of import jobs
#[derive(Debug)]
pub struct JobTracker {
    next_id: AtomicU64,
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    root: CancellationToken,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Allocate the next job id in `IN_PROGRESS` / `STARTING`
    pub fn create_job(&self, filename: impl Into<String>) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(JobEntry {
            filename: filename.into(),
            cancel: self.root.child_token(),
            state: RwLock::new(JobState {
                status: JobStatus::InProgress,
                progress: ProgressSnapshot::default(),
                finished_at: None,
            }),
        });

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        debug!(job_id = id, "Registered import job");
        id
    }

    fn entry(&self, id: JobId) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Apply a mutation to a live job; terminal and unknown jobs are left alone
    fn mutate(&self, id: JobId, action: &str, f: impl FnOnce(&mut JobState)) -> bool {
        let Some(entry) = self.entry(id) else {
            debug!(job_id = id, action, "Ignoring update for unknown job");
            return false;
        };

        entry.write(|state| {
            if state.status.is_terminal() {
                warn!(
                    job_id = id,
                    action,
                    status = %state.status,
                    "Ignoring update for finished job"
                );
                false
            } else {
                f(state);
                true
            }
        })
    }

    pub fn set_phase(&self, id: JobId, phase: Phase) -> bool {
        self.mutate(id, "set_phase", |state| state.progress.set_phase(phase))
    }

    /// Fix the row-count denominator after the counting pass
    pub fn set_total(&self, id: JobId, total: u64) -> bool {
        self.mutate(id, "set_total", |state| {
            state.progress.total_records = total;
        })
    }

    pub fn record_processed(&self, id: JobId, n: u64) -> bool {
        self.mutate(id, "record_processed", |state| state.progress.add_processed(n))
    }

    pub fn record_error(&self, id: JobId, n: u64) -> bool {
        self.mutate(id, "record_error", |state| state.progress.add_errors(n))
    }

    pub fn record_saved(&self, id: JobId, n: u64) -> bool {
        self.mutate(id, "record_saved", |state| state.progress.add_saved(n))
    }

    /// Mark a job completed; returns false if it was already terminal
    pub fn complete(&self, id: JobId, summary: CompletionSummary) -> bool {
        self.mutate(id, "complete", |state| {
            state.progress.processed_records = summary.processed;
            state.progress.error_records = summary.errors;
            state.progress.saved_records = summary.saved;
            state.progress.set_phase(Phase::Completed);
            state.status = JobStatus::Completed(summary);
            state.finished_at = Some(Instant::now());
        })
    }

    /// Mark a job failed; returns false if it was already terminal
    pub fn fail(&self, id: JobId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.mutate(id, "fail", |state| {
            state.progress.set_phase(Phase::Failed);
            state.status = JobStatus::Failed(message);
            state.finished_at = Some(Instant::now());
        })
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.entry(id).map(|entry| entry.read(|state| state.status.clone()))
    }

    /// Status rendered as a poller-facing string, `NOT_FOUND` for unknown ids
    pub fn status_line(&self, id: JobId) -> String {
        self.status(id)
            .map(|status| status.to_string())
            .unwrap_or_else(|| NOT_FOUND.to_string())
    }

    pub fn progress(&self, id: JobId) -> Option<ProgressSnapshot> {
        self.entry(id).map(|entry| entry.read(|state| state.progress.clone()))
    }

    pub fn filename(&self, id: JobId) -> Option<String> {
        self.entry(id).map(|entry| entry.filename.clone())
    }

    pub fn cancellation_token(&self, id: JobId) -> Option<CancellationToken> {
        self.entry(id).map(|entry| entry.cancel.clone())
    }

    /// Request cooperative cancellation of a running job
    ///
    /// Returns false for unknown or already finished jobs.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        if entry.read(|state| state.status.is_terminal()) {
            return false;
        }
        entry.cancel.cancel();
        true
    }

    /// Trip the cancellation token of every job, live or future
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Drop terminal jobs that finished more than `older_than` ago
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            entry.read(|state| match state.finished_at {
                Some(finished) => now.saturating_duration_since(finished) < older_than,
                None => true,
            })
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let tracker = JobTracker::new();
        let a = tracker.create_job("a.csv");
        let b = tracker.create_job("b.csv");
        assert!(b > a);
        assert_eq!(tracker.filename(a).as_deref(), Some("a.csv"));
    }

    #[test]
    fn test_new_job_is_in_progress() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("report.csv");
        assert_eq!(tracker.status_line(id), "IN_PROGRESS");

        let progress = tracker.progress(id).unwrap();
        assert_eq!(progress.current_phase, Phase::Starting);
        assert_eq!(progress.progress_percentage, 10);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let tracker = JobTracker::new();
        assert_eq!(tracker.status_line(42), NOT_FOUND);
        assert!(tracker.progress(42).is_none());
        assert!(!tracker.cancel(42));
    }

    #[test]
    fn test_completion_summary_string() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("report.csv");
        tracker.complete(
            id,
            CompletionSummary {
                processed: 98,
                errors: 2,
                saved: 98,
            },
        );
        assert_eq!(tracker.status_line(id), "COMPLETED: Processed 98 records, 2 errors.");
        assert_eq!(tracker.progress(id).unwrap().progress_percentage, 100);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("report.csv");
        assert!(tracker.fail(id, "Empty file or no header"));

        assert!(!tracker.complete(id, CompletionSummary::default()));
        assert!(!tracker.set_phase(id, Phase::Processing));
        assert!(!tracker.record_processed(id, 10));
        assert!(!tracker.cancel(id));

        assert_eq!(tracker.status_line(id), "FAILED: Empty file or no header");
        let progress = tracker.progress(id).unwrap();
        assert_eq!(progress.current_phase, Phase::Failed);
        assert_eq!(progress.processed_records, 0);
    }

    #[test]
    fn test_cancel_trips_job_token() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("report.csv");
        let token = tracker.cancellation_token(id).unwrap();
        assert!(tracker.cancel(id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_all_reaches_every_job() {
        let tracker = JobTracker::new();
        let a = tracker.cancellation_token(tracker.create_job("a.csv")).unwrap();
        let b = tracker.cancellation_token(tracker.create_job("b.csv")).unwrap();
        tracker.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn test_purge_keeps_running_and_recent_jobs() {
        let tracker = JobTracker::new();
        let running = tracker.create_job("running.csv");
        let finished = tracker.create_job("finished.csv");
        tracker.fail(finished, "boom");

        assert_eq!(tracker.purge_finished(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.purge_finished(Duration::ZERO), 1);
        assert_eq!(tracker.status_line(finished), NOT_FOUND);
        assert_eq!(tracker.status_line(running), "IN_PROGRESS");
    }
}
