use crate::{
    job::JobError,
    types::{IndexMap, JobId},
};
use core::{fmt, time::Duration};
use derive_more::Display;
use std::sync::Arc;

/// Scheduler state of a job.
///
/// `Pending -> Ready -> Running -> {Completed | Failed}`, or straight to
/// `Skipped` when an upstream job did not complete or the run was cancelled.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Waiting for dependencies.
    Pending,
    /// Dependencies met, waiting for resources.
    Ready,
    /// Executing on a worker.
    Running,
    /// Finished successfully; its output is resolved.
    Completed,
    /// Its step failed; its output carries the error.
    Failed,
    /// Never ran.
    Skipped,
}

impl JobState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Outcome of one job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The job.
    pub id: JobId,
    /// Its label.
    pub label: Arc<str>,
    /// Terminal state.
    pub state: JobState,
    /// Why it failed or was skipped.
    pub error: Option<Arc<JobError>>,
    /// Wall-clock time spent running, for jobs that ran.
    pub elapsed: Option<Duration>,
}

/// Result of running a graph: every job's terminal state and, for jobs
/// that did not complete, the originating error.
#[derive(Debug, Clone)]
pub struct RunReport {
    records: Vec<JobRecord>,
    elapsed: Duration,
}

impl RunReport {
    pub(crate) fn new(records: Vec<JobRecord>, elapsed: Duration) -> Self {
        debug_assert!(
            records.iter().all(|record| record.state.is_terminal()),
            "RunReport::new: [1]"
        );
        Self { records, elapsed }
    }

    /// Whether every job completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.records
            .iter()
            .all(|record| record.state == JobState::Completed)
    }

    /// Wall-clock duration of the whole run.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// All records in job insertion order.
    #[must_use]
    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    /// Record of one job.
    #[must_use]
    pub fn get(&self, job: JobId) -> Option<&JobRecord> {
        self.records.get(job.index())
    }

    /// Terminal state of one job.
    #[must_use]
    pub fn state(&self, job: JobId) -> Option<JobState> {
        self.get(job).map(|record| record.state)
    }

    /// Error of one job, if it did not complete.
    #[must_use]
    pub fn error(&self, job: JobId) -> Option<&Arc<JobError>> {
        self.get(job)?.error.as_ref()
    }

    /// First record with the given label.
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<&JobRecord> {
        self.records.iter().find(|record| &*record.label == label)
    }

    /// Jobs whose own step failed.
    pub fn failed(&self) -> impl Iterator<Item = &JobRecord> {
        self.in_state(JobState::Failed)
    }

    /// Jobs that never ran.
    pub fn skipped(&self) -> impl Iterator<Item = &JobRecord> {
        self.in_state(JobState::Skipped)
    }

    /// Number of jobs per terminal state, in first-seen order.
    pub fn counts(&self) -> impl Iterator<Item = (JobState, usize)> {
        let mut counts = IndexMap::<JobState, usize>::default();
        for record in &self.records {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts.into_iter()
    }

    /// Number of jobs that ended in `state`.
    #[must_use]
    pub fn count(&self, state: JobState) -> usize {
        self.in_state(state).count()
    }

    fn in_state(&self, state: JobState) -> impl Iterator<Item = &JobRecord> {
        self.records
            .iter()
            .filter(move |record| record.state == state)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.is_success() { "succeeded" } else { "failed" };
        write!(
            f,
            "run {verdict} in {:.1?}: {} jobs",
            self.elapsed,
            self.records.len()
        )?;
        for (state, count) in self.counts() {
            write!(f, ", {count} {}", state.to_string().to_lowercase())?;
        }
        Ok(())
    }
}
