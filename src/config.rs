use crate::resource::ResourceBudget;
use core::{num::NonZeroUsize, time::Duration};

/// Settings for one [`Scheduler`](crate::scheduler::Scheduler).
///
/// An explicit, immutable value: nothing in the core reads ambient global
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RunConfig {
    /// Total cores and memory that running jobs may hold at once.
    pub budget: ResourceBudget,
    /// Worker threads. Defaults to the budget's core count, which is also the
    /// most jobs that can ever run at once.
    pub max_workers: Option<NonZeroUsize>,
    /// Cancel the whole run on the first failed job instead of letting
    /// independent branches finish.
    pub fail_fast: bool,
    /// Cancel the run once it has been going for this long.
    pub timeout: Option<Duration>,
    /// Name prefix for worker threads.
    pub thread_name: String,
}

impl RunConfig {
    /// Default settings under `budget`.
    #[must_use]
    pub fn new(budget: ResourceBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Set the worker thread count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: NonZeroUsize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Enable or disable fail-fast.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a run timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of worker threads actually used.
    #[must_use]
    pub fn workers(&self) -> NonZeroUsize {
        self.max_workers.unwrap_or_else(|| {
            let cores = usize::try_from(self.budget.cores()).unwrap_or(usize::MAX);
            NonZeroUsize::new(cores).unwrap_or(NonZeroUsize::MIN)
        })
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            budget: ResourceBudget::detect(),
            max_workers: None,
            fail_fast: false,
            timeout: None,
            thread_name: "jobgraph-worker".to_owned(),
        }
    }
}
