mod execute;
mod plan;

use crate::{
    cancel::CancellationToken,
    config::RunConfig,
    graph::{Graph, GraphError},
    report::RunReport,
    resource::{ResourceBudget, ResourceSpec},
    scheduler::{execute::Execution, plan::Plan},
    types::{JobId, Value},
};
use derive_more::Debug;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

/// Error that prevents a run from starting, or aborts it.
///
/// Failures of individual jobs are not errors at this level; they are
/// recorded in the [`RunReport`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The graph violates a structural invariant.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A job needs more than the whole budget and could never be admitted.
    #[error("job {job} `{label}` needs {demand}, more than the budget of {budget}")]
    ResourceSpecExceedsBudget {
        /// The job.
        job: JobId,
        /// Its label.
        label: String,
        /// What it asked for.
        demand: ResourceSpec,
        /// What the scheduler has.
        budget: ResourceBudget,
    },
    /// A job's output was settled twice. Always a bug in the core; the run
    /// is aborted once in-flight jobs have returned.
    #[error("output of job {job} `{label}` was settled twice")]
    DoubleResolution {
        /// The job.
        job: JobId,
        /// Its label.
        label: String,
    },
    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

/// Runs job graphs on a pool of worker threads under a resource budget.
///
/// One coordinator, the thread calling [`run`](Self::run), owns the graph
/// and every job's state; workers only execute steps and report back. The
/// coordinator sleeps while nothing can make progress and wakes on job
/// completion, cancellation or timeout.
#[derive(Debug)]
pub struct Scheduler {
    config: RunConfig,
    cancellation: CancellationToken,
    #[debug(skip)]
    pool: ThreadPool,
}

impl Scheduler {
    /// Start a scheduler and its worker pool.
    ///
    /// # Errors
    /// If the worker threads cannot be spawned.
    pub fn new(config: RunConfig) -> Result<Self, ScheduleError> {
        let prefix = config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers().get())
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()?;
        Ok(Self {
            config,
            cancellation: CancellationToken::new(),
            pool,
        })
    }

    /// The scheduler's settings.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Token that cancels the current and any later run of this scheduler.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Execute `graph` to completion.
    ///
    /// Returns once every job has a terminal state. Job failures are
    /// reported in the [`RunReport`]; independent branches keep running.
    ///
    /// # Errors
    /// Validation errors before anything runs, or
    /// [`ScheduleError::DoubleResolution`] if the core itself misbehaves.
    pub fn run<V: Value>(&self, graph: Graph<V>) -> Result<RunReport, ScheduleError> {
        let plan = Plan::build(&graph, &self.config.budget)?;
        Execution::new(graph, plan, &self.config, &self.pool, &self.cancellation).run()
    }
}

/// Run `graph` under `budget` with otherwise default settings.
///
/// # Errors
/// As [`Scheduler::run`].
pub fn run<V: Value>(graph: Graph<V>, budget: ResourceBudget) -> Result<RunReport, ScheduleError> {
    Scheduler::new(RunConfig::new(budget))?.run(graph)
}
