//! Job-dependency graphs for batch pipelines, and a scheduler that runs them
//! under a CPU/memory budget.
//!
//! A pipeline is declared up front as a graph of jobs. Each job wraps an
//! opaque step (typically a call out to an aligner, variant caller or
//! annotator), states the cores and memory it needs, and takes named inputs
//! that are either plain values or the [`Deferred`](deferred::Deferred)
//! outputs of other jobs that have not run yet.
//!
//! Jobs are wired with two kinds of edges:
//! - **child** edges: run after the parent itself completes;
//! - **follow-on** edges: run after the parent and everything attached
//!   below its children has finished.
//!
//! The second kind is what makes dynamic fan-out/fan-in possible without
//! counting: spawn any number of jobs under a no-op barrier and attach one
//! aggregation job as the barrier's follow-on (see [`barrier`]).
//!
//! Key modules:
//! - `graph`: building the graph, cycle checks, readiness.
//! - `job`: job definitions, steps, inputs and per-job errors.
//! - `deferred`: placeholders for outputs, settled exactly once.
//! - `scheduler`: validation into a flat plan and the run loop.
//! - `report`: per-job terminal states after a run.
//!
//! Quick start:
//! 1. Create a [`Graph`](graph::Graph) and add [`Job`](job::Job)s, threading
//!    their outputs into later jobs' inputs.
//! 2. Attach jobs with `add_child` / `add_follow_on`, or use a
//!    [`Fanout`](barrier::Fanout) for per-sample or per-caller stages.
//! 3. Hand the graph to a [`Scheduler`](scheduler::Scheduler) and inspect the
//!    [`RunReport`](report::RunReport).
//!
//! A failing job never aborts unrelated branches: everything that depends on
//! it is skipped with the original error attached, and everything else runs
//! to completion.

/// Fan-out / fan-in through spawn barriers.
pub mod barrier;
/// Cooperative cancellation of a run.
pub mod cancel;
/// Scheduler settings.
///
/// Exposes `RunConfig`, the explicit value that replaces any ambient,
/// process-wide configuration.
pub mod config;
/// Deferred job outputs.
pub mod deferred;
/// The job-dependency graph.
///
/// Owns every job, validates edges as they are added and answers whether a
/// job may start given the state of the others.
pub mod graph;
/// Job definitions, steps, their inputs and errors.
pub mod job;
/// Outcome of a run.
pub mod report;
/// Resource specifications, budgets and memory sizes.
pub mod resource;
/// Validation, planning and execution of graphs.
///
/// Contains setup (structural checks, budget admission, flattening of child,
/// follow-on and data dependencies into one prerequisite relation) and the
/// coordinator loop that dispatches steps onto worker threads.
pub mod scheduler;
mod sync;
/// Ids and collection aliases shared across the crate.
pub mod types;

pub use crate::{
    barrier::Fanout,
    cancel::CancellationToken,
    config::RunConfig,
    deferred::{Deferred, DeferredError, DeferredState},
    graph::{Graph, GraphError},
    job::{Input, Inputs, Job, JobError, Step, StepContext, StepError},
    report::{JobRecord, JobState, RunReport},
    resource::{Memory, ResourceBudget, ResourceError, ResourceSpec},
    scheduler::{ScheduleError, Scheduler, run},
    types::{JobId, Value},
};
