use crate::{
    job::JobError,
    sync::{self, Mutex, lock},
    types::{JobId, Value},
};
use derive_more::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Error returned when a deferred value is settled twice.
///
/// Reaching this from the scheduler means a job's completion was delivered
/// more than once, which is a bug in the core rather than in a pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeferredError {
    /// The value was already resolved or failed.
    #[error("deferred output of job {producer} is already settled")]
    DoubleResolution {
        /// Job whose output was settled twice.
        producer: JobId,
    },
}

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone)]
pub enum DeferredState<V> {
    /// The producing job has not finished yet.
    Unresolved,
    /// The producing job completed with this value.
    Resolved(V),
    /// The producing job failed or was skipped; carries the root cause.
    Failed(Arc<JobError>),
}

impl<V> DeferredState<V> {
    /// Whether the state is terminal.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// Placeholder for a job's eventual output.
///
/// Created together with its job and handed to pipeline code so it can be
/// threaded into other jobs' inputs before anything has run. The scheduler
/// settles it exactly once, when the producing job reaches a terminal state.
///
/// Cloning is cheap; all clones observe the same slot.
#[derive(Debug)]
pub struct Deferred<V> {
    #[debug(skip)]
    slot: sync::Arc<Mutex<DeferredState<V>>>,
    producer: JobId,
    #[debug(skip)]
    graph: u64,
}

impl<V> Clone for Deferred<V> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            producer: self.producer,
            graph: self.graph,
        }
    }
}

impl<V: Value> Deferred<V> {
    pub(crate) fn new(producer: JobId, graph: u64) -> Self {
        Self {
            slot: sync::Arc::new(Mutex::new(DeferredState::Unresolved)),
            producer,
            graph,
        }
    }

    /// The job that produces this value.
    #[must_use]
    pub fn producer(&self) -> JobId {
        self.producer
    }

    pub(crate) fn graph(&self) -> u64 {
        self.graph
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> DeferredState<V> {
        lock(&self.slot).clone()
    }

    /// The resolved value, if the producer completed.
    #[must_use]
    pub fn value(&self) -> Option<V> {
        match &*lock(&self.slot) {
            DeferredState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The root cause, if the producer failed or was skipped.
    #[must_use]
    pub fn error(&self) -> Option<Arc<JobError>> {
        match &*lock(&self.slot) {
            DeferredState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Whether the value is available.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*lock(&self.slot), DeferredState::Resolved(_))
    }

    /// Settle with the producer's output.
    ///
    /// Called by the scheduler when the producing job completes.
    ///
    /// # Errors
    /// [`DeferredError::DoubleResolution`] if already resolved or failed.
    pub fn resolve(&self, value: V) -> Result<(), DeferredError> {
        self.settle(DeferredState::Resolved(value))
    }

    /// Settle with a failure.
    ///
    /// # Errors
    /// [`DeferredError::DoubleResolution`] if already resolved or failed.
    pub fn fail(&self, error: Arc<JobError>) -> Result<(), DeferredError> {
        self.settle(DeferredState::Failed(error))
    }

    fn settle(&self, next: DeferredState<V>) -> Result<(), DeferredError> {
        let mut state = lock(&self.slot);
        if state.is_settled() {
            return Err(DeferredError::DoubleResolution {
                producer: self.producer,
            });
        }
        *state = next;
        Ok(())
    }
}
