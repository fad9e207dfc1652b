//! Fan-out / fan-in through spawn barriers.
//!
//! A barrier is a job with no work. Parallel jobs are attached as its
//! children as they are discovered, and a single aggregation job is attached
//! as its follow-on. The follow-on rule then holds the aggregation back until
//! every spawned job has finished, without the pipeline ever counting them.
//!
//! ```text
//!            parent
//!              |
//!           barrier
//!         /    |    \        (children, any number, including none)
//!       j1    j2    j3
//!              .
//!              .  follow-on
//!           gather
//! ```

use crate::{
    deferred::Deferred,
    graph::{Graph, GraphError},
    job::{Input, Job},
    types::{JobId, Value},
};

/// A spawn barrier under construction.
///
/// Consumed by [`gather`](Fanout::gather) or
/// [`then_fan_out`](Fanout::then_fan_out), so a barrier gets exactly one
/// aggregation follow-on.
#[derive(Debug)]
#[must_use = "a fan-out without a gather step leaves its outputs unused"]
pub struct Fanout<V> {
    barrier: JobId,
    spawned: Vec<(JobId, Deferred<V>)>,
}

impl<V: Value> Graph<V> {
    /// Create a barrier as a child of `parent`.
    ///
    /// # Errors
    /// [`GraphError::UnknownJob`] if `parent` is not in this graph.
    pub fn fan_out(
        &mut self,
        parent: JobId,
        label: impl Into<String>,
    ) -> Result<Fanout<V>, GraphError> {
        if self.label(parent).is_none() {
            return Err(GraphError::UnknownJob(parent));
        }
        let barrier = self.add_barrier(label);
        self.add_child(parent, barrier)?;
        Ok(Fanout {
            barrier,
            spawned: Vec::new(),
        })
    }
}

impl<V: Value> Fanout<V> {
    /// The barrier job.
    #[must_use]
    pub fn barrier(&self) -> JobId {
        self.barrier
    }

    /// Jobs spawned so far with their outputs.
    #[must_use]
    pub fn spawned(&self) -> &[(JobId, Deferred<V>)] {
        &self.spawned
    }

    /// Add a parallel job under the barrier.
    ///
    /// # Errors
    /// As [`Graph::add_child_job`].
    pub fn spawn(
        &mut self,
        graph: &mut Graph<V>,
        job: Job<V>,
    ) -> Result<(JobId, Deferred<V>), GraphError> {
        let (id, output) = graph.add_child_job(self.barrier, job)?;
        self.spawned.push((id, output.clone()));
        Ok((id, output))
    }

    /// Attach an existing job under the barrier. Its output, if it has one,
    /// is not collected.
    ///
    /// # Errors
    /// As [`Graph::add_child`].
    pub fn attach(&mut self, graph: &mut Graph<V>, job: JobId) -> Result<(), GraphError> {
        graph.add_child(self.barrier, job)
    }

    /// Attach the aggregation job as the barrier's follow-on, passing every
    /// spawned output, in spawn order, as the list argument `arg`.
    ///
    /// # Errors
    /// As [`Graph::add_follow_on_job`].
    pub fn gather(
        self,
        graph: &mut Graph<V>,
        job: Job<V>,
        arg: impl Into<String>,
    ) -> Result<(JobId, Deferred<V>), GraphError> {
        let outputs = self.spawned.into_iter().map(|(_, output)| output);
        let job = job.input(arg, Input::all(outputs));
        graph.add_follow_on_job(self.barrier, job)
    }

    /// Attach the aggregation job as the barrier's follow-on without wiring
    /// any outputs.
    ///
    /// # Errors
    /// As [`Graph::add_follow_on_job`].
    pub fn join(self, graph: &mut Graph<V>, job: Job<V>) -> Result<(JobId, Deferred<V>), GraphError> {
        graph.add_follow_on_job(self.barrier, job)
    }

    /// Chain a second barrier as this one's follow-on. The next stage's jobs
    /// start only once every job spawned here has finished.
    ///
    /// # Errors
    /// As [`Graph::add_follow_on`].
    pub fn then_fan_out(
        self,
        graph: &mut Graph<V>,
        label: impl Into<String>,
    ) -> Result<Fanout<V>, GraphError> {
        let next = graph.add_barrier(label);
        graph.add_follow_on(self.barrier, next)?;
        Ok(Fanout {
            barrier: next,
            spawned: Vec::new(),
        })
    }
}
