mod cycle;

pub(crate) use cycle::find_cycle;

use crate::{
    deferred::Deferred,
    job::{Input, Job, JobNode},
    report::JobState,
    resource::{ResourceError, ResourceSpec},
    types::{IndexSet, JobId, Value},
};
use derive_more::Debug;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Error produced while building or validating a graph.
///
/// Every operation that returns it leaves the graph unmodified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// A job declared resources that can never be satisfied.
    #[error("job `{label}`: {source}")]
    InvalidResourceSpec {
        /// Label of the rejected job.
        label: String,
        /// What was wrong.
        #[source]
        source: ResourceError,
    },
    /// The edge would make a job its own ancestor, or the dependencies of a
    /// follow-on can never all be met.
    #[error("cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected {
        /// Labels along the cycle; the first and last entries are the same job.
        cycle: Vec<String>,
    },
    /// The id does not belong to this graph.
    #[error("unknown job {0}")]
    UnknownJob(JobId),
    /// A job consumes an output produced in a different graph.
    #[error("job `{label}` consumes an output from another graph")]
    ForeignDeferred {
        /// Label of the consuming job.
        label: String,
    },
    /// The root must be the single entry point.
    #[error("the root job cannot have incoming edges")]
    RootHasIncomingEdge,
    /// A job was added but never attached below the root.
    #[error("job {job} `{label}` is not reachable from the root")]
    Detached {
        /// The unreachable job.
        job: JobId,
        /// Its label.
        label: String,
    },
}

/// Which kind of edge to attach.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EdgeKind {
    Child,
    FollowOn,
}

/// A job-dependency graph rooted at one entry job.
///
/// Jobs are connected by two kinds of edges:
/// - a child edge `P -> C` lets `C` start once `P` itself has completed;
/// - a follow-on edge `P -> F` lets `F` start only once `P` and everything
///   reachable from `P`'s children has finished, however many jobs were
///   attached there.
///
/// Using another job's [`Deferred`] output as an input adds an implicit
/// data dependency on that job.
///
/// The graph owns its jobs. Building is single-threaded; running hands the
/// whole graph to a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug)]
pub struct Graph<V> {
    #[debug(skip)]
    id: u64,
    root: JobId,
    nodes: Vec<JobNode<V>>,
}

impl<V: Value> Graph<V> {
    /// A graph whose root is a no-op synchronization job.
    pub fn new(root_label: impl Into<String>) -> Self {
        let root = JobId::from_index(0);
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            root,
            nodes: vec![JobNode::barrier(root, root_label.into())],
        }
    }

    /// A graph whose root does real work.
    ///
    /// # Errors
    /// If the job's resources are invalid or it consumes foreign outputs.
    pub fn with_root(job: Job<V>) -> Result<(Self, Deferred<V>), GraphError> {
        let id = NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed);
        let root = JobId::from_index(0);
        let mut graph = Self {
            id,
            root,
            nodes: Vec::new(),
        };
        let (_, output) = graph.push_job(job)?;
        Ok((graph, output))
    }

    /// The entry job.
    #[must_use]
    pub fn root(&self) -> JobId {
        self.root
    }

    /// Number of jobs, including the root and barriers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a graph has at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All job ids in insertion order.
    pub fn jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.nodes.iter().map(|node| node.id)
    }

    /// Label of a job.
    #[must_use]
    pub fn label(&self, job: JobId) -> Option<&str> {
        self.nodes.get(job.index()).map(|node| &*node.label)
    }

    /// Declared resources of a job.
    #[must_use]
    pub fn resources(&self, job: JobId) -> Option<ResourceSpec> {
        self.nodes.get(job.index()).map(|node| node.resources)
    }

    /// Whether the job is a barrier.
    #[must_use]
    pub fn is_barrier(&self, job: JobId) -> bool {
        self.nodes.get(job.index()).is_some_and(JobNode::is_barrier)
    }

    /// Children of a job in attachment order.
    pub fn children(&self, job: JobId) -> impl Iterator<Item = JobId> + '_ {
        self.nodes
            .get(job.index())
            .into_iter()
            .flat_map(|node| node.edges.children.iter().copied())
    }

    /// Follow-ons of a job in attachment order.
    pub fn follow_ons(&self, job: JobId) -> impl Iterator<Item = JobId> + '_ {
        self.nodes
            .get(job.index())
            .into_iter()
            .flat_map(|node| node.edges.follow_ons.iter().copied())
    }

    /// Add a job. It must still be attached below the root with
    /// [`add_child`](Self::add_child) or [`add_follow_on`](Self::add_follow_on).
    ///
    /// # Errors
    /// [`GraphError::InvalidResourceSpec`] for zero cores or memory;
    /// [`GraphError::ForeignDeferred`] if an input comes from another graph.
    pub fn add_job(&mut self, job: Job<V>) -> Result<(JobId, Deferred<V>), GraphError> {
        self.push_job(job)
    }

    /// Add a synchronization job that does no work.
    pub fn add_barrier(&mut self, label: impl Into<String>) -> JobId {
        let id = JobId::from_index(self.nodes.len());
        self.nodes.push(JobNode::barrier(id, label.into()));
        id
    }

    /// Add a job and attach it as a child of `parent`.
    ///
    /// # Errors
    /// As [`add_job`](Self::add_job), or [`GraphError::UnknownJob`] if
    /// `parent` is not in this graph. Nothing is added on error.
    pub fn add_child_job(
        &mut self,
        parent: JobId,
        job: Job<V>,
    ) -> Result<(JobId, Deferred<V>), GraphError> {
        self.add_attached(parent, job, EdgeKind::Child)
    }

    /// Add a job and attach it as a follow-on of `parent`.
    ///
    /// # Errors
    /// As [`add_child_job`](Self::add_child_job).
    pub fn add_follow_on_job(
        &mut self,
        parent: JobId,
        job: Job<V>,
    ) -> Result<(JobId, Deferred<V>), GraphError> {
        self.add_attached(parent, job, EdgeKind::FollowOn)
    }

    /// `child` may start once `parent` has completed.
    ///
    /// # Errors
    /// [`GraphError::CycleDetected`] if `child` is already an ancestor of
    /// `parent`; [`GraphError::RootHasIncomingEdge`] if `child` is the root.
    pub fn add_child(&mut self, parent: JobId, child: JobId) -> Result<(), GraphError> {
        self.attach(parent, child, EdgeKind::Child)
    }

    /// `follow_on` may start once `parent` and its whole downstream subtree
    /// have finished.
    ///
    /// # Errors
    /// As [`add_child`](Self::add_child).
    pub fn add_follow_on(&mut self, parent: JobId, follow_on: JobId) -> Result<(), GraphError> {
        self.attach(parent, follow_on, EdgeKind::FollowOn)
    }

    /// Whether `job` may start given the current state of every job.
    ///
    /// True iff every child-edge parent and every producer of a consumed
    /// output has completed, and for every follow-on edge `P -> job`, `P` and
    /// everything it waits for has completed.
    pub fn is_ready(&self, job: JobId, state_of: impl Fn(JobId) -> JobState) -> bool {
        let Some(node) = self.nodes.get(job.index()) else {
            return false;
        };
        let completed = |id: &JobId| state_of(*id) == JobState::Completed;
        node.edges.child_parents.iter().all(completed)
            && node.producers.iter().all(completed)
            && node
                .edges
                .follow_on_parents
                .iter()
                .all(|&parent| self.follow_on_wait_set(parent, job).iter().all(completed))
    }

    /// Check the structural invariants a run relies on: the root has no
    /// incoming edges, every job is reachable from it, and there is no cycle.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.node(self.root).has_parents() {
            return Err(GraphError::RootHasIncomingEdge);
        }
        let mut reached = vec![false; self.nodes.len()];
        reached[self.root.index()] = true;
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            let edges = &self.node(id).edges;
            for &next in edges.children.iter().chain(&edges.follow_ons) {
                if !reached[next.index()] {
                    reached[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }
        if let Some(node) = self.nodes.iter().find(|node| !reached[node.id.index()]) {
            return Err(GraphError::Detached {
                job: node.id,
                label: node.label.to_string(),
            });
        }
        let cycle = find_cycle(self.nodes.len(), |idx| {
            self.nodes[idx].successors().map(JobId::index)
        });
        match cycle {
            Some(cycle) => Err(self.cycle_error(cycle.into_iter().map(JobId::from_index))),
            None => Ok(()),
        }
    }

    /// Jobs the follow-on edge `parent -> follow_on` waits for: `parent`
    /// itself plus every job reachable from `parent`'s children, excluding
    /// `follow_on` and anything downstream of it.
    pub(crate) fn follow_on_wait_set(&self, parent: JobId, follow_on: JobId) -> IndexSet<JobId> {
        let downstream = self.downstream_of(follow_on);
        let mut wait_set = IndexSet::default();
        wait_set.insert(parent);
        let mut stack: Vec<JobId> = self.node(parent).edges.children.iter().copied().collect();
        stack.reverse();
        while let Some(id) = stack.pop() {
            if downstream.contains(&id) || !wait_set.insert(id) {
                continue;
            }
            let edges = &self.node(id).edges;
            stack.extend(
                edges
                    .children
                    .iter()
                    .chain(&edges.follow_ons)
                    .rev()
                    .copied(),
            );
        }
        wait_set
    }

    pub(crate) fn node(&self, id: JobId) -> &JobNode<V> {
        &self.nodes[id.index()]
    }

    pub(crate) fn nodes(&self) -> &[JobNode<V>] {
        &self.nodes
    }

    pub(crate) fn node_mut(&mut self, id: JobId) -> &mut JobNode<V> {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn cycle_error(&self, cycle: impl IntoIterator<Item = JobId>) -> GraphError {
        GraphError::CycleDetected {
            cycle: cycle
                .into_iter()
                .map(|id| self.node(id).label.to_string())
                .collect(),
        }
    }

    fn push_job(&mut self, job: Job<V>) -> Result<(JobId, Deferred<V>), GraphError> {
        let id = JobId::from_index(self.nodes.len());
        let label = job.label().to_owned();
        let mut node = job
            .into_node(id)
            .map_err(|source| GraphError::InvalidResourceSpec {
                label: label.clone(),
                source,
            })?;
        let foreign = node
            .inputs
            .values()
            .flat_map(Input::deferreds)
            .any(|deferred| deferred.graph() != self.id);
        if foreign {
            return Err(GraphError::ForeignDeferred { label });
        }
        let output = Deferred::new(id, self.id);
        node.output = Some(output.clone());
        for &producer in &node.producers {
            self.nodes[producer.index()].edges.consumers.insert(id);
        }
        self.nodes.push(node);
        Ok((id, output))
    }

    fn add_attached(
        &mut self,
        parent: JobId,
        job: Job<V>,
        kind: EdgeKind,
    ) -> Result<(JobId, Deferred<V>), GraphError> {
        self.check_known(parent)?;
        // A fresh job has no outgoing edges, so attaching it cannot fail.
        let (id, output) = self.push_job(job)?;
        self.attach(parent, id, kind)?;
        Ok((id, output))
    }

    fn attach(&mut self, parent: JobId, child: JobId, kind: EdgeKind) -> Result<(), GraphError> {
        self.check_known(parent)?;
        self.check_known(child)?;
        if child == self.root {
            return Err(GraphError::RootHasIncomingEdge);
        }
        if parent == child {
            return Err(self.cycle_error([parent, child]));
        }
        if let Some(path) = self.path(child, parent) {
            return Err(self.cycle_error(core::iter::once(parent).chain(path)));
        }
        match kind {
            EdgeKind::Child => {
                self.node_mut(parent).edges.children.insert(child);
                self.node_mut(child).edges.child_parents.insert(parent);
            }
            EdgeKind::FollowOn => {
                self.node_mut(parent).edges.follow_ons.insert(child);
                self.node_mut(child).edges.follow_on_parents.insert(parent);
            }
        }
        Ok(())
    }

    fn check_known(&self, job: JobId) -> Result<(), GraphError> {
        if job.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownJob(job))
        }
    }

    /// Shortest path `from -> .. -> to` over every edge kind.
    fn path(&self, from: JobId, to: JobId) -> Option<Vec<JobId>> {
        let mut previous: Vec<Option<JobId>> = vec![None; self.nodes.len()];
        let mut queue = VecDeque::from([from]);
        previous[from.index()] = Some(from);
        while let Some(id) = queue.pop_front() {
            if id == to {
                let mut path = vec![to];
                let mut cursor = to;
                while cursor != from {
                    cursor = previous[cursor.index()].expect("Graph::path: [1]");
                    path.push(cursor);
                }
                path.reverse();
                return Some(path);
            }
            for next in self.node(id).successors() {
                if previous[next.index()].is_none() {
                    previous[next.index()] = Some(id);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// `job` and everything reachable from it over every edge kind.
    fn downstream_of(&self, job: JobId) -> IndexSet<JobId> {
        let mut seen = IndexSet::default();
        let mut stack = vec![job];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.node(id).successors());
            }
        }
        seen
    }
}
