use crate::{
    cancel::CancellationToken,
    deferred::Deferred,
    resource::{Memory, ResourceError, ResourceSpec},
    types::{IndexMap, IndexSet, JobId, Value},
};
use derive_more::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a step.
///
/// The core never interprets it; it is recorded on the failing job and
/// becomes the root cause for everything downstream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepError {
    /// Free-form failure, optionally wrapping the underlying error.
    #[error("{message}")]
    Failed {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// The step asked for an argument it was not given.
    #[error("missing input `{0}`")]
    MissingInput(String),
    /// The step asked for a single value where a list was given, or the
    /// other way round.
    #[error("input `{name}` is a {actual}, expected a {expected}")]
    InputShape {
        /// Argument name.
        name: String,
        /// Shape the step asked for.
        expected: &'static str,
        /// Shape it was given.
        actual: &'static str,
    },
    /// The step panicked.
    #[error("step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// A failure with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// A failure wrapping another error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(error: std::io::Error) -> Self {
        Self::with_source(error.to_string(), error)
    }
}

/// Why a job did not complete, as recorded in the run report and carried by
/// failed [`Deferred`] values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    /// The job's own step failed.
    #[error("job {job} `{label}` failed: {source}")]
    WorkItem {
        /// Failing job.
        job: JobId,
        /// Its label.
        label: Arc<str>,
        /// What the step reported.
        #[source]
        source: StepError,
    },
    /// Something this job depends on did not complete.
    #[error("job {job} `{label}` skipped: upstream failure ({root})")]
    UpstreamFailure {
        /// Skipped job.
        job: JobId,
        /// Its label.
        label: Arc<str>,
        /// The originating failure.
        root: Arc<JobError>,
    },
    /// The run was cancelled before this job could run.
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// The failure that started the chain this error belongs to.
    #[must_use]
    pub fn root_cause(&self) -> &JobError {
        match self {
            Self::UpstreamFailure { root, .. } => root.root_cause(),
            other => other,
        }
    }

    /// The job the root cause happened in, if it happened in a job at all.
    #[must_use]
    pub fn origin(&self) -> Option<JobId> {
        match self.root_cause() {
            Self::WorkItem { job, .. } => Some(*job),
            _ => None,
        }
    }
}

/// One argument of a job, before anything has run.
#[derive(Debug)]
pub enum Input<V> {
    /// A value known at construction time.
    Value(V),
    /// Another job's output.
    Deferred(Deferred<V>),
    /// Several jobs' outputs, passed to the step as a list in this order.
    All(Vec<Deferred<V>>),
}

impl<V: Value> Input<V> {
    /// A concrete value.
    pub fn value(value: impl Into<V>) -> Self {
        Self::Value(value.into())
    }

    /// A list of deferred outputs.
    pub fn all(outputs: impl IntoIterator<Item = Deferred<V>>) -> Self {
        Self::All(outputs.into_iter().collect())
    }

    pub(crate) fn deferreds(&self) -> &[Deferred<V>] {
        match self {
            Self::Value(_) => &[],
            Self::Deferred(deferred) => core::slice::from_ref(deferred),
            Self::All(deferreds) => deferreds,
        }
    }

    /// Materialize the argument once every producer has completed.
    fn resolve(&self) -> Option<Arg<V>> {
        Some(match self {
            Self::Value(value) => Arg::One(value.clone()),
            Self::Deferred(deferred) => Arg::One(deferred.value()?),
            Self::All(deferreds) => Arg::Many(
                deferreds
                    .iter()
                    .map(Deferred::value)
                    .collect::<Option<Vec<_>>>()?,
            ),
        })
    }
}

impl<V> From<Deferred<V>> for Input<V> {
    fn from(deferred: Deferred<V>) -> Self {
        Self::Deferred(deferred)
    }
}

impl<V> From<&Deferred<V>> for Input<V> {
    fn from(deferred: &Deferred<V>) -> Self {
        Self::Deferred(deferred.clone())
    }
}

impl<V> From<Vec<Deferred<V>>> for Input<V> {
    fn from(deferreds: Vec<Deferred<V>>) -> Self {
        Self::All(deferreds)
    }
}

#[derive(Debug, Clone)]
enum Arg<V> {
    One(V),
    Many(Vec<V>),
}

impl<V> Arg<V> {
    fn shape(&self) -> &'static str {
        match self {
            Self::One(_) => "single value",
            Self::Many(_) => "list",
        }
    }
}

/// Resolved arguments handed to a step.
#[derive(Debug, Clone)]
pub struct Inputs<V> {
    args: IndexMap<String, Arg<V>>,
}

impl<V> Inputs<V> {
    /// A single-valued argument, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        match self.args.get(name)? {
            Arg::One(value) => Some(value),
            Arg::Many(_) => None,
        }
    }

    /// A single-valued argument.
    ///
    /// # Errors
    /// If the argument is missing or is a list.
    pub fn one(&self, name: &str) -> Result<&V, StepError> {
        match self.lookup(name)? {
            Arg::One(value) => Ok(value),
            other => Err(shape_error(name, "single value", other)),
        }
    }

    /// A list argument. A single value is returned as a one-element slice.
    ///
    /// # Errors
    /// If the argument is missing.
    pub fn all(&self, name: &str) -> Result<&[V], StepError> {
        Ok(match self.lookup(name)? {
            Arg::One(value) => core::slice::from_ref(value),
            Arg::Many(values) => values,
        })
    }

    /// Argument names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.keys().map(String::as_str)
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&Arg<V>, StepError> {
        self.args
            .get(name)
            .ok_or_else(|| StepError::MissingInput(name.to_owned()))
    }
}

fn shape_error<V>(name: &str, expected: &'static str, actual: &Arg<V>) -> StepError {
    StepError::InputShape {
        name: name.to_owned(),
        expected,
        actual: actual.shape(),
    }
}

/// Everything a step sees while it runs.
#[derive(Debug)]
pub struct StepContext<V> {
    job: JobId,
    label: Arc<str>,
    inputs: Inputs<V>,
    resources: ResourceSpec,
    cancellation: CancellationToken,
}

impl<V> StepContext<V> {
    pub(crate) fn new(
        job: JobId,
        label: Arc<str>,
        inputs: Inputs<V>,
        resources: ResourceSpec,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            job,
            label,
            inputs,
            resources,
            cancellation,
        }
    }

    /// The running job.
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// The running job's label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolved arguments.
    #[must_use]
    pub fn inputs(&self) -> &Inputs<V> {
        &self.inputs
    }

    /// The resources the job was admitted with; tool wrappers size their
    /// thread and heap flags from this.
    #[must_use]
    pub fn resources(&self) -> &ResourceSpec {
        &self.resources
    }

    /// Whether the run has been cancelled. Long steps should poll this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The work a job performs.
///
/// Implemented for every `FnOnce(&StepContext<V>) -> Result<V, StepError>`
/// closure. Steps must not touch shared pipeline state; they receive their
/// inputs and return their output.
pub trait Step<V>: Send {
    /// Run the step to completion.
    ///
    /// # Errors
    /// Whatever the wrapped tool reports.
    fn run(self: Box<Self>, ctx: &StepContext<V>) -> Result<V, StepError>;
}

impl<V, F> Step<V> for F
where
    F: FnOnce(&StepContext<V>) -> Result<V, StepError> + Send,
{
    fn run(self: Box<Self>, ctx: &StepContext<V>) -> Result<V, StepError> {
        (*self)(ctx)
    }
}

pub(crate) type BoxedStep<V> = Box<dyn Step<V>>;

/// Definition of a job before it is added to a graph.
///
/// Resources are validated when the job is added, so a bad spec fails at
/// construction time rather than when the pipeline runs.
#[derive(Debug)]
pub struct Job<V> {
    label: String,
    #[debug(skip)]
    step: BoxedStep<V>,
    cores: u32,
    memory: Result<Memory, ResourceError>,
    inputs: IndexMap<String, Input<V>>,
}

impl<V: Value> Job<V> {
    /// A job running `step` with the default resources.
    pub fn new(
        label: impl Into<String>,
        step: impl FnOnce(&StepContext<V>) -> Result<V, StepError> + Send + 'static,
    ) -> Self {
        Self::from_step(label, Box::new(step))
    }

    /// A job running a boxed [`Step`].
    pub fn from_step(label: impl Into<String>, step: Box<dyn Step<V>>) -> Self {
        Self {
            label: label.into(),
            step,
            cores: ResourceSpec::DEFAULT.cores(),
            memory: Ok(ResourceSpec::DEFAULT.memory()),
            inputs: IndexMap::default(),
        }
    }

    /// Requested cores.
    #[must_use]
    pub fn cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    /// Requested memory in human notation, e.g. `"16G"`.
    #[must_use]
    pub fn memory(mut self, memory: impl AsRef<str>) -> Self {
        self.memory = memory.as_ref().parse();
        self
    }

    /// Requested memory.
    #[must_use]
    pub fn memory_size(mut self, memory: Memory) -> Self {
        self.memory = Ok(memory);
        self
    }

    /// Cores and memory at once.
    #[must_use]
    pub fn resources(mut self, spec: ResourceSpec) -> Self {
        self.cores = spec.cores();
        self.memory = Ok(spec.memory());
        self
    }

    /// Add a named argument. A later argument with the same name replaces
    /// an earlier one.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, input: impl Into<Input<V>>) -> Self {
        self.inputs.insert(name.into(), input.into());
        self
    }

    /// Add a named argument known at construction time.
    #[must_use]
    pub fn arg(self, name: impl Into<String>, value: impl Into<V>) -> Self {
        self.input(name, Input::value(value))
    }

    /// The job's label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_node(self, id: JobId) -> Result<JobNode<V>, ResourceError> {
        let Self {
            label,
            step,
            cores,
            memory,
            inputs,
        } = self;
        let resources = ResourceSpec::new(cores, memory?)?;
        let producers = inputs
            .values()
            .flat_map(Input::deferreds)
            .map(Deferred::producer)
            .collect();
        Ok(JobNode {
            id,
            label: label.into(),
            resources,
            work: Work::Step(step),
            inputs,
            producers,
            output: None,
            edges: Edges::default(),
        })
    }
}

/// What a node does when it runs.
#[derive(Debug)]
pub(crate) enum Work<V> {
    /// A real step, taken out when the job is dispatched.
    Step(#[debug(skip)] BoxedStep<V>),
    /// Dispatched already.
    Taken,
    /// Pure synchronization point.
    Barrier,
}

/// Adjacency of one node. Forward and reverse edges are kept per kind.
#[derive(Debug, Default)]
pub(crate) struct Edges {
    pub(crate) children: IndexSet<JobId>,
    pub(crate) follow_ons: IndexSet<JobId>,
    pub(crate) child_parents: IndexSet<JobId>,
    pub(crate) follow_on_parents: IndexSet<JobId>,
    pub(crate) consumers: IndexSet<JobId>,
}

/// A job inside a graph.
#[derive(Debug)]
pub(crate) struct JobNode<V> {
    pub(crate) id: JobId,
    pub(crate) label: Arc<str>,
    pub(crate) resources: ResourceSpec,
    pub(crate) work: Work<V>,
    pub(crate) inputs: IndexMap<String, Input<V>>,
    /// Jobs whose outputs this job consumes.
    pub(crate) producers: IndexSet<JobId>,
    /// `None` for barriers.
    pub(crate) output: Option<Deferred<V>>,
    pub(crate) edges: Edges,
}

impl<V: Value> JobNode<V> {
    pub(crate) fn barrier(id: JobId, label: String) -> Self {
        Self {
            id,
            label: label.into(),
            resources: ResourceSpec::BARRIER,
            work: Work::Barrier,
            inputs: IndexMap::default(),
            producers: IndexSet::default(),
            output: None,
            edges: Edges::default(),
        }
    }

    pub(crate) fn is_barrier(&self) -> bool {
        matches!(self.work, Work::Barrier)
    }

    /// Every job this node has an outgoing edge to, of any kind.
    pub(crate) fn successors(&self) -> impl Iterator<Item = JobId> + '_ {
        self.edges
            .children
            .iter()
            .chain(&self.edges.follow_ons)
            .chain(&self.edges.consumers)
            .copied()
    }

    pub(crate) fn has_parents(&self) -> bool {
        !(self.edges.child_parents.is_empty()
            && self.edges.follow_on_parents.is_empty()
            && self.producers.is_empty())
    }

    /// Resolve inputs for dispatch. `None` if a producer has not completed,
    /// which the scheduler's readiness rule rules out.
    pub(crate) fn resolve_inputs(&self) -> Option<Inputs<V>> {
        let args = self
            .inputs
            .iter()
            .map(|(name, input)| Some((name.clone(), input.resolve()?)))
            .collect::<Option<IndexMap<_, _>>>()?;
        Some(Inputs { args })
    }
}
