use crate::{
    cancel::CancellationToken,
    config::RunConfig,
    graph::Graph,
    job::{JobError, StepContext, StepError, Work},
    report::{JobRecord, JobState, RunReport},
    resource::ResourceUsage,
    scheduler::{ScheduleError, plan::Plan},
    types::{JobId, Value},
};
use core::{mem, time::Duration};
use crossbeam_channel::{Receiver, Sender, select};
use rayon::ThreadPool;
use std::{
    any::Any,
    collections::{BTreeSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, debug_span, error, info, info_span, warn};

/// Message from a worker to the coordinator.
struct Finished<V> {
    job: JobId,
    outcome: Result<V, StepError>,
    elapsed: Duration,
}

enum Wake<V> {
    Finished(Finished<V>),
    Cancelled,
    TimedOut,
}

/// State of one run, owned by the coordinating thread.
///
/// Nothing here is shared with workers: a worker receives the step, its
/// resolved inputs and a channel, and reports back through the channel.
pub(super) struct Execution<'a, V> {
    graph: Graph<V>,
    plan: Plan,
    config: &'a RunConfig,
    pool: &'a ThreadPool,
    /// Cancelled by the caller's token, or by this run alone on timeout,
    /// fail-fast or abort.
    cancellation: CancellationToken,
    states: Vec<JobState>,
    errors: Vec<Option<Arc<JobError>>>,
    elapsed: Vec<Option<Duration>>,
    /// First non-completed prerequisite's root cause, per job.
    blocked_by: Vec<Option<Arc<JobError>>>,
    /// Ready jobs; ordered by id, which is insertion order.
    ready: BTreeSet<JobId>,
    /// Jobs whose prerequisites have all just become terminal.
    released: VecDeque<JobId>,
    usage: ResourceUsage,
    running: usize,
    cancelled: Option<Arc<JobError>>,
    fatal: Option<ScheduleError>,
}

impl<'a, V: Value> Execution<'a, V> {
    pub(super) fn new(
        graph: Graph<V>,
        plan: Plan,
        config: &'a RunConfig,
        pool: &'a ThreadPool,
        cancellation: &CancellationToken,
    ) -> Self {
        let len = graph.len();
        Self {
            graph,
            plan,
            config,
            pool,
            cancellation: cancellation.child(),
            states: vec![JobState::Pending; len],
            errors: vec![None; len],
            elapsed: vec![None; len],
            blocked_by: vec![None; len],
            ready: BTreeSet::new(),
            released: VecDeque::new(),
            usage: ResourceUsage::default(),
            running: 0,
            cancelled: None,
            fatal: None,
        }
    }

    /// Drive the graph until every job is terminal.
    pub(super) fn run(mut self) -> Result<RunReport, ScheduleError> {
        let span = info_span!("run", jobs = self.graph.len());
        let _enter = span.enter();
        let started = Instant::now();
        info!(
            budget = %self.config.budget,
            workers = self.config.workers().get(),
            "starting run"
        );

        let (events_tx, events) = crossbeam_channel::unbounded::<Finished<V>>();
        let (cancel_tx, mut cancel_signal) = crossbeam_channel::bounded::<()>(1);
        let _subscription = self.cancellation.subscribe(cancel_tx);
        let mut timeout: Receiver<Instant> = match self.config.timeout {
            Some(timeout) => crossbeam_channel::after(timeout),
            None => crossbeam_channel::never(),
        };

        self.released.extend(
            self.plan
                .waiting
                .iter()
                .enumerate()
                .filter(|&(_, &waiting)| waiting == 0)
                .map(|(idx, _)| JobId::from_index(idx)),
        );

        loop {
            if self.cancellation.is_cancelled() {
                self.cancel_pending();
            }
            self.release();
            self.admit(&events_tx);
            if self.running == 0 {
                assert!(self.ready.is_empty(), "Execution::run: [1]");
                break;
            }
            // Sleep until a worker reports back or the run is interrupted.
            let wake = select! {
                recv(events) -> finished => Wake::Finished(finished.expect("Execution::run: [2]")),
                recv(cancel_signal) -> _ => Wake::Cancelled,
                recv(timeout) -> _ => Wake::TimedOut,
            };
            match wake {
                Wake::Finished(finished) => self.finish(finished),
                Wake::Cancelled => cancel_signal = crossbeam_channel::never(),
                Wake::TimedOut => {
                    timeout = crossbeam_channel::never();
                    warn!(timeout = ?self.config.timeout, "run timed out, cancelling");
                    self.cancellation.cancel();
                }
            }
        }

        assert!(self.usage.is_idle(), "Execution::run: [3]");
        assert!(
            self.states.iter().all(|state| state.is_terminal()),
            "Execution::run: [4]"
        );
        if let Some(fatal) = self.fatal {
            error!(%fatal, "run aborted");
            return Err(fatal);
        }
        let report = self.into_report(started.elapsed());
        if report.is_success() {
            info!("{report}");
        } else {
            warn!("{report}");
        }
        Ok(report)
    }

    /// Start every ready job that fits, scanning in insertion order. A job
    /// that does not fit is passed over, not waited for.
    fn admit(&mut self, events: &Sender<Finished<V>>) {
        if self.ready.is_empty() {
            return;
        }
        let workers = self.config.workers().get();
        let mut admitted = Vec::new();
        for &job in &self.ready {
            if self.running + admitted.len() >= workers {
                break;
            }
            let demand = self.plan.demands[job.index()].expect("Execution::admit: [1]");
            if self.usage.fits(&demand, &self.config.budget) {
                self.usage.acquire(&demand);
                admitted.push(job);
            }
        }
        for job in admitted {
            self.ready.remove(&job);
            self.dispatch(job, events.clone());
        }
    }

    fn dispatch(&mut self, job: JobId, events: Sender<Finished<V>>) {
        let node = self.graph.node_mut(job);
        let Work::Step(step) = mem::replace(&mut node.work, Work::Taken) else {
            unreachable!("Execution::dispatch: [1]");
        };
        let inputs = node.resolve_inputs().expect("Execution::dispatch: [2]");
        let label = node.label.clone();
        let ctx = StepContext::new(
            job,
            label.clone(),
            inputs,
            node.resources,
            self.cancellation.clone(),
        );
        self.states[job.index()] = JobState::Running;
        self.running += 1;
        debug!(%job, %label, resources = %node.resources, "running");

        self.pool.spawn(move || {
            let span = debug_span!("job", id = %job, label = %label);
            let _enter = span.enter();
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| step.run(&ctx)))
                .unwrap_or_else(|payload| Err(StepError::Panicked(panic_message(&*payload))));
            // The coordinator outlives every job it dispatched.
            let _ = events.send(Finished {
                job,
                outcome,
                elapsed: started.elapsed(),
            });
        });
    }

    fn finish(&mut self, finished: Finished<V>) {
        let Finished {
            job,
            outcome,
            elapsed,
        } = finished;
        let demand = self.plan.demands[job.index()].expect("Execution::finish: [1]");
        self.usage.release(&demand);
        self.running -= 1;
        self.elapsed[job.index()] = Some(elapsed);
        let label = self.graph.node(job).label.clone();

        match outcome {
            Ok(value) => {
                self.states[job.index()] = JobState::Completed;
                debug!(%job, %label, ?elapsed, "completed");
                let resolved = match &self.graph.node(job).output {
                    Some(output) => output.resolve(value).is_ok(),
                    None => true,
                };
                if !resolved {
                    self.abort_double_resolution(job);
                }
                self.settle(job, None);
            }
            Err(source) => {
                let error = Arc::new(JobError::WorkItem {
                    job,
                    label,
                    source,
                });
                warn!(%job, %error, "job failed");
                self.states[job.index()] = JobState::Failed;
                self.errors[job.index()] = Some(error.clone());
                self.fail_output(job, &error);
                self.settle(job, Some(&error));
                if self.config.fail_fast {
                    self.cancellation.cancel();
                }
            }
        }
    }

    /// Move jobs whose prerequisites are all terminal to their next state.
    fn release(&mut self) {
        while let Some(job) = self.released.pop_front() {
            let node = self.graph.node(job);
            if let Some(cancelled) = self.cancelled.clone() {
                self.skip(job, cancelled.clone(), &cancelled);
            } else if let Some(root) = self.blocked_by[job.index()].take() {
                let error = Arc::new(JobError::UpstreamFailure {
                    job,
                    label: node.label.clone(),
                    root: root.clone(),
                });
                self.skip(job, error, &root);
            } else if node.is_barrier() {
                debug_assert!(self.is_ready(job), "Execution::release: [1]");
                self.states[job.index()] = JobState::Completed;
                debug!(%job, label = %node.label, "barrier passed");
                self.settle(job, None);
            } else {
                debug_assert!(self.is_ready(job), "Execution::release: [2]");
                self.states[job.index()] = JobState::Ready;
                debug!(%job, label = %node.label, "ready");
                self.ready.insert(job);
            }
        }
    }

    fn skip(&mut self, job: JobId, error: Arc<JobError>, root: &Arc<JobError>) {
        debug!(%job, label = %self.graph.node(job).label, %error, "skipped");
        self.states[job.index()] = JobState::Skipped;
        self.errors[job.index()] = Some(error);
        self.fail_output(job, root);
        self.settle(job, Some(root));
    }

    /// Tell every dependent that `job` is terminal. `failure` is the root
    /// cause when `job` did not complete.
    fn settle(&mut self, job: JobId, failure: Option<&Arc<JobError>>) {
        let Self {
            plan,
            blocked_by,
            released,
            ..
        } = self;
        for &dependent in &plan.dependents[job.index()] {
            if let Some(root) = failure {
                blocked_by[dependent.index()].get_or_insert_with(|| root.clone());
            }
            let waiting = &mut plan.waiting[dependent.index()];
            *waiting = waiting.checked_sub(1).expect("Execution::settle: [1]");
            if *waiting == 0 {
                released.push_back(dependent);
            }
        }
    }

    /// Stop admitting work. Ready jobs are skipped now; pending ones as
    /// their prerequisites settle.
    fn cancel_pending(&mut self) {
        if self.cancelled.is_some() {
            return;
        }
        warn!(
            running = self.running,
            ready = self.ready.len(),
            "run cancelled"
        );
        let cancelled = Arc::new(JobError::Cancelled);
        self.cancelled = Some(cancelled.clone());
        for job in mem::take(&mut self.ready) {
            self.skip(job, cancelled.clone(), &cancelled);
        }
    }

    fn fail_output(&mut self, job: JobId, root: &Arc<JobError>) {
        let failed = match &self.graph.node(job).output {
            Some(output) => output.fail(root.clone()).is_ok(),
            None => true,
        };
        if !failed {
            self.abort_double_resolution(job);
        }
    }

    fn abort_double_resolution(&mut self, job: JobId) {
        let label = self.graph.node(job).label.to_string();
        error!(%job, %label, "job output settled twice");
        self.fatal
            .get_or_insert(ScheduleError::DoubleResolution { job, label });
        self.cancellation.cancel();
    }

    fn is_ready(&self, job: JobId) -> bool {
        self.graph.is_ready(job, |id| self.states[id.index()])
    }

    fn into_report(self, elapsed: Duration) -> RunReport {
        let Self {
            graph,
            states,
            errors,
            elapsed: timings,
            ..
        } = self;
        let records = graph
            .nodes()
            .iter()
            .zip(states)
            .zip(errors)
            .zip(timings)
            .map(|(((node, state), error), elapsed)| JobRecord {
                id: node.id,
                label: node.label.clone(),
                state,
                error,
                elapsed,
            })
            .collect();
        RunReport::new(records, elapsed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
