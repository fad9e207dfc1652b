use crate::{
    graph::{Graph, find_cycle},
    resource::{ResourceBudget, ResourceSpec},
    scheduler::ScheduleError,
    types::{IndexSet, JobId, Value},
};
use unzip3::Unzip3;

/// Flattened execution plan.
///
/// Child edges, follow-on edges and data dependencies are all reduced to one
/// relation: the set of distinct jobs each job must wait for. At run time a
/// job becomes eligible when its counter of unfinished prerequisites drops
/// to zero, the same counting protocol the graph's parents use to release a
/// shared child.
#[derive(Debug)]
pub(super) struct Plan {
    /// Number of distinct prerequisites of each job.
    pub(super) waiting: Vec<usize>,
    /// Jobs that list each job as a prerequisite, in insertion order.
    pub(super) dependents: Vec<Vec<JobId>>,
    /// Resources to acquire for each job; `None` for barriers.
    pub(super) demands: Vec<Option<ResourceSpec>>,
}

impl Plan {
    /// Validate `graph` against `budget` and flatten it.
    ///
    /// # Errors
    /// Structural errors from [`Graph::validate`], jobs that could never fit
    /// the budget, and follow-on constraints that can never all be met.
    pub(super) fn build<V: Value>(
        graph: &Graph<V>,
        budget: &ResourceBudget,
    ) -> Result<Self, ScheduleError> {
        // Phase 1: structural validation. Cycles over plain edges, detached
        // jobs and a root with parents are rejected before anything else.
        graph.validate()?;

        // Phase 2: admission. A job bigger than the whole budget would sit
        // in the ready queue forever.
        for node in graph.nodes() {
            if !node.is_barrier() && !budget.admits(&node.resources) {
                return Err(ScheduleError::ResourceSpecExceedsBudget {
                    job: node.id,
                    label: node.label.to_string(),
                    demand: node.resources,
                    budget: *budget,
                });
            }
        }

        // Phase 3: flatten every kind of predecessor into one prerequisite
        // set per job.
        //
        //   R
        //   |          child edges:     R -> S, S -> {A, B}
        //   S ...> M   follow-on edge:  S ..> M
        //  / \
        // A   B        prerequisites(M) = wait_set(S, M) = {S, A, B}
        //
        // A follow-on's prerequisites are its parent plus everything hanging
        // below the parent's children, so M waits for however many jobs
        // ended up under S.
        let (prerequisites, waiting, demands): (Vec<IndexSet<JobId>>, Vec<usize>, Vec<_>) = graph
            .nodes()
            .iter()
            .map(|node| {
                let mut prerequisites = IndexSet::default();
                prerequisites.extend(node.edges.child_parents.iter().copied());
                prerequisites.extend(node.producers.iter().copied());
                for &parent in &node.edges.follow_on_parents {
                    prerequisites.extend(graph.follow_on_wait_set(parent, node.id));
                }
                assert!(!prerequisites.contains(&node.id), "Plan::build: [1]");
                let waiting = prerequisites.len();
                let demand = (!node.is_barrier()).then_some(node.resources);
                (prerequisites, waiting, demand)
            })
            .unzip3();

        let mut dependents = vec![Vec::new(); prerequisites.len()];
        for (idx, prerequisites) in prerequisites.iter().enumerate() {
            for prerequisite in prerequisites {
                dependents[prerequisite.index()].push(JobId::from_index(idx));
            }
        }

        // Phase 4: the flattened relation can still be cyclic even though the
        // edges are not, e.g. two follow-ons of one job where each is also
        // reachable from the other's side of the parent's subtree.
        if let Some(cycle) = find_cycle(dependents.len(), |idx| {
            dependents[idx].iter().map(|id| id.index())
        }) {
            return Err(graph
                .cycle_error(cycle.into_iter().map(JobId::from_index))
                .into());
        }

        if let Some(root) = waiting.first() {
            assert_eq!(*root, 0, "Plan::build: [2]");
        }
        Ok(Self {
            waiting,
            dependents,
            demands,
        })
    }
}
