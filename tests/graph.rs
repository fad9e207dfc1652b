#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use jobgraph::{Graph, GraphError, Job, JobId, JobState};

fn job(label: &str) -> Job<u32> {
    Job::new(label, |_| Ok(0))
}

fn chain(graph: &mut Graph<u32>, labels: &[&str]) -> Vec<JobId> {
    let mut parent = graph.root();
    labels
        .iter()
        .map(|label| {
            let (id, _) = graph.add_child_job(parent, job(label)).unwrap();
            parent = id;
            id
        })
        .collect()
}

/// Every job in `done` has completed; everything else is still pending.
fn completed(done: &[JobId]) -> impl Fn(JobId) -> JobState + '_ {
    move |id| {
        if done.contains(&id) {
            JobState::Completed
        } else {
            JobState::Pending
        }
    }
}

#[test]
fn new_graph_has_barrier_root() {
    common::init_tracing();
    let graph = Graph::<u32>::new("pipeline");
    let root = graph.root();
    assert_eq!(graph.len(), 1);
    assert!(!graph.is_empty());
    assert_eq!(graph.label(root), Some("pipeline"));
    assert!(graph.is_barrier(root));
    graph.validate().unwrap();
}

#[test]
fn with_root_runs_real_work() {
    common::init_tracing();
    let (graph, output) = Graph::with_root(job("setup").memory("1G")).unwrap();
    assert!(!graph.is_barrier(graph.root()));
    assert_eq!(output.producer(), graph.root());
}

#[test]
fn edges_are_listed_in_attachment_order() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    let (b, _) = graph.add_child_job(root, job("b")).unwrap();
    let (f, _) = graph.add_follow_on_job(root, job("f")).unwrap();

    assert_eq!(graph.children(root).collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(graph.follow_ons(root).collect::<Vec<_>>(), vec![f]);
    assert_eq!(graph.jobs().collect::<Vec<_>>(), vec![root, a, b, f]);
    graph.validate().unwrap();
}

#[test]
fn cycle_is_rejected_and_graph_unchanged() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let ids = chain(&mut graph, &["a", "b", "c"]);
    let (a, c) = (ids[0], ids[2]);

    let err = graph.add_child(c, a).unwrap_err();
    assert_eq!(
        err,
        GraphError::CycleDetected {
            cycle: vec!["c".into(), "a".into(), "b".into(), "c".into()],
        }
    );
    assert_eq!(err.to_string(), "cycle detected: c -> a -> b -> c");

    // Follow-on edges count too.
    assert!(matches!(
        graph.add_follow_on(c, a),
        Err(GraphError::CycleDetected { .. })
    ));

    assert_eq!(graph.children(c).count(), 0);
    assert_eq!(graph.follow_ons(c).count(), 0);
    graph.validate().unwrap();
}

#[test]
fn self_edge_is_a_cycle() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let ids = chain(&mut graph, &["a"]);
    let err = graph.add_follow_on(ids[0], ids[0]).unwrap_err();
    assert_eq!(
        err,
        GraphError::CycleDetected {
            cycle: vec!["a".into(), "a".into()],
        }
    );
}

#[test]
fn data_dependency_closes_cycle() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (producer, output) = graph.add_child_job(root, job("producer")).unwrap();
    let (consumer, _) = graph
        .add_child_job(root, job("consumer").input("x", &output))
        .unwrap();

    assert!(matches!(
        graph.add_child(consumer, producer),
        Err(GraphError::CycleDetected { .. })
    ));
}

#[test]
fn root_cannot_have_parents() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (other, _) = graph.add_job(job("other")).unwrap();
    assert_eq!(
        graph.add_child(other, root),
        Err(GraphError::RootHasIncomingEdge)
    );

    // Also for jobs below the root, where the edge would close a cycle too.
    let (below, _) = graph.add_child_job(root, job("below")).unwrap();
    assert_eq!(
        graph.add_child(below, root),
        Err(GraphError::RootHasIncomingEdge)
    );
    assert_eq!(
        graph.add_follow_on(below, root),
        Err(GraphError::RootHasIncomingEdge)
    );
    assert_eq!(
        graph.add_child(root, root),
        Err(GraphError::RootHasIncomingEdge)
    );
    assert_eq!(graph.children(below).count(), 0);
}

#[test]
fn unknown_job_is_rejected() {
    common::init_tracing();
    let mut big = Graph::new("root");
    chain(&mut big, &["a", "b", "c"]);
    let foreign = big.jobs().last().unwrap();

    let mut small = Graph::new("root");
    let root = small.root();
    assert_eq!(
        small.add_child(root, foreign),
        Err(GraphError::UnknownJob(foreign))
    );
    assert!(matches!(
        small.add_child_job(foreign, job("x")),
        Err(GraphError::UnknownJob(_))
    ));
    assert_eq!(small.len(), 1);
}

#[test]
fn detached_job_fails_validation() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    chain(&mut graph, &["a"]);
    let (lost, _) = graph.add_job(job("lost")).unwrap();
    assert_eq!(
        graph.validate(),
        Err(GraphError::Detached {
            job: lost,
            label: "lost".into(),
        })
    );
}

#[test]
fn outputs_cannot_cross_graphs() {
    common::init_tracing();
    let mut first = Graph::new("first");
    let root = first.root();
    let (_, output) = first.add_child_job(root, job("producer")).unwrap();

    let mut second = Graph::new("second");
    let root = second.root();
    let err = second
        .add_child_job(root, job("consumer").input("x", output))
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::ForeignDeferred {
            label: "consumer".into(),
        }
    );
    assert_eq!(second.len(), 1);
}

#[test]
fn duplicate_edge_is_a_no_op() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    graph.add_child(root, a).unwrap();
    assert_eq!(graph.children(root).collect::<Vec<_>>(), vec![a]);
}

#[test]
fn child_is_ready_once_parent_completes() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    let (b, _) = graph.add_child_job(a, job("b")).unwrap();

    assert!(graph.is_ready(root, completed(&[])));
    assert!(!graph.is_ready(b, completed(&[root])));
    assert!(graph.is_ready(b, completed(&[root, a])));
}

#[test]
fn follow_on_waits_for_subtree() {
    common::init_tracing();
    //   root
    //   /  \
    //  a    b ...> f
    //       |
    //       c
    //       |
    //       d
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    let (b, _) = graph.add_child_job(root, job("b")).unwrap();
    let (c, _) = graph.add_child_job(b, job("c")).unwrap();
    let (d, _) = graph.add_child_job(c, job("d")).unwrap();
    let (f, _) = graph.add_follow_on_job(b, job("f")).unwrap();
    graph.validate().unwrap();

    // `b` alone is not enough, nor is its direct child.
    assert!(!graph.is_ready(f, completed(&[root, b])));
    assert!(!graph.is_ready(f, completed(&[root, b, c])));
    // `a` is not under `b`, so it does not matter.
    assert!(graph.is_ready(f, completed(&[root, b, c, d])));
    assert!(!graph.is_ready(f, completed(&[root, a, c, d])));
}

#[test]
fn failed_prerequisite_is_not_ready() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    let (b, _) = graph.add_child_job(a, job("b")).unwrap();
    assert!(!graph.is_ready(b, |id| {
        if id == a {
            JobState::Failed
        } else {
            JobState::Completed
        }
    }));
}

#[test]
fn diamond_is_valid() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (a, _) = graph.add_child_job(root, job("a")).unwrap();
    let (b, _) = graph.add_child_job(root, job("b")).unwrap();
    let (c, _) = graph.add_child_job(a, job("c")).unwrap();
    graph.add_child(b, c).unwrap();
    graph.validate().unwrap();
    assert!(!graph.is_ready(c, |id| {
        if id == b {
            JobState::Running
        } else {
            JobState::Completed
        }
    }));
}
