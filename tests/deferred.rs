#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use jobgraph::{
    Deferred, DeferredError, DeferredState, Graph, Job, JobError, ResourceBudget, StepError,
};
use std::sync::Arc;

fn deferred() -> (jobgraph::JobId, Deferred<String>) {
    let mut graph = Graph::new("root");
    let root = graph.root();
    graph
        .add_child_job(root, Job::new("producer", |_| Ok(String::new())))
        .unwrap()
}

#[test]
fn starts_unresolved() {
    common::init_tracing();
    let (producer, output) = deferred();
    assert_eq!(output.producer(), producer);
    assert!(matches!(output.state(), DeferredState::Unresolved));
    assert!(!output.state().is_settled());
    assert!(!output.is_resolved());
    assert_eq!(output.value(), None);
    assert!(output.error().is_none());
}

#[test]
fn resolves_once_for_every_clone() {
    common::init_tracing();
    let (producer, output) = deferred();
    let clone = output.clone();
    output.resolve("sample.bam".to_owned()).unwrap();

    assert!(clone.is_resolved());
    assert_eq!(clone.value().as_deref(), Some("sample.bam"));
    assert_eq!(
        clone.resolve("other.bam".to_owned()),
        Err(DeferredError::DoubleResolution { producer })
    );
    assert_eq!(
        output.fail(Arc::new(JobError::Cancelled)),
        Err(DeferredError::DoubleResolution { producer })
    );
    assert_eq!(output.value().as_deref(), Some("sample.bam"));
}

#[test]
fn failure_is_terminal() {
    common::init_tracing();
    let (producer, output) = deferred();
    output.fail(Arc::new(JobError::Cancelled)).unwrap();

    assert!(output.state().is_settled());
    assert!(!output.is_resolved());
    assert!(matches!(output.error().as_deref(), Some(JobError::Cancelled)));
    assert_eq!(
        output.resolve("late.bam".to_owned()),
        Err(DeferredError::DoubleResolution { producer })
    );
}

#[test]
fn run_settles_outputs() {
    common::init_tracing();
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (_, ok) = graph
        .add_child_job(root, Job::new("ok", |_| Ok("out.vcf".to_owned())))
        .unwrap();
    let (failing, failed) = graph
        .add_child_job(
            root,
            Job::new("fails", |_| Err(StepError::new("exit status 1"))),
        )
        .unwrap();
    let (_, skipped) = graph
        .add_child_job(
            root,
            Job::new("needs-failed", |_| Ok(String::new())).input("x", &failed),
        )
        .unwrap();

    let report = jobgraph::run(graph, ResourceBudget::detect()).unwrap();
    assert!(!report.is_success());

    assert_eq!(ok.value().as_deref(), Some("out.vcf"));
    let error = failed.error().unwrap();
    assert_eq!(error.origin(), Some(failing));
    // Downstream outputs carry the root cause, not a wrapper.
    let error = skipped.error().unwrap();
    assert_eq!(error.origin(), Some(failing));
    assert!(matches!(*error, JobError::WorkItem { .. }));
}
