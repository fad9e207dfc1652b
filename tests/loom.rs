#![allow(missing_docs)]
#![cfg(feature = "loom")]

use jobgraph::{
    CancellationToken, Deferred, DeferredState, Graph, Job, JobError, StepContext, StepError,
};
use loom::thread;
use std::sync::Arc;

fn output() -> Deferred<u32> {
    let mut graph = Graph::new("root");
    let root = graph.root();
    let (_, output) = graph
        .add_child_job(
            root,
            Job::new("producer", |_: &StepContext<u32>| Ok::<_, StepError>(7)),
        )
        .unwrap();
    output
}

#[test]
fn loom_deferred_settles_exactly_once() {
    loom::model(|| {
        // Two racing settlements of the same output: one value, one failure.
        // Exactly one must win, and every clone must observe the winner.
        let deferred = output();
        let resolver = deferred.clone();
        let failer = deferred.clone();

        let lhs = thread::spawn(move || resolver.resolve(7).is_ok());
        let rhs = thread::spawn(move || failer.fail(Arc::new(JobError::Cancelled)).is_ok());
        let resolved = lhs.join().unwrap();
        let failed = rhs.join().unwrap();

        assert!(resolved ^ failed);
        match deferred.state() {
            DeferredState::Resolved(value) => {
                assert!(resolved);
                assert_eq!(value, 7);
            }
            DeferredState::Failed(error) => {
                assert!(failed);
                assert!(matches!(*error, JobError::Cancelled));
            }
            DeferredState::Unresolved => panic!("deferred left unresolved"),
        }
    });
}

#[test]
fn loom_deferred_value_visible_to_readers() {
    loom::model(|| {
        // A reader racing the producer sees either nothing or the full value.
        let deferred = output();
        let reader = deferred.clone();

        let producer = thread::spawn(move || deferred.resolve(42).unwrap());
        let seen = reader.value();
        producer.join().unwrap();

        assert!(matches!(seen, None | Some(42)));
        assert_eq!(reader.value(), Some(42));
    });
}

#[test]
fn loom_concurrent_cancel_is_idempotent() {
    loom::model(|| {
        let token = CancellationToken::new();
        let lhs = {
            let token = token.clone();
            thread::spawn(move || token.cancel())
        };
        let rhs = {
            let token = token.clone();
            thread::spawn(move || token.cancel())
        };
        lhs.join().unwrap();
        rhs.join().unwrap();
        assert!(token.is_cancelled());
    });
}
