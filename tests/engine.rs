mod common;

use std::time::Duration;

use common::*;
use germweave::artifacts::ArtifactKey;
use germweave::graph::{EngineError, JobInputs};

#[tokio::test]
async fn children_run_after_parent_and_before_follow_on() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(4);

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    harness
        .engine
        .add_child(&root, RecordingJob::new("child-a", log.clone()), JobInputs::new())
        .unwrap();
    harness
        .engine
        .add_child(&root, RecordingJob::new("child-b", log.clone()), JobInputs::new())
        .unwrap();
    harness
        .engine
        .add_follow_on(&root, RecordingJob::new("follow", log.clone()), JobInputs::new())
        .unwrap();

    harness.engine.run().await.unwrap();

    let root_pos = log.position("root").unwrap();
    let follow_pos = log.position("follow").unwrap();
    for child in ["child-a", "child-b"] {
        let pos = log.position(child).unwrap();
        assert!(pos > root_pos, "{child} must run after root");
        assert!(pos < follow_pos, "{child} must finish before the follow-on");
    }
}

#[tokio::test]
async fn follow_on_waits_for_nested_subtree() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(4);

    // A child spawns its own dynamic child + follow-on from inside its
    // action; the root's follow-on must still run after all of them.
    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    harness
        .engine
        .add_child(
            &root,
            DynamicSpawner {
                name: "spawner".into(),
                log: log.clone(),
            },
            JobInputs::new(),
        )
        .unwrap();
    harness
        .engine
        .add_follow_on(&root, RecordingJob::new("outer-follow", log.clone()), JobInputs::new())
        .unwrap();

    harness.engine.run().await.unwrap();

    let outer = log.position("outer-follow").unwrap();
    for earlier in ["spawner", "spawner-child", "spawner-follow"] {
        assert!(
            log.position(earlier).unwrap() < outer,
            "{earlier} must complete before the outer follow-on"
        );
    }
}

#[tokio::test]
async fn promises_carry_producer_output_to_consumers() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(2);
    let key = ArtifactKey::shared("ref.fa");

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    let producer = harness
        .engine
        .add_child(
            &root,
            ProducerJob {
                name: "producer".into(),
                key: key.clone(),
                content: b"ACGT",
            },
            JobInputs::new(),
        )
        .unwrap();
    harness
        .engine
        .add_follow_on(
            &root,
            ExpectKeyJob {
                name: "consumer".into(),
                key,
                log: log.clone(),
            },
            JobInputs::new().with_promise(producer.promise()),
        )
        .unwrap();

    harness.engine.run().await.unwrap();
    assert!(log.position("consumer").is_some());
}

#[tokio::test]
async fn failure_halts_admission_but_dispatched_sibling_finishes() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(4);

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    // Both branches are dispatched together; the failing one loses the race.
    let failing = harness
        .engine
        .add_child(
            &root,
            FailingJob::new("failing-branch").with_delay(Duration::from_millis(10)),
            JobInputs::new(),
        )
        .unwrap();
    harness
        .engine
        .add_child(
            &root,
            RecordingJob::new("surviving-branch", log.clone())
                .with_delay(Duration::from_millis(80)),
            JobInputs::new(),
        )
        .unwrap();
    // Never admitted: its parent fails first.
    harness
        .engine
        .add_follow_on(&failing, RecordingJob::new("never-runs", log.clone()), JobInputs::new())
        .unwrap();

    let err = harness.engine.run().await.unwrap_err();
    match err {
        EngineError::StageFailed { stage, .. } => assert_eq!(stage, "failing-branch"),
        other => panic!("unexpected error: {other}"),
    }

    let entries = log.snapshot();
    assert!(
        entries.contains(&"surviving-branch".to_string()),
        "already-dispatched sibling must drain to completion: {entries:?}"
    );
    assert!(!entries.contains(&"never-runs".to_string()));
}

#[tokio::test]
async fn duplicate_follow_on_is_rejected() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(2);

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    harness
        .engine
        .add_follow_on(&root, RecordingJob::new("first", log.clone()), JobInputs::new())
        .unwrap();
    let err = harness
        .engine
        .add_follow_on(&root, RecordingJob::new("second", log.clone()), JobInputs::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateFollowOn { .. }));
}

#[tokio::test]
async fn terminal_leaf_completes_the_run() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(1);
    harness
        .engine
        .schedule(RecordingJob::new("leaf", log.clone()), JobInputs::new());
    harness.engine.run().await.unwrap();
    assert_eq!(log.snapshot(), vec!["leaf".to_string()]);
}

#[tokio::test]
async fn core_hints_bound_concurrent_admission() {
    let probe = ConcurrencyProbe::new();
    let log = ExecutionLog::new();
    let mut harness = Harness::new(2);

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    for i in 0..4 {
        harness
            .engine
            .add_child(
                &root,
                ProbeJob {
                    name: format!("probe-{i}"),
                    probe: probe.clone(),
                    cores: 1,
                    hold: Duration::from_millis(40),
                },
                JobInputs::new(),
            )
            .unwrap();
    }

    harness.engine.run().await.unwrap();
    assert!(
        probe.max_cores_seen() <= 2,
        "budget of 2 cores exceeded: saw {}",
        probe.max_cores_seen()
    );
}

#[tokio::test]
async fn wide_hint_never_overlaps_other_hinted_nodes() {
    let probe = ConcurrencyProbe::new();
    let log = ExecutionLog::new();
    let mut harness = Harness::new(2);

    let root = harness
        .engine
        .schedule(RecordingJob::new("root", log.clone()), JobInputs::new());
    harness
        .engine
        .add_child(
            &root,
            ProbeJob {
                name: "wide".into(),
                probe: probe.clone(),
                cores: 2,
                hold: Duration::from_millis(40),
            },
            JobInputs::new(),
        )
        .unwrap();
    for i in 0..2 {
        harness
            .engine
            .add_child(
                &root,
                ProbeJob {
                    name: format!("narrow-{i}"),
                    probe: probe.clone(),
                    cores: 1,
                    hold: Duration::from_millis(40),
                },
                JobInputs::new(),
            )
            .unwrap();
    }

    harness.engine.run().await.unwrap();
    assert!(probe.max_cores_seen() <= 2);
}

#[tokio::test]
async fn events_report_lifecycle_per_job() {
    let log = ExecutionLog::new();
    let mut harness = Harness::new(2);
    harness
        .engine
        .schedule(RecordingJob::new("only", log.clone()), JobInputs::new());
    harness.engine.run().await.unwrap();
    harness.bus.stop_listener().await;

    let events = harness.sink.snapshot();
    let messages: Vec<String> = events.iter().map(|e| format!("{e}")).collect();
    assert!(messages.iter().any(|m| m.contains("registered")), "{messages:?}");
    assert!(messages.iter().any(|m| m.contains("started")));
    assert!(messages.iter().any(|m| m.contains("succeeded")));
    assert!(messages.iter().any(|m| m.contains("completed")));
}
