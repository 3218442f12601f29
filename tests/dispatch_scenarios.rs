// tests/dispatch_scenarios.rs

mod common;
use crate::common::builders::TaskFileBuilder;
use crate::common::harness::HarnessBuilder;
use crate::common::{init_tracing, status_row, with_timeout};

use std::time::Duration;

use simplequeue::dispatch::{read_counters, DriverState};
use simplequeue::mailbox::{keys, Mailbox, Message};
use simplequeue::types::{StatusRecord, TaskExit};

#[tokio::test]
async fn drain_directive_with_one_engine() {
    init_tracing();
    let mut harness = HarnessBuilder::new(
        TaskFileBuilder::new().task("echo a").drain().task("echo b"),
    )
    .engine("0", "node1")
    .build()
    .await
    .unwrap();

    let (summary, outcomes) = with_timeout(harness.run()).await.unwrap();

    assert_eq!(outcomes[0].tasks, vec![0, 2]);
    let timeline = &harness.timeline;
    assert!(timeline.finished_at(0).unwrap() < timeline.started_at(2).unwrap());

    let rows = harness.status_lines();
    assert_eq!(rows.len(), 2);
    assert_eq!(status_row(&rows, 0).unwrap()[7], "echo a");
    assert_eq!(status_row(&rows, 2).unwrap()[7], "echo b");
    assert!(status_row(&rows, 1).is_none(), "directives never reach .STATUS");

    assert!(harness.remaining_lines().is_empty());
    assert_eq!(summary.counters.succeeded, 2);
    assert_eq!(summary.counters.launched, 2);
    assert_eq!(summary.remaining, 0);
    assert!(!summary.interrupted);
    assert_eq!(summary.final_state, DriverState::Terminated);
}

#[tokio::test]
async fn drain_orders_tasks_across_engines() {
    init_tracing();
    let mut harness = HarnessBuilder::new(
        TaskFileBuilder::new()
            .tasks(["sleep 80", "sleep 20", "sleep 50"])
            .drain()
            .tasks(["echo d", "echo e", "echo f"]),
    )
    .engines_on("node1", 3)
    .build()
    .await
    .unwrap();

    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    let timeline = &harness.timeline;
    let last_before = (0..3).map(|i| timeline.finished_at(i).unwrap()).max().unwrap();
    let first_after = (4..7).map(|i| timeline.started_at(i).unwrap()).min().unwrap();
    assert!(
        last_before < first_after,
        "a task after DRAIN started before the barrier cleared: {:?}",
        timeline.events()
    );
    assert_eq!(summary.counters.done, 6);
    assert_eq!(summary.counters.succeeded, 6);
}

#[tokio::test]
async fn failures_are_recorded_and_left_remaining() {
    init_tracing();
    let mut harness = HarnessBuilder::new(
        TaskFileBuilder::new().tasks(["echo ok", "exit 3", "signal 9", "rogue"]),
    )
    .engine("0", "node1")
    .build()
    .await
    .unwrap();

    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    assert_eq!(summary.counters.launched, 4);
    assert_eq!(summary.counters.done, 4);
    assert_eq!(summary.counters.succeeded, 1);
    assert_eq!(summary.counters.failed, 3);

    let rows = harness.status_lines();
    assert_eq!(status_row(&rows, 0).unwrap()[1], "0");
    assert_eq!(status_row(&rows, 1).unwrap()[1], "3");
    assert_eq!(status_row(&rows, 2).unwrap()[1], "signal 9");
    let rogue = status_row(&rows, 3).unwrap();
    assert_eq!(rogue[1], "terminated");
    assert_eq!(rogue[4], "1");

    assert_eq!(harness.rogue_lines(), vec!["node1\t4242".to_string()]);
    assert_eq!(
        harness.remaining_lines(),
        vec!["exit 3".to_string(), "signal 9".to_string(), "rogue".to_string()]
    );
}

#[tokio::test]
async fn ignored_errors_count_as_success() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().tasks(["exit 1", "signal 15"]))
        .engine("0", "node1")
        .ignore_errors(true)
        .build()
        .await
        .unwrap();

    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    assert_eq!(summary.counters.succeeded, 1);
    assert_eq!(summary.counters.failed, 1);
    // The raw exit status is still recorded.
    assert_eq!(status_row(&harness.status_lines(), 0).unwrap()[1], "1");
    // Signal deaths are never ignored.
    assert_eq!(harness.remaining_lines(), vec!["signal 15".to_string()]);
}

#[tokio::test]
async fn quoted_commands_are_unquoted_before_dispatch() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().task("'exit 2'"))
        .engine("0", "node1")
        .build()
        .await
        .unwrap();

    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    let rows = harness.status_lines();
    assert_eq!(rows[0][1], "2");
    assert_eq!(rows[0][7], "exit 2");
    assert_eq!(summary.counters.failed, 1);
}

#[tokio::test]
async fn surplus_engines_never_receive_work() {
    init_tracing();
    let mut harness = HarnessBuilder::new(
        TaskFileBuilder::new().tasks(["echo 0", "echo 1", "echo 2", "echo 3"]),
    )
    .engines_on("node1", 3)
    .engine("solo", "node2")
    .per_host_cap(1)
    .build()
    .await
    .unwrap();

    assert_eq!(harness.pool.len(), 2);
    let (summary, outcomes) = with_timeout(harness.run()).await.unwrap();

    let rejected: Vec<_> = outcomes.iter().filter(|o| !o.accepted).collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|o| o.tasks.is_empty()));
    assert_eq!(summary.counters.launched, 4);
    assert_eq!(summary.counters.succeeded, 4);
}

#[tokio::test]
async fn shutdown_puts_unreported_task_in_remaining() {
    init_tracing();
    let mut harness = HarnessBuilder::new(
        TaskFileBuilder::new().tasks(["echo first", "hang", "echo never"]),
    )
    .engine("0", "node1")
    .shutdown_grace(Duration::from_millis(200))
    .build()
    .await
    .unwrap();

    harness.shutdown_after(Duration::from_millis(150));
    let (summary, outcomes) = with_timeout(harness.run()).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.final_state, DriverState::Terminated);
    assert_eq!(
        harness.remaining_lines(),
        vec!["hang".to_string(), "echo never".to_string()]
    );
    assert!(harness.rogue_lines().is_empty());
    assert_eq!(summary.counters.launched, 2);
    assert_eq!(summary.counters.done, 1);
    assert_eq!(summary.counters.succeeded, 1);
    assert!(outcomes[0].got_bye);
}

#[tokio::test]
async fn second_termination_request_is_harmless() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().tasks(["hang", "echo b"]))
        .engine("0", "node1")
        .shutdown_grace(Duration::from_millis(100))
        .build()
        .await
        .unwrap();

    harness.shutdown_after(Duration::from_millis(50));
    harness.shutdown_after(Duration::from_millis(80));
    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(
        harness.remaining_lines(),
        vec!["hang".to_string(), "echo b".to_string()]
    );
}

#[tokio::test]
async fn done_equals_succeeded_plus_failed_and_counters_are_published() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().tasks([
        "echo a", "exit 1", "sleep 10", "exit 2", "echo b", "signal 2", "echo c",
    ]))
    .engines_on("node1", 3)
    .build()
    .await
    .unwrap();

    let memory = harness.memory.clone();
    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    let c = summary.counters;
    assert_eq!(c.done, c.succeeded + c.failed);
    assert_eq!(c.launched, 7);
    assert_eq!((c.succeeded, c.failed), (4, 3));

    // The published values match what the dispatcher tracked.
    let published = read_counters(memory.as_ref() as &dyn Mailbox).await.unwrap();
    assert_eq!(published, c);
}

fn exited(code: i32) -> Message {
    Message::Status(StatusRecord {
        exit: TaskExit::Code(code),
        started_at: None,
        stopped_at: None,
        rogue: false,
        pid: Some(7),
        host: "node1".to_string(),
        engine_id: "0".to_string(),
    })
}

#[tokio::test]
async fn first_stored_status_record_wins() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().task("hang"))
        .engine("0", "node1")
        .build()
        .await
        .unwrap();

    let slot = keys::task_status(0);
    harness.memory.store(&slot, exited(0)).await.unwrap();
    harness
        .memory
        .store(&slot, Message::Status(StatusRecord::rogue(Some(7), "node1", "0")))
        .await
        .unwrap();

    let (summary, _) = with_timeout(harness.run()).await.unwrap();

    assert_eq!(summary.counters.launched, 1);
    assert_eq!(summary.counters.done, 1);
    assert_eq!(summary.counters.succeeded, 1);
    assert_eq!(summary.counters.failed, 0);
    assert!(harness.rogue_lines().is_empty(), "redundant rogue record was recorded");
    assert!(harness.remaining_lines().is_empty());
    assert_eq!(harness.memory.queued(&slot), 0);
}

#[tokio::test]
async fn undecodable_status_releases_engine_and_leaves_task_remaining() {
    init_tracing();
    let mut harness = HarnessBuilder::new(TaskFileBuilder::new().tasks(["hang", "echo b"]))
        .engine("0", "node1")
        .build()
        .await
        .unwrap();

    let slot = keys::task_status(0);
    harness.memory.store(&slot, Message::Counter(5)).await.unwrap();
    harness.memory.store(&slot, exited(0)).await.unwrap();

    let (summary, outcomes) = with_timeout(harness.run()).await.unwrap();

    // The engine came back and ran the next task.
    assert_eq!(outcomes[0].tasks, vec![0, 1]);
    assert_eq!(summary.counters.launched, 2);
    assert_eq!(summary.counters.done, 1);
    assert_eq!(summary.counters.succeeded, 1);
    assert!(status_row(&harness.status_lines(), 0).is_none());
    assert_eq!(harness.remaining_lines(), vec!["hang".to_string()]);
    assert_eq!(harness.memory.queued(&slot), 0);
}
