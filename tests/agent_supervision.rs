// tests/agent_supervision.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use simplequeue::agent::supervisor::Teardown;
use simplequeue::agent::{Agent, AgentOptions, AgentOutcome, StopReason};
use simplequeue::mailbox::{keys, Assignment, Mailbox, MemoryMailbox, Message, Verdict};
use simplequeue::types::{Engine, StatusRecord, TaskExit};
use tokio::task::JoinHandle;

const ID: &str = "0";
const HOST: &str = "testhost";

fn options(log_dir: &Path, grace: Duration) -> AgentOptions {
    AgentOptions {
        shell: "/bin/sh".to_string(),
        grace,
        log_dir: log_dir.to_path_buf(),
    }
}

/// Start an agent on `memory` with its verdict already waiting.
async fn start_agent(
    memory: &Arc<MemoryMailbox>,
    verdict: Verdict,
    options: AgentOptions,
) -> JoinHandle<simplequeue::errors::Result<AgentOutcome>> {
    memory
        .store(&keys::engine_status(ID), Message::Verdict(verdict))
        .await
        .unwrap();

    let mailbox: Arc<dyn Mailbox> = memory.clone();
    let agent = Agent::new(
        Arc::clone(&mailbox),
        mailbox,
        Engine::new(ID, HOST),
        options,
    );
    tokio::spawn(agent.run())
}

async fn assign(memory: &MemoryMailbox, index: u64, command: &str) {
    memory
        .store(
            &keys::engine_task(ID),
            Message::Assignment(Assignment::Task {
                index,
                command: command.to_string(),
            }),
        )
        .await
        .unwrap();
}

async fn bye(memory: &MemoryMailbox) {
    memory
        .store(&keys::engine_task(ID), Message::Assignment(Assignment::Bye))
        .await
        .unwrap();
}

async fn status_of(memory: &MemoryMailbox, index: u64) -> StatusRecord {
    with_timeout(memory.fetch(&keys::task_status(index)))
        .await
        .unwrap()
        .into_status()
        .unwrap()
}

#[tokio::test]
async fn agent_registers_and_reports_exit_codes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let agent = start_agent(&memory, Verdict::Accepted, options(dir.path(), Duration::from_secs(1))).await;

    let registration = with_timeout(memory.fetch(keys::ENGINE_INFO)).await.unwrap();
    assert_eq!(
        registration.into_registration().unwrap(),
        (HOST.to_string(), ID.to_string())
    );

    assign(&memory, 0, "exit 3").await;
    let record = status_of(&memory, 0).await;
    assert_eq!(record.exit, TaskExit::Code(3));
    assert!(!record.rogue);
    assert!(record.pid.is_some());
    assert!(record.started_at.is_some() && record.stopped_at.is_some());
    assert_eq!(record.engine_id, ID);

    assign(&memory, 1, "true").await;
    assert_eq!(status_of(&memory, 1).await.exit, TaskExit::Code(0));

    bye(&memory).await;
    let outcome = with_timeout(agent).await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Finished {
            tasks: 2,
            stopped_by: StopReason::Bye,
            teardown: Some(Teardown::AlreadyDone),
        }
    );
}

#[tokio::test]
async fn rejected_agent_exits_without_fetching() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    assign(&memory, 0, "echo should-not-run").await;

    let agent = start_agent(&memory, Verdict::Rejected, options(dir.path(), Duration::from_secs(1))).await;
    let outcome = with_timeout(agent).await.unwrap().unwrap();

    assert_eq!(outcome, AgentOutcome::Rejected);
    assert_eq!(memory.queued(&keys::engine_task(ID)), 1);
}

#[tokio::test]
async fn task_output_is_captured_with_split_offsets() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let agent = start_agent(&memory, Verdict::Accepted, options(dir.path(), Duration::from_secs(1))).await;

    assign(&memory, 0, "echo first; echo err1 >&2").await;
    status_of(&memory, 0).await;
    assign(&memory, 1, "echo second").await;
    status_of(&memory, 1).await;
    bye(&memory).await;
    with_timeout(agent).await.unwrap().unwrap();

    let stem = format!("{HOST}_{ID}");
    let out = std::fs::read_to_string(dir.path().join(format!("{stem}_uc.out"))).unwrap();
    let err = std::fs::read_to_string(dir.path().join(format!("{stem}_uc.err"))).unwrap();
    let split = std::fs::read_to_string(dir.path().join(format!("{stem}_split"))).unwrap();

    assert_eq!(out, "first\nsecond\n");
    assert_eq!(err, "err1\n");
    assert_eq!(
        split,
        "0 0 0: echo first; echo err1 >&2\n1 5 6: echo second\n"
    );
}

#[tokio::test]
async fn bye_during_task_soft_kills_the_process_group() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let agent = start_agent(&memory, Verdict::Accepted, options(dir.path(), Duration::from_secs(3))).await;

    assign(&memory, 0, "sleep 30").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    bye(&memory).await;

    let outcome = with_timeout(agent).await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Finished {
            tasks: 1,
            stopped_by: StopReason::Bye,
            teardown: Some(Teardown::Stopped),
        }
    );

    let record = status_of(&memory, 0).await;
    assert_eq!(record.exit, TaskExit::Signal(15));
    assert!(!record.rogue);
    assert_eq!(memory.queued(&keys::task_status(0)), 0);
}

#[tokio::test]
async fn task_ignoring_sigterm_is_killed_and_reported_rogue_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let agent = start_agent(&memory, Verdict::Accepted, options(dir.path(), Duration::from_millis(300))).await;

    assign(&memory, 0, "trap '' TERM; sleep 30").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    bye(&memory).await;

    let outcome = with_timeout(agent).await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Finished {
            tasks: 1,
            stopped_by: StopReason::Bye,
            teardown: Some(Teardown::Rogue),
        }
    );

    assert_eq!(memory.queued(&keys::task_status(0)), 1, "exactly one report");
    let record = status_of(&memory, 0).await;
    assert!(record.rogue);
    assert_eq!(record.exit, TaskExit::Terminated);
    assert!(record.pid.is_some());
    assert_eq!(record.host, HOST);
}

#[tokio::test]
async fn unstartable_shell_reports_launch_failure() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let mut opts = options(dir.path(), Duration::from_secs(1));
    opts.shell = dir.path().join("no-such-shell").display().to_string();
    let agent = start_agent(&memory, Verdict::Accepted, opts).await;

    assign(&memory, 0, "echo hi").await;
    let record = status_of(&memory, 0).await;
    assert_eq!(record.exit, TaskExit::LaunchFailed);
    assert_eq!(record.pid, None);

    bye(&memory).await;
    let outcome = with_timeout(agent).await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Finished {
            tasks: 1,
            stopped_by: StopReason::Bye,
            teardown: None,
        }
    );
}

#[tokio::test]
async fn closed_mailbox_ends_the_agent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryMailbox::new());
    let agent = start_agent(&memory, Verdict::Accepted, options(dir.path(), Duration::from_secs(1))).await;

    with_timeout(memory.fetch(keys::ENGINE_INFO)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    memory.close();

    let outcome = with_timeout(agent).await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Finished {
            tasks: 0,
            stopped_by: StopReason::MailboxClosed,
            teardown: None,
        }
    );
}
