// src/dispatch/collector.rs

//! Per-task result collector.
//!
//! One collector runs for every dispatched task. It sends the assignment,
//! polls the task's status slot until the engine reports, records the
//! outcome, and finally hands the engine back to the pool. Nothing that goes
//! wrong in here is allowed to escape: errors are logged and the task is
//! simply left incomplete.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::mailbox::{keys, Assignment, Mailbox, Message};
use crate::pool::EnginePool;
use crate::stream::{strip_quotes, InflightTask, TaskStream};
use crate::types::{Engine, StatusRecord, Task, TaskExit, TaskIndex};

use super::artifacts::Artifacts;
use super::counters::{Counter, Counters};

/// Shared state every collector needs.
pub struct CollectorContext {
    pub mailbox: Arc<dyn Mailbox>,
    pub pool: Arc<EnginePool>,
    pub stream: Arc<TaskStream>,
    pub counters: Arc<Counters>,
    pub artifacts: Arc<Artifacts>,
    pub fetch_delay: Duration,
    pub ignore_errors: bool,
    /// Flips to `true` once collectors should stop waiting for reports.
    pub abandon: watch::Receiver<bool>,
}

/// How a collector finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    /// Non-zero exit tolerated because of `ignore_errors`.
    IgnoredFailure,
    Failed,
    Rogue,
    /// No report arrived before the shutdown grace ran out.
    Abandoned,
    /// Fetching or decoding the report failed.
    Error,
}

impl Disposition {
    /// Whether the task counts as done (kept out of `.REMAINING`).
    pub fn completed(self) -> bool {
        matches!(self, Disposition::Succeeded | Disposition::IgnoredFailure)
    }
}

/// Decide what a status record means for the run.
pub fn classify(record: &StatusRecord, ignore_errors: bool) -> Disposition {
    if record.rogue {
        return Disposition::Rogue;
    }
    match record.exit {
        TaskExit::Code(0) => Disposition::Succeeded,
        TaskExit::Code(_) if ignore_errors => Disposition::IgnoredFailure,
        _ => Disposition::Failed,
    }
}

/// Run the full collector for one task on one engine.
pub async fn collect(ctx: Arc<CollectorContext>, engine: Engine, task: Task) -> Disposition {
    let index = task.index;
    let command = match strip_quotes(&task.command) {
        Some(unquoted) => {
            warn!(task = index, "removing quotes from: {}", task.command);
            unquoted.to_string()
        }
        None => task.command,
    };

    let disposition = match run_collection(&ctx, &engine, index, &command).await {
        Ok(disposition) => disposition,
        Err(e) => {
            warn!(
                task = index,
                engine = %engine.id,
                error = %e,
                "error while collecting task status; task left incomplete"
            );
            Disposition::Error
        }
    };

    if let Err(e) = ctx.mailbox.delete(&keys::task_status(index)).await {
        debug!(task = index, error = %e, "failed to delete status slot");
    }
    ctx.pool
        .release_engine(&engine.id, &ctx.stream, index, disposition.completed());
    disposition
}

async fn run_collection(
    ctx: &CollectorContext,
    engine: &Engine,
    index: TaskIndex,
    command: &str,
) -> Result<Disposition> {
    info!(engine = %engine.id, host = %engine.host, task = index, "launching: {command}");

    ctx.stream.set_inflight(
        index,
        InflightTask {
            engine_id: engine.id.clone(),
            host: engine.host.clone(),
            command: command.to_string(),
        },
    );

    ctx.mailbox
        .store(
            &keys::engine_task(&engine.id),
            Message::Assignment(Assignment::Task {
                index,
                command: command.to_string(),
            }),
        )
        .await?;
    ctx.counters.increment(Counter::Launched).await?;

    let key = keys::task_status(index);
    let Some(record) = await_status(ctx, index, &key).await? else {
        return Ok(Disposition::Abandoned);
    };
    discard_redundant(ctx, index, &key).await;

    let disposition = classify(&record, ctx.ignore_errors);
    info!(
        task = index,
        exit = %record.exit,
        rogue = record.rogue,
        pid = ?record.pid,
        host = %record.host,
        ?disposition,
        "task status received"
    );

    ctx.artifacts.record_status(index, &record, command)?;
    if record.rogue {
        ctx.artifacts.record_rogue(&record)?;
    }
    ctx.counters.record_outcome(disposition.completed()).await?;

    Ok(disposition)
}

/// Poll the status slot until a record shows up, or return `None` once the
/// run has given up on outstanding tasks.
async fn await_status(ctx: &CollectorContext, index: TaskIndex, key: &str) -> Result<Option<StatusRecord>> {
    let mut abandon = ctx.abandon.clone();
    let mut abandon_open = true;

    loop {
        if let Some(message) = ctx.mailbox.fetch_try(key).await? {
            return message.into_status().map(Some);
        }

        if *abandon.borrow() {
            warn!(task = index, "no status before shutdown grace expired; abandoning task");
            return Ok(None);
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.fetch_delay) => {}
            changed = abandon.changed(), if abandon_open => {
                if changed.is_err() {
                    abandon_open = false;
                }
            }
        }
    }
}

/// First record stored wins; anything queued behind it is logged and dropped.
async fn discard_redundant(ctx: &CollectorContext, index: TaskIndex, key: &str) {
    loop {
        match ctx.mailbox.fetch_try(key).await {
            Ok(Some(extra)) => {
                warn!(task = index, record = ?extra, "discarding redundant status record");
            }
            Ok(None) => break,
            Err(e) => {
                debug!(task = index, error = %e, "could not check for redundant status records");
                break;
            }
        }
    }
}
