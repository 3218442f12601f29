// src/agent/runner.rs

//! Launching one task as a child process and reporting its outcome.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::mailbox::{keys, Mailbox, Message};
use crate::types::{Engine, StatusRecord, TaskExit, TaskIndex};

/// The shared per-engine output files.
///
/// All tasks run by one engine append to the same `_uc.out` / `_uc.err`
/// files; `_split` records where each task's output starts.
#[derive(Debug, Clone)]
pub struct OutputFiles {
    pub out_path: PathBuf,
    pub err_path: PathBuf,
    pub split_path: PathBuf,
}

impl OutputFiles {
    pub fn new(log_dir: &Path, engine: &Engine) -> Self {
        let stem = format!("{}_{}", engine.host, engine.id);
        Self {
            out_path: log_dir.join(format!("{stem}_uc.out")),
            err_path: log_dir.join(format!("{stem}_uc.err")),
            split_path: log_dir.join(format!("{stem}_split")),
        }
    }

    /// Open both output files for appending and note the current offsets in
    /// the split file as `<index> <err offset> <out offset>: <command>`.
    pub fn prepare(&self, index: TaskIndex, command: &str) -> anyhow::Result<(File, File)> {
        let out = append_to(&self.out_path)?;
        let err = append_to(&self.err_path)?;
        let out_offset = out.metadata()?.len();
        let err_offset = err.metadata()?.len();

        let mut split = append_to(&self.split_path)?;
        writeln!(split, "{index} {err_offset} {out_offset}: {command}")
            .with_context(|| format!("writing {}", self.split_path.display()))?;

        Ok((out, err))
    }
}

fn append_to(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))
}

/// Everything a runner needs besides the task itself.
#[derive(Clone)]
pub struct RunnerContext {
    pub reports: Arc<dyn Mailbox>,
    pub engine: Engine,
    pub shell: String,
    pub outputs: OutputFiles,
}

/// A launched task whose report may still be outstanding.
pub struct RunningTask {
    pub index: TaskIndex,
    pub pid: Option<u32>,
    /// Whoever flips this first owns the task's single status report.
    pub reported: Arc<Mutex<bool>>,
    pub handle: JoinHandle<()>,
}

impl RunningTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Post a status record for `index` on the reports connection.
pub async fn post_status(reports: &dyn Mailbox, index: TaskIndex, record: StatusRecord) -> Result<()> {
    reports
        .store(&keys::task_status(index), Message::Status(record))
        .await
}

/// Start `command` under the shell in its own process group.
///
/// Returns `None` when the process could not be started; a `launch-failed`
/// record has already been posted in that case.
pub async fn launch(ctx: &RunnerContext, index: TaskIndex, command: &str) -> Option<RunningTask> {
    let started_at = Utc::now();

    let spawned = ctx
        .outputs
        .prepare(index, command)
        .and_then(|(out, err)| {
            Command::new(&ctx.shell)
                .arg("-c")
                .arg(command)
                .process_group(0)
                .stdin(Stdio::null())
                .stdout(Stdio::from(out))
                .stderr(Stdio::from(err))
                .spawn()
                .with_context(|| format!("failed to spawn '{}'", ctx.shell))
        });

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            warn!(task = index, error = %e, "could not launch task");
            let record = StatusRecord {
                exit: TaskExit::LaunchFailed,
                started_at: Some(started_at),
                stopped_at: Some(Utc::now()),
                rogue: false,
                pid: None,
                host: ctx.engine.host.clone(),
                engine_id: ctx.engine.id.clone(),
            };
            if let Err(e) = post_status(ctx.reports.as_ref(), index, record).await {
                warn!(task = index, error = %e, "failed to post launch failure");
            }
            return None;
        }
    };

    let pid = child.id();
    info!(task = index, pid = ?pid, "task started: {command}");

    let reported = Arc::new(Mutex::new(false));
    let claim = Arc::clone(&reported);
    let reports = Arc::clone(&ctx.reports);
    let engine = ctx.engine.clone();

    let handle = tokio::spawn(async move {
        let exit = match child.wait().await {
            Ok(status) => TaskExit::from_status(status),
            Err(e) => {
                warn!(task = index, error = %e, "failed to wait for task");
                TaskExit::Terminated
            }
        };
        let stopped_at = Utc::now();

        let mut claimed = claim.lock().await;
        if *claimed {
            debug!(task = index, "report already posted by teardown");
            return;
        }
        *claimed = true;

        info!(task = index, %exit, "task finished");
        let record = StatusRecord {
            exit,
            started_at: Some(started_at),
            stopped_at: Some(stopped_at),
            rogue: false,
            pid,
            host: engine.host.clone(),
            engine_id: engine.id.clone(),
        };
        if let Err(e) = post_status(reports.as_ref(), index, record).await {
            warn!(task = index, error = %e, "failed to post task status");
        }
    });

    Some(RunningTask {
        index,
        pid,
        reported,
        handle,
    })
}
