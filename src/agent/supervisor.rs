// src/agent/supervisor.rs

//! Teardown escalation for a task still running when the agent stops.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::mailbox::Mailbox;
use crate::types::{Engine, StatusRecord};

use super::runner::{post_status, RunningTask};

/// How a teardown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The task had already finished.
    AlreadyDone,
    /// The soft signal was enough; the runner posted the report.
    Stopped,
    /// The process group was force-killed and a rogue record posted.
    Rogue,
}

/// Soft-signal the task's process group, give it `grace` to report, then
/// force-kill it and post a rogue record in its place.
pub async fn teardown(
    mut running: RunningTask,
    grace: Duration,
    reports: &dyn Mailbox,
    engine: &Engine,
) -> Teardown {
    let reported = *running.reported.lock().await;
    if reported || running.is_finished() {
        join_runner(&mut running).await;
        return Teardown::AlreadyDone;
    }

    let Some(pid) = running.pid else {
        join_runner(&mut running).await;
        return Teardown::AlreadyDone;
    };
    let group = Pid::from_raw(pid as i32);

    info!(task = running.index, pid, "task still running at shutdown; sending SIGTERM");
    signal_group(group, Signal::SIGTERM);

    if tokio::time::timeout(grace, &mut running.handle).await.is_ok() {
        return Teardown::Stopped;
    }

    let mut claimed = running.reported.lock().await;
    if *claimed {
        drop(claimed);
        join_runner(&mut running).await;
        return Teardown::Stopped;
    }
    *claimed = true;

    warn!(task = running.index, pid, "task ignored SIGTERM; killing process group");
    signal_group(group, Signal::SIGKILL);

    let record = StatusRecord::rogue(Some(pid), engine.host.clone(), engine.id.clone());
    if let Err(e) = post_status(reports, running.index, record).await {
        warn!(task = running.index, error = %e, "failed to post rogue record");
    }
    drop(claimed);

    if tokio::time::timeout(grace, &mut running.handle).await.is_err() {
        debug!(task = running.index, "runner did not finish after SIGKILL");
        running.handle.abort();
    }
    Teardown::Rogue
}

async fn join_runner(running: &mut RunningTask) {
    if let Err(e) = (&mut running.handle).await {
        warn!(task = running.index, error = %e, "task runner panicked");
    }
}

fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = group.as_raw(), %signal, error = %e, "killpg failed"),
    }
}
