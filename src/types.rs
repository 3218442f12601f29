use std::fmt;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a line in the task file (dense, starting at 0).
pub type TaskIndex = u64;

/// Slot identifier assigned by the cluster scheduler (e.g. `SLURM_PROCID`).
pub type EngineId = String;

/// One registered worker slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Engine {
    pub id: EngineId,
    pub host: String,
}

impl Engine {
    pub fn new(id: impl Into<EngineId>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.host)
    }
}

/// A shell command read from the task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub index: TaskIndex,
    pub command: String,
}

/// How a task's process ended, as reported by its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExit {
    /// The process exited on its own with this code.
    Code(i32),
    /// The process was killed by this signal.
    Signal(i32),
    /// The engine had to force-kill the process; no exit was observed.
    Terminated,
    /// The command could not be started at all.
    LaunchFailed,
}

impl TaskExit {
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => TaskExit::Code(code),
            (None, Some(sig)) => TaskExit::Signal(sig),
            (None, None) => TaskExit::Terminated,
        }
    }
}

impl fmt::Display for TaskExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskExit::Code(code) => write!(f, "{code}"),
            TaskExit::Signal(sig) => write!(f, "signal {sig}"),
            TaskExit::Terminated => write!(f, "terminated"),
            TaskExit::LaunchFailed => write!(f, "launch-failed"),
        }
    }
}

/// Outcome record an engine posts once per dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub exit: TaskExit,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Set when the engine force-killed the process during teardown.
    pub rogue: bool,
    pub pid: Option<u32>,
    pub host: String,
    pub engine_id: EngineId,
}

impl StatusRecord {
    /// Record synthesized by an engine that had to kill its child.
    pub fn rogue(pid: Option<u32>, host: impl Into<String>, engine_id: impl Into<EngineId>) -> Self {
        Self {
            exit: TaskExit::Terminated,
            started_at: None,
            stopped_at: None,
            rogue: true,
            pid,
            host: host.into(),
            engine_id: engine_id.into(),
        }
    }
}

/// Render an optional timestamp the way the `.STATUS` artifact expects:
/// fractional epoch seconds, or `-1` when unknown.
pub fn epoch_seconds(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format!("{:.6}", ts.timestamp_micros() as f64 / 1_000_000.0),
        None => "-1".to_string(),
    }
}
