// src/stream/mod.rs

//! Ordered task supply with an in-flight ledger.
//!
//! The stream reads the task file lazily, one classified line at a time,
//! handing out dense indices. Dispatched tasks are recorded in the
//! in-flight ledger until their collector marks them done. At the end of a
//! run [`TaskStream::dump_remaining`] writes every task that did not finish
//! (still in flight, handed back, or never read) to `<file>.REMAINING`.

pub mod parse;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info, warn};

use crate::errors::{Result, SqError};
use crate::types::{EngineId, Task, TaskIndex};

pub use parse::{classify_line, strip_quotes, Directive, LineKind, DIRECTIVE_PREFIX};

/// One item produced by [`TaskStream::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Task(Task),
    Directive { index: TaskIndex, directive: Directive },
}

impl StreamItem {
    pub fn index(&self) -> TaskIndex {
        match self {
            StreamItem::Task(task) => task.index,
            StreamItem::Directive { index, .. } => *index,
        }
    }
}

/// Ledger entry for a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightTask {
    pub engine_id: EngineId,
    pub host: String,
    pub command: String,
}

/// Path of an artifact written next to the task file (`tasks.txt.STATUS`).
pub fn sibling_path(task_file: &Path, suffix: &str) -> PathBuf {
    let mut name = task_file.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

struct Source {
    /// `None` once the file has been exhausted (and closed).
    lines: Option<Lines<BufReader<File>>>,
    next_index: TaskIndex,
    /// Tasks read but never dispatched because shutdown won the race.
    handed_back: BTreeMap<TaskIndex, String>,
    remaining_written: bool,
}

pub struct TaskStream {
    path: PathBuf,
    source: tokio::sync::Mutex<Source>,
    inflight: Mutex<BTreeMap<TaskIndex, InflightTask>>,
}

impl std::fmt::Debug for TaskStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStream")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TaskStream {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            SqError::ConfigError(format!("cannot open task file {}: {e}", path.display()))
        })?;

        Ok(Self {
            path,
            source: tokio::sync::Mutex::new(Source {
                lines: Some(BufReader::new(file).lines()),
                next_index: 0,
                handed_back: BTreeMap::new(),
                remaining_written: false,
            }),
            inflight: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining_path(&self) -> PathBuf {
        sibling_path(&self.path, ".REMAINING")
    }

    fn ledger(&self) -> MutexGuard<'_, BTreeMap<TaskIndex, InflightTask>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Produce the next task or directive, or `None` once the file is
    /// exhausted. The sequence is not restartable.
    pub async fn next(&self) -> Result<Option<StreamItem>> {
        let mut source = self.source.lock().await;

        loop {
            let Some(lines) = source.lines.as_mut() else {
                return Ok(None);
            };

            let Some(raw) = lines.next_line().await? else {
                source.lines = None;
                debug!(path = %self.path.display(), "task source exhausted");
                return Ok(None);
            };

            let Some(kind) = classify_line(&raw) else {
                continue;
            };

            let index = source.next_index;
            source.next_index += 1;

            return Ok(Some(match kind {
                LineKind::Command(command) => StreamItem::Task(Task { index, command }),
                LineKind::Directive(directive) => StreamItem::Directive { index, directive },
            }));
        }
    }

    /// Give back a task that was read but could not be dispatched.
    pub async fn hand_back(&self, task: Task) {
        debug!(task = task.index, "task handed back to stream");
        self.source
            .lock()
            .await
            .handed_back
            .insert(task.index, remaining_form(&task.command).to_string());
    }

    pub fn set_inflight(&self, index: TaskIndex, info: InflightTask) {
        self.ledger().insert(index, info);
    }

    /// Remove a task from the ledger. Returns `false` (and warns) if the
    /// index was not in flight.
    pub fn set_done(&self, index: TaskIndex) -> bool {
        match self.ledger().remove(&index) {
            Some(_) => true,
            None => {
                warn!(task = index, "set_done called for a task that is not in flight");
                false
            }
        }
    }

    pub fn inflight(&self) -> Vec<(TaskIndex, InflightTask)> {
        self.ledger()
            .iter()
            .map(|(index, info)| (*index, info.clone()))
            .collect()
    }

    /// Diagnostic dump of the in-flight ledger to the log.
    pub fn dump_inflight(&self) {
        let ledger = self.ledger();
        info!(count = ledger.len(), "in-flight tasks:");
        for (index, info) in ledger.iter() {
            info!(
                task = index,
                engine = %info.engine_id,
                host = %info.host,
                "  {}",
                info.command
            );
        }
    }

    /// Write every unfinished task to `<file>.REMAINING` and return how many
    /// lines were written.
    ///
    /// Must only run once dispatch has stopped; a second call is refused.
    pub async fn dump_remaining(&self) -> Result<usize> {
        let mut source = self.source.lock().await;
        if source.remaining_written {
            warn!("remaining tasks already written; ignoring second request");
            return Ok(0);
        }
        source.remaining_written = true;

        // In-flight and handed-back tasks interleave by index; both precede
        // anything still unread.
        let mut unfinished: BTreeMap<TaskIndex, String> = std::mem::take(&mut *self.ledger())
            .into_iter()
            .map(|(index, info)| (index, info.command))
            .collect();
        unfinished.append(&mut source.handed_back);

        let mut out: Vec<String> = unfinished.into_values().collect();

        if let Some(mut lines) = source.lines.take() {
            while let Some(raw) = lines.next_line().await? {
                match classify_line(&raw) {
                    Some(LineKind::Command(command)) => out.push(remaining_form(&command).to_string()),
                    Some(LineKind::Directive(_)) => out.push(raw.trim().to_string()),
                    None => {}
                }
            }
        }

        let dump_path = self.remaining_path();
        let mut file = File::create(&dump_path).await?;
        for line in &out {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;

        info!(path = %dump_path.display(), count = out.len(), "remaining tasks written");
        Ok(out.len())
    }
}

/// Commands are written to `.REMAINING` without their surrounding quotes,
/// the same form dispatch records in the in-flight ledger.
fn remaining_form(command: &str) -> &str {
    strip_quotes(command).unwrap_or(command)
}
