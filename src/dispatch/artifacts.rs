// src/dispatch/artifacts.rs

//! `.STATUS` and `.ROGUES` files written next to the task file.
//!
//! Both are truncated at the start of a run and appended to with one
//! unbuffered write per line.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::stream::sibling_path;
use crate::types::{epoch_seconds, StatusRecord, TaskIndex};

#[derive(Debug)]
pub struct Artifacts {
    status_path: PathBuf,
    rogues_path: PathBuf,
    status: Mutex<Option<File>>,
    rogues: Mutex<Option<File>>,
}

fn lock(file: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

fn append(file: &Mutex<Option<File>>, path: &Path, line: &str) -> Result<()> {
    match lock(file).as_mut() {
        Some(f) => f.write_all(line.as_bytes())?,
        None => warn!(path = %path.display(), "artifact already closed; dropping line"),
    }
    Ok(())
}

impl Artifacts {
    pub fn create(task_file: &Path) -> Result<Self> {
        let status_path = sibling_path(task_file, ".STATUS");
        let rogues_path = sibling_path(task_file, ".ROGUES");
        let status = File::create(&status_path)?;
        let rogues = File::create(&rogues_path)?;

        Ok(Self {
            status_path,
            rogues_path,
            status: Mutex::new(Some(status)),
            rogues: Mutex::new(Some(rogues)),
        })
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn rogues_path(&self) -> &Path {
        &self.rogues_path
    }

    /// Tab-separated: index, exit, start, stop, rogue, pid, host, command.
    pub fn record_status(&self, index: TaskIndex, record: &StatusRecord, command: &str) -> Result<()> {
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            index,
            record.exit,
            epoch_seconds(record.started_at),
            epoch_seconds(record.stopped_at),
            u8::from(record.rogue),
            record.pid.map_or(-1, i64::from),
            record.host,
            command
        );
        append(&self.status, &self.status_path, &line)
    }

    /// Tab-separated: host, pid.
    pub fn record_rogue(&self, record: &StatusRecord) -> Result<()> {
        let line = format!("{}\t{}\n", record.host, record.pid.map_or(-1, i64::from));
        append(&self.rogues, &self.rogues_path, &line)
    }

    pub fn close(&self) {
        lock(&self.status).take();
        lock(&self.rogues).take();
        debug!("status and rogue logs closed");
    }
}
