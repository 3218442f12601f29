// src/driver/allocation.rs

//! How many engines the driver should wait for.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::{Result, SqError};

/// Environment variables that batch systems use to publish a node file.
pub const NODE_FILE_VARS: [&str; 2] = ["PBS_NODEFILE", "LSB_DJOB_HOSTFILE"];

/// Where the expected engine count came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationSource {
    Explicit,
    NodeFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub workers: usize,
    pub source: AllocationSource,
}

/// Resolve the expected engine count.
///
/// `workers` wins; otherwise the node file given on the command line, then
/// the first batch-system variable that is set.
pub fn discover(workers: Option<usize>, node_file: Option<&Path>) -> Result<Allocation> {
    discover_with_env(workers, node_file, |name| std::env::var_os(name).map(PathBuf::from))
}

/// [`discover`] with the environment lookup injected.
pub fn discover_with_env(
    workers: Option<usize>,
    node_file: Option<&Path>,
    env: impl Fn(&str) -> Option<PathBuf>,
) -> Result<Allocation> {
    let allocation = match (workers, node_file) {
        (Some(workers), _) => Allocation {
            workers,
            source: AllocationSource::Explicit,
        },
        (None, Some(path)) => from_node_file(path)?,
        (None, None) => {
            let path = NODE_FILE_VARS.iter().find_map(|var| env(var)).ok_or_else(|| {
                SqError::ConfigError(format!(
                    "cannot determine the engine count: pass --workers or --node-file, or set one of {}",
                    NODE_FILE_VARS.join(", ")
                ))
            })?;
            from_node_file(&path)?
        }
    };

    if allocation.workers == 0 {
        return Err(SqError::ConfigError(
            "the allocation has no engines (count is 0)".to_string(),
        ));
    }

    info!(workers = allocation.workers, source = ?allocation.source, "allocation resolved");
    Ok(allocation)
}

fn from_node_file(path: &Path) -> Result<Allocation> {
    let contents = fs::read_to_string(path).map_err(|e| {
        SqError::ConfigError(format!("cannot read node file {}: {e}", path.display()))
    })?;

    Ok(Allocation {
        workers: count_slots(&contents),
        source: AllocationSource::NodeFile(path.to_path_buf()),
    })
}

/// One slot per non-blank line that is not a `#` comment.
pub fn count_slots(contents: &str) -> usize {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count()
}
