// src/driver/launcher.rs

//! Starting the agents with the configured parallel launcher.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::errors::{Result, SqError};

/// The launcher command line, with `{workers}` substituted and the agent
/// invocation appended.
pub fn build_command_line(
    launcher: &[String],
    workers: usize,
    exe: &Path,
    connect: &str,
    log_dir: &Path,
) -> Vec<String> {
    let workers = workers.to_string();
    let mut argv: Vec<String> = launcher
        .iter()
        .map(|arg| arg.replace("{workers}", &workers))
        .collect();
    argv.extend([
        exe.display().to_string(),
        "agent".to_string(),
        "--connect".to_string(),
        connect.to_string(),
        "--log-dir".to_string(),
        log_dir.display().to_string(),
    ]);
    argv
}

/// The address agents should dial: the listen address, with an unspecified
/// IP replaced by `hostname`.
pub fn advertised_address(listen: SocketAddr, hostname: &str) -> String {
    if listen.ip().is_unspecified() {
        format!("{hostname}:{}", listen.port())
    } else {
        listen.to_string()
    }
}

/// Spawn the launcher, sending its output to `launcher.out` / `launcher.err`
/// under `log_dir`.
pub fn spawn_launcher(argv: &[String], log_dir: &Path) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SqError::ConfigError("empty launcher command".to_string()))?;

    let out = open_log(log_dir.join("launcher.out"))?;
    let err = open_log(log_dir.join("launcher.err"))?;

    info!(command = ?argv, "starting launcher");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .spawn()
        .with_context(|| format!("failed to spawn launcher '{program}'"))?;

    Ok(child)
}

fn open_log(path: PathBuf) -> Result<File> {
    File::create(&path)
        .with_context(|| format!("creating {}", path.display()))
        .map_err(SqError::from)
}

/// Log how the launcher ended; it normally outlives the run.
pub async fn watch_launcher(mut child: Child) {
    match child.wait().await {
        Ok(status) if status.success() => info!("launcher exited"),
        Ok(status) => warn!(%status, "launcher exited unsuccessfully"),
        Err(e) => warn!(error = %e, "failed to wait for launcher"),
    }
}
