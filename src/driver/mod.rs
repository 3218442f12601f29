// src/driver/mod.rs

//! The driver process: everything that happens on `simplequeue run`.
//!
//! Order of events:
//! - resolve the allocation and open the task file (fatal errors surface here),
//! - host the mailbox over TCP and publish zeroed counters,
//! - start intercepting signals and, if configured, the launcher,
//! - wait for registrations and build the engine pool,
//! - run the dispatcher to completion, then close the mailbox so agents
//!   that are still polling their inbox exit.

pub mod allocation;
pub mod launcher;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::dispatch::{Artifacts, ControlEvent, Counters, DispatchOptions, Dispatcher, RunSummary};
use crate::errors::{Result, SqError};
use crate::mailbox::{Mailbox, MailboxServer, MemoryMailbox};
use crate::pool::EnginePool;
use crate::signals;
use crate::stream::TaskStream;

pub use allocation::{discover, Allocation, AllocationSource};

/// Command-line values that take precedence over `[driver]`.
#[derive(Debug, Clone, Default)]
pub struct DriverOverrides {
    pub ignore_errors: bool,
    pub max_tasks_per_node: Option<usize>,
    pub listen: Option<String>,
}

impl DriverOverrides {
    pub fn apply(&self, cfg: &mut DriverConfig) -> Result<()> {
        if self.ignore_errors {
            cfg.ignore_errors = true;
        }
        if let Some(cap) = self.max_tasks_per_node {
            if cap == 0 {
                return Err(SqError::ConfigError(
                    "--max-tasks-per-node must be >= 1 (got 0)".to_string(),
                ));
            }
            cfg.max_tasks_per_node = cap;
        }
        if let Some(listen) = &self.listen {
            cfg.listen = SocketAddr::from_str(listen.trim()).map_err(|e| {
                SqError::ConfigError(format!("--listen '{listen}' is not an address: {e}"))
            })?;
        }
        Ok(())
    }
}

pub fn dispatch_options(cfg: &DriverConfig) -> DispatchOptions {
    DispatchOptions {
        launch_delay: cfg.launch_delay,
        fetch_delay: cfg.fetch_delay,
        shutdown_grace: cfg.shutdown_grace,
        ignore_errors: cfg.ignore_errors,
    }
}

/// Run one complete dispatch of `task_file`.
pub async fn run_driver(
    task_file: PathBuf,
    cfg: DriverConfig,
    allocation: Allocation,
) -> Result<RunSummary> {
    let stream = Arc::new(TaskStream::open(&task_file).await?);

    let memory = Arc::new(MemoryMailbox::new());
    let server = MailboxServer::bind(cfg.listen, Arc::clone(&memory)).await?;
    let local_addr = server.local_addr()?;
    let server_handle = server.spawn();
    info!(addr = %local_addr, "mailbox listening");

    let mailbox: Arc<dyn Mailbox> = memory.clone();
    let counters = Arc::new(Counters::init(Arc::clone(&mailbox)).await?);

    let (control_tx, mut control_rx) = mpsc::channel::<ControlEvent>(16);
    let signal_handles = signals::install(&cfg.termination_signals, control_tx);

    if let Some(launcher_argv) = &cfg.launcher {
        let hostname = local_hostname();
        let advertised = launcher::advertised_address(local_addr, &hostname);
        let exe = std::env::current_exe()?;
        let argv = launcher::build_command_line(
            launcher_argv,
            allocation.workers,
            &exe,
            &advertised,
            &cfg.log_dir,
        );
        let child = launcher::spawn_launcher(&argv, &cfg.log_dir)?;
        tokio::spawn(launcher::watch_launcher(child));
    }

    let registration = EnginePool::register(
        Arc::clone(&mailbox),
        allocation.workers,
        cfg.max_tasks_per_node,
        cfg.registration_timeout,
    );
    let pool = tokio::select! {
        pool = registration => pool?,
        Some(ControlEvent::ShutdownRequested { signal }) = control_rx.recv() => {
            memory.close();
            return Err(SqError::Other(anyhow!(
                "termination signal {signal} received while waiting for registrations"
            )));
        }
    };
    if pool.is_empty() {
        memory.close();
        return Err(SqError::ConfigError(
            "no engine was accepted at registration".to_string(),
        ));
    }
    let pool = Arc::new(pool);

    let artifacts = Arc::new(Artifacts::create(&task_file)?);
    let dispatcher = Dispatcher::new(
        Arc::clone(&mailbox),
        pool,
        stream,
        counters,
        artifacts,
        dispatch_options(&cfg),
        control_rx,
    );
    let summary = dispatcher.run().await;

    memory.close();
    for handle in signal_handles {
        handle.abort();
    }
    server_handle.abort();

    let summary = summary?;
    if summary.interrupted {
        warn!(remaining = summary.remaining, "run was interrupted");
    }
    Ok(summary)
}

/// Host name as reported by the kernel, or `localhost` when unavailable.
pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "gethostname failed; using localhost");
            "localhost".to_string()
        }
    }
}
