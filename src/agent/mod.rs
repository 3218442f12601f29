// src/agent/mod.rs

//! The worker side: one agent per allocated slot.
//!
//! An agent registers with the driver, exits straight away if it is
//! rejected, and otherwise runs whatever arrives in its inbox until it
//! receives `Bye` or the mailbox goes away. A task still running at that
//! point is torn down by [`supervisor::teardown`].
//!
//! Two mailbox connections are used: `control` for registration and the
//! inbox, `reports` for status records, so the two kinds of traffic never
//! queue behind each other.

pub mod identity;
pub mod runner;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::errors::{Result, SqError};
use crate::mailbox::{keys, Assignment, Mailbox, Message, Verdict};
use crate::types::Engine;

use self::runner::{OutputFiles, RunnerContext, RunningTask};
use self::supervisor::Teardown;

pub use identity::{resolve_engine_id, RANK_VARS};

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub shell: String,
    pub grace: Duration,
    pub log_dir: PathBuf,
}

impl From<&AgentConfig> for AgentOptions {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            shell: cfg.shell.clone(),
            grace: cfg.grace,
            log_dir: cfg.log_dir.clone(),
        }
    }
}

/// Why the inbox loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Bye,
    MailboxClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Surplus to the host cap; never ran anything.
    Rejected,
    Finished {
        tasks: u64,
        stopped_by: StopReason,
        teardown: Option<Teardown>,
    },
}

pub struct Agent {
    control: Arc<dyn Mailbox>,
    reports: Arc<dyn Mailbox>,
    engine: Engine,
    options: AgentOptions,
}

impl Agent {
    pub fn new(
        control: Arc<dyn Mailbox>,
        reports: Arc<dyn Mailbox>,
        engine: Engine,
        options: AgentOptions,
    ) -> Self {
        Self {
            control,
            reports,
            engine,
            options,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn run(self) -> Result<AgentOutcome> {
        if self.register().await? == Verdict::Rejected {
            info!(engine = %self.engine, "not eligible; exiting");
            return Ok(AgentOutcome::Rejected);
        }
        info!(engine = %self.engine, "registered; waiting for tasks");

        let ctx = RunnerContext {
            reports: Arc::clone(&self.reports),
            engine: self.engine.clone(),
            shell: self.options.shell.clone(),
            outputs: OutputFiles::new(&self.options.log_dir, &self.engine),
        };

        let (tx, mut rx) = mpsc::channel::<Assignment>(4);
        let inbox = tokio::spawn(fetch_inbox(
            Arc::clone(&self.control),
            keys::engine_task(&self.engine.id),
            tx,
        ));

        let mut current: Option<RunningTask> = None;
        let mut tasks = 0u64;
        let mut stopped_by = StopReason::MailboxClosed;

        while let Some(assignment) = rx.recv().await {
            match assignment {
                Assignment::Bye => {
                    info!("received bye");
                    stopped_by = StopReason::Bye;
                    break;
                }
                Assignment::Task { index, command } => {
                    if let Some(previous) = current.take() {
                        if !previous.is_finished() {
                            warn!(
                                task = index,
                                previous = previous.index,
                                "assignment arrived while a task is still running; waiting for it"
                            );
                        }
                        if let Err(e) = previous.handle.await {
                            warn!(task = previous.index, error = %e, "task runner panicked");
                        }
                    }
                    tasks += 1;
                    current = runner::launch(&ctx, index, &command).await;
                }
            }
        }
        inbox.abort();

        let teardown = match current {
            Some(running) => Some(
                supervisor::teardown(
                    running,
                    self.options.grace,
                    self.reports.as_ref(),
                    &self.engine,
                )
                .await,
            ),
            None => None,
        };

        info!(tasks, ?stopped_by, ?teardown, "agent finished");
        Ok(AgentOutcome::Finished {
            tasks,
            stopped_by,
            teardown,
        })
    }

    async fn register(&self) -> Result<Verdict> {
        self.control
            .store(
                keys::ENGINE_INFO,
                Message::Registration {
                    host: self.engine.host.clone(),
                    engine_id: self.engine.id.clone(),
                },
            )
            .await?;

        self.control
            .fetch(&keys::engine_status(&self.engine.id))
            .await?
            .into_verdict()
    }
}

/// Forward inbox messages until `Bye` or a fetch failure.
async fn fetch_inbox(control: Arc<dyn Mailbox>, key: String, tx: mpsc::Sender<Assignment>) {
    loop {
        let assignment = match control.fetch(&key).await {
            Ok(message) => match message.into_assignment() {
                Ok(assignment) => assignment,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed assignment");
                    continue;
                }
            },
            Err(SqError::MailboxClosed) => {
                info!("mailbox closed; no more tasks");
                return;
            }
            Err(e) => {
                warn!(error = %e, "inbox fetch failed; no more tasks");
                return;
            }
        };

        let bye = assignment == Assignment::Bye;
        if tx.send(assignment).await.is_err() {
            debug!("agent loop gone; inbox reader stopping");
            return;
        }
        if bye {
            return;
        }
    }
}
