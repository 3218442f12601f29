// src/dispatch/dispatcher.rs

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::mailbox::Mailbox;
use crate::pool::{Acquired, EnginePool};
use crate::stream::{Directive, StreamItem, TaskStream};
use crate::types::TaskIndex;

use super::collector::{collect, CollectorContext, Disposition};
use super::{Artifacts, ControlEvent, Counters, DispatchOptions, DriverState, RunSummary};

/// The single dispatch loop of a run.
///
/// Engine acquisition and `DRAIN` barriers both happen on this task, never
/// inside a collector, so "assign the next task" and "wait for the barrier"
/// are strictly ordered.
pub struct Dispatcher {
    ctx: Arc<CollectorContext>,
    control_rx: mpsc::Receiver<ControlEvent>,
    abandon_tx: Arc<watch::Sender<bool>>,
    options: DispatchOptions,
    state: DriverState,
    collectors: JoinSet<Disposition>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        pool: Arc<EnginePool>,
        stream: Arc<TaskStream>,
        counters: Arc<Counters>,
        artifacts: Arc<Artifacts>,
        options: DispatchOptions,
        control_rx: mpsc::Receiver<ControlEvent>,
    ) -> Self {
        let (abandon_tx, abandon_rx) = watch::channel(false);
        let ctx = CollectorContext {
            mailbox,
            pool,
            stream,
            counters,
            artifacts,
            fetch_delay: options.fetch_delay,
            ignore_errors: options.ignore_errors,
            abandon: abandon_rx,
        };

        Self {
            ctx: Arc::new(ctx),
            control_rx,
            abandon_tx: Arc::new(abandon_tx),
            options,
            state: DriverState::Running,
            collectors: JoinSet::new(),
        }
    }

    /// Dispatch the whole stream, then wind the run down.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(engines = self.ctx.pool.len(), "dispatch started");

        let mut stopped_at: Option<TaskIndex> = None;

        loop {
            let item = match self.ctx.stream.next().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to read task stream; no further tasks will be launched");
                    break;
                }
            };

            match item {
                StreamItem::Directive {
                    index,
                    directive: Directive::Drain,
                } => {
                    info!(index, "initiating drain");
                    self.drain().await;
                    info!(index, "drain done");
                }
                StreamItem::Directive {
                    index,
                    directive: Directive::Unrecognized(line),
                } => {
                    warn!(index, "ignoring unrecognized directive: {line}");
                }
                StreamItem::Task(task) => match self.acquire(task.index).await {
                    Acquired::Shutdown => {
                        stopped_at = Some(task.index);
                        self.ctx.stream.hand_back(task).await;
                        break;
                    }
                    Acquired::Engine(engine) => {
                        self.collectors
                            .spawn(collect(Arc::clone(&self.ctx), engine, task));
                        self.reap_finished();
                        if !self.options.launch_delay.is_zero() {
                            tokio::time::sleep(self.options.launch_delay).await;
                        }
                    }
                },
            }
        }

        match stopped_at {
            None => info!("all tasks launched"),
            Some(index) => info!(index, "shutting down; skipping tasks from this index on"),
        }

        info!("draining pool");
        self.drain().await;
        self.join_collectors().await;

        let interrupted = self.state != DriverState::Running;
        self.state = DriverState::Terminated;

        self.ctx.artifacts.close();
        let remaining = self.ctx.stream.dump_remaining().await?;
        let counters = self.ctx.counters.snapshot().await;

        info!(
            launched = counters.launched,
            done = counters.done,
            succeeded = counters.succeeded,
            failed = counters.failed,
            remaining,
            interrupted,
            "run completed"
        );

        Ok(RunSummary {
            counters,
            remaining,
            interrupted,
            final_state: self.state,
        })
    }

    /// Acquire an engine for `index`, servicing control events while waiting.
    async fn acquire(&mut self, index: TaskIndex) -> Acquired {
        let pool = Arc::clone(&self.ctx.pool);
        let acquire = pool.get_engine(index);
        tokio::pin!(acquire);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.control_rx.recv() => self.handle_control(event).await,
                acquired = &mut acquire => return acquired,
            }
        }
    }

    /// Wait for the pool to drain, servicing control events while waiting.
    async fn drain(&mut self) {
        let pool = Arc::clone(&self.ctx.pool);
        let drained = pool.drain();
        tokio::pin!(drained);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.control_rx.recv() => self.handle_control(event).await,
                () = &mut drained => return,
            }
        }
    }

    async fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ShutdownRequested { signal } => match self.state {
                DriverState::Running => {
                    info!(signal, "received termination signal; shutting down");
                    self.ctx.stream.dump_inflight();
                    self.ctx.pool.shutdown().await;
                    self.state = DriverState::ShuttingDown;
                    self.arm_abandon_timer();
                }
                DriverState::ShuttingDown | DriverState::Terminated => {
                    info!(signal, "received termination signal, but already shutting down");
                }
            },
        }
    }

    /// After the grace period, tell collectors still polling to give up.
    fn arm_abandon_timer(&self) {
        let abandon_tx = Arc::clone(&self.abandon_tx);
        let grace = self.options.shutdown_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            debug!(?grace, "shutdown grace expired");
            let _ = abandon_tx.send(true);
        });
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.collectors.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "result collector panicked");
            }
        }
    }

    async fn join_collectors(&mut self) {
        while let Some(joined) = self.collectors.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "result collector panicked");
            }
        }
    }
}
