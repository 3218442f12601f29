#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use simplequeue::dispatch::{
    Artifacts, ControlEvent, Counters, DispatchOptions, Dispatcher, RunSummary,
};
use simplequeue::mailbox::{Mailbox, MemoryMailbox};
use simplequeue::pool::EnginePool;
use simplequeue::stream::{sibling_path, TaskStream};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::builders::TaskFileBuilder;
use crate::fake_engine::{FakeEngine, FakeOutcome, Timeline};

/// Assembles a driver around fake engines on an in-memory mailbox.
pub struct HarnessBuilder {
    tasks: TaskFileBuilder,
    engines: Vec<(String, String)>,
    per_host_cap: usize,
    options: DispatchOptions,
}

impl HarnessBuilder {
    pub fn new(tasks: TaskFileBuilder) -> Self {
        Self {
            tasks,
            engines: Vec::new(),
            per_host_cap: usize::MAX,
            options: DispatchOptions {
                launch_delay: Duration::ZERO,
                fetch_delay: Duration::from_millis(5),
                shutdown_grace: Duration::from_millis(300),
                ignore_errors: false,
            },
        }
    }

    pub fn engine(mut self, id: &str, host: &str) -> Self {
        self.engines.push((id.to_string(), host.to_string()));
        self
    }

    /// `n` engines on `host`, named `<host>-0`, `<host>-1`, ...
    pub fn engines_on(mut self, host: &str, n: usize) -> Self {
        for i in 0..n {
            self.engines.push((format!("{host}-{i}"), host.to_string()));
        }
        self
    }

    pub fn per_host_cap(mut self, cap: usize) -> Self {
        self.per_host_cap = cap;
        self
    }

    pub fn ignore_errors(mut self, val: bool) -> Self {
        self.options.ignore_errors = val;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.options.shutdown_grace = grace;
        self
    }

    pub fn launch_delay(mut self, delay: Duration) -> Self {
        self.options.launch_delay = delay;
        self
    }

    pub async fn build(self) -> anyhow::Result<Harness> {
        let dir = tempfile::tempdir()?;
        let task_file = self.tasks.write_to(dir.path(), "tasks.txt");

        let memory = Arc::new(MemoryMailbox::new());
        let mailbox: Arc<dyn Mailbox> = memory.clone();
        let timeline = Timeline::default();

        let counters = Arc::new(Counters::init(Arc::clone(&mailbox)).await?);

        let engines = self
            .engines
            .iter()
            .map(|(id, host)| {
                let engine = FakeEngine::new(Arc::clone(&mailbox), id, host, timeline.clone());
                tokio::spawn(engine.run())
            })
            .collect();

        let pool = EnginePool::register(
            Arc::clone(&mailbox),
            self.engines.len(),
            self.per_host_cap,
            Some(Duration::from_secs(5)),
        )
        .await?;
        let pool = Arc::new(pool);

        let stream = Arc::new(TaskStream::open(&task_file).await?);
        let artifacts = Arc::new(Artifacts::create(&task_file)?);
        let (control_tx, control_rx) = mpsc::channel(8);

        let dispatcher = Dispatcher::new(
            Arc::clone(&mailbox),
            Arc::clone(&pool),
            stream,
            Arc::clone(&counters),
            artifacts,
            self.options,
            control_rx,
        );

        Ok(Harness {
            dir,
            task_file,
            memory,
            pool,
            control_tx,
            timeline,
            engines,
            dispatcher: Some(dispatcher),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub task_file: PathBuf,
    pub memory: Arc<MemoryMailbox>,
    pub pool: Arc<EnginePool>,
    pub control_tx: mpsc::Sender<ControlEvent>,
    pub timeline: Timeline,
    engines: Vec<JoinHandle<anyhow::Result<FakeOutcome>>>,
    dispatcher: Option<Dispatcher>,
}

impl Harness {
    /// Run the dispatcher to completion, close the mailbox and collect what
    /// every fake engine did.
    pub async fn run(&mut self) -> anyhow::Result<(RunSummary, Vec<FakeOutcome>)> {
        let dispatcher = self
            .dispatcher
            .take()
            .ok_or_else(|| anyhow::anyhow!("harness already ran"))?;
        let summary = dispatcher.run().await?;

        self.memory.close();
        let mut outcomes = Vec::new();
        for handle in self.engines.drain(..) {
            outcomes.push(handle.await??);
        }
        Ok((summary, outcomes))
    }

    /// Send a termination request after `delay`.
    pub fn shutdown_after(&self, delay: Duration) {
        let tx = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControlEvent::ShutdownRequested { signal: 15 }).await;
        });
    }

    pub fn artifact(&self, suffix: &str) -> PathBuf {
        sibling_path(&self.task_file, suffix)
    }

    pub fn status_lines(&self) -> Vec<Vec<String>> {
        read_lines(&self.artifact(".STATUS"))
            .into_iter()
            .map(|line| line.split('\t').map(String::from).collect())
            .collect()
    }

    pub fn remaining_lines(&self) -> Vec<String> {
        read_lines(&self.artifact(".REMAINING"))
    }

    pub fn rogue_lines(&self) -> Vec<String> {
        read_lines(&self.artifact(".ROGUES"))
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(String::from).collect(),
        Err(_) => Vec::new(),
    }
}
