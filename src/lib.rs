// src/lib.rs

pub mod agent;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod mailbox;
pub mod pool;
pub mod signals;
pub mod stream;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::agent::{resolve_engine_id, Agent, AgentOptions};
use crate::cli::{AgentArgs, CliArgs, Command, RunArgs, StatusArgs};
use crate::config::{load_or_default, ConfigFile};
use crate::dispatch::read_counters;
use crate::driver::{discover, run_driver, DriverOverrides};
use crate::mailbox::{Mailbox, TcpMailbox};
use crate::stream::{Directive, StreamItem, TaskStream};
use crate::types::Engine;

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_DELAY: Duration = Duration::from_millis(500);

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => run_command(run_args).await,
        Command::Agent(agent_args) => agent_command(agent_args).await,
        Command::Status(status_args) => status_command(status_args).await,
    }
}

/// Where the log file for this invocation goes, if anywhere.
///
/// The driver logs to `--log-file`; an agent always logs to
/// `<log_dir>/<host>_<engine>.log`.
pub fn log_file_for(args: &CliArgs) -> Result<Option<PathBuf>> {
    match &args.command {
        Command::Run(run_args) => Ok(run_args.log_file.clone()),
        Command::Agent(agent_args) => {
            let options = agent_options(agent_args)?;
            let engine = agent_engine(agent_args)?;
            Ok(Some(
                options
                    .log_dir
                    .join(format!("{}_{}.log", engine.host, engine.id)),
            ))
        }
        Command::Status(_) => Ok(None),
    }
}

fn driver_config(args: &RunArgs) -> Result<ConfigFile> {
    let mut cfg = load_or_default(args.config.as_deref())?;
    let overrides = DriverOverrides {
        ignore_errors: args.ignore_errors,
        max_tasks_per_node: args.max_tasks_per_node,
        listen: args.listen.clone(),
    };
    overrides.apply(&mut cfg.driver)?;
    Ok(cfg)
}

async fn run_command(args: RunArgs) -> Result<()> {
    let cfg = driver_config(&args)?;

    if args.dry_run {
        print_dry_run(&args, &cfg).await?;
        return Ok(());
    }

    let allocation = discover(args.workers, args.node_file.as_deref())?;
    let summary = run_driver(args.task_file.clone(), cfg.driver, allocation).await?;

    info!(
        launched = summary.counters.launched,
        done = summary.counters.done,
        succeeded = summary.counters.succeeded,
        failed = summary.counters.failed,
        remaining = summary.remaining,
        "driver exiting"
    );
    Ok(())
}

fn agent_options(args: &AgentArgs) -> Result<AgentOptions> {
    let cfg = load_or_default(args.config.as_deref())?;
    let mut options = AgentOptions::from(&cfg.agent);
    if let Some(log_dir) = &args.log_dir {
        options.log_dir = log_dir.clone();
    }
    Ok(options)
}

fn agent_engine(args: &AgentArgs) -> Result<Engine> {
    let id = resolve_engine_id(args.engine_id.as_deref())?;
    Ok(Engine::new(id, driver::local_hostname()))
}

async fn agent_command(args: AgentArgs) -> Result<()> {
    let options = agent_options(&args)?;
    let engine = agent_engine(&args)?;
    info!(engine = %engine, driver = %args.connect, "agent starting");

    let _ignored = signals::ignore(&signals::AGENT_IGNORED);

    let control = TcpMailbox::connect_with_retry(&args.connect, CONNECT_ATTEMPTS, CONNECT_DELAY).await?;
    let reports = TcpMailbox::connect_with_retry(&args.connect, CONNECT_ATTEMPTS, CONNECT_DELAY).await?;

    let agent = Agent::new(Arc::new(control), Arc::new(reports), engine, options);
    let outcome = agent.run().await?;
    debug!(?outcome, "agent exiting");
    Ok(())
}

async fn status_command(args: StatusArgs) -> Result<()> {
    let mailbox = TcpMailbox::connect(&args.connect).await?;
    let counters = read_counters(&mailbox as &dyn Mailbox).await?;

    println!("Launched:  {}", counters.launched);
    println!("Done:      {}", counters.done);
    println!("Succeeded: {}", counters.succeeded);
    println!("Failed:    {}", counters.failed);
    Ok(())
}

/// Validate config and task file, print what a run would use.
async fn print_dry_run(args: &RunArgs, cfg: &ConfigFile) -> Result<()> {
    let stream = TaskStream::open(&args.task_file).await?;
    let mut tasks = 0usize;
    let mut drains = 0usize;
    let mut unrecognized = 0usize;
    while let Some(item) = stream.next().await? {
        match item {
            StreamItem::Task(_) => tasks += 1,
            StreamItem::Directive {
                directive: Directive::Drain,
                ..
            } => drains += 1,
            StreamItem::Directive { .. } => unrecognized += 1,
        }
    }

    let driver = &cfg.driver;
    println!("simplequeue dry-run");
    println!("  task_file = {}", args.task_file.display());
    println!("  driver.ignore_errors = {}", driver.ignore_errors);
    println!("  driver.max_tasks_per_node = {}", driver.max_tasks_per_node);
    println!("  driver.launch_delay = {:?}", driver.launch_delay);
    println!("  driver.fetch_delay = {:?}", driver.fetch_delay);
    println!("  driver.listen = {}", driver.listen);
    println!("  driver.shutdown_grace = {:?}", driver.shutdown_grace);
    if let Some(timeout) = driver.registration_timeout {
        println!("  driver.registration_timeout = {timeout:?}");
    }
    println!("  driver.termination_signals = {:?}", driver.termination_signals);
    if let Some(launcher) = &driver.launcher {
        println!("  driver.launcher = {launcher:?}");
    }
    println!("  agent.shell = {}", cfg.agent.shell);
    println!("  agent.grace = {:?}", cfg.agent.grace);
    match discover(args.workers, args.node_file.as_deref()) {
        Ok(allocation) => println!("  workers = {}", allocation.workers),
        Err(e) => println!("  workers = unresolved ({e})"),
    }
    println!();
    println!("tasks: {tasks}");
    println!("drain directives: {drains}");
    if unrecognized > 0 {
        println!("unrecognized directives: {unrecognized}");
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
