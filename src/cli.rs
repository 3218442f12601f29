// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `simplequeue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "simplequeue",
    version,
    about = "Dispatch a file of shell commands across a fixed set of engines.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SIMPLEQUEUE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the driver: dispatch every task in TASK_FILE.
    Run(RunArgs),
    /// Run one engine agent (normally started by the launcher).
    Agent(AgentArgs),
    /// Print the counters of a running driver.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// File with one shell command per line.
    #[arg(value_name = "TASK_FILE")]
    pub task_file: PathBuf,

    /// Path to the config file (TOML). Built-in defaults when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Count non-zero exit codes as completed.
    #[arg(long)]
    pub ignore_errors: bool,

    /// Accept at most this many engines per host.
    #[arg(long, value_name = "N")]
    pub max_tasks_per_node: Option<usize>,

    /// Node file listing one slot per line (defaults to `$PBS_NODEFILE`
    /// or `$LSB_DJOB_HOSTFILE`).
    #[arg(long, value_name = "PATH")]
    pub node_file: Option<PathBuf>,

    /// Expected engine count; overrides any node file.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Address for the mailbox server.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Also write logs to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Validate config and task file, print them, but dispatch nothing.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct AgentArgs {
    /// Driver mailbox address (`host:port`).
    #[arg(long, value_name = "ADDR")]
    pub connect: String,

    /// Slot id; falls back to the rank the parallel launcher exports.
    #[arg(long, value_name = "ID")]
    pub engine_id: Option<String>,

    /// Directory for the agent log and captured task output.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Path to the config file (TOML); only `[agent]` is used.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Driver mailbox address (`host:port`).
    #[arg(long, value_name = "ADDR")]
    pub connect: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
