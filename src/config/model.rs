// src/config/model.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [driver]
/// ignore_errors = false
/// max_tasks_per_node = 4
/// launch_delay = "200ms"
/// launcher = ["mpirun", "-n", "{workers}"]
///
/// [agent]
/// shell = "/bin/bash"
/// grace = "3s"
/// ```
///
/// Both sections are optional and every key has a default. Durations,
/// signals and addresses stay as strings here; `validate.rs` turns them into
/// typed values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub driver: RawDriverSection,

    #[serde(default)]
    pub agent: RawAgentSection,
}

/// `[driver]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDriverSection {
    /// Treat non-zero exit codes as completed.
    #[serde(default)]
    pub ignore_errors: bool,

    /// Cap on engines accepted per host.
    #[serde(default = "default_max_tasks_per_node")]
    pub max_tasks_per_node: usize,

    #[serde(default = "default_poll_delay")]
    pub launch_delay: String,

    #[serde(default = "default_poll_delay")]
    pub fetch_delay: String,

    /// Address the mailbox server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Where the launcher's output files go.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// How long collectors keep waiting for reports after shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,

    /// Absent means wait for registrations forever.
    #[serde(default)]
    pub registration_timeout: Option<String>,

    #[serde(default = "default_termination_signals")]
    pub termination_signals: Vec<String>,

    /// Command that starts the agents, e.g. `["mpirun", "-n", "{workers}"]`.
    #[serde(default)]
    pub launcher: Option<Vec<String>>,
}

fn default_max_tasks_per_node() -> usize {
    1_000_000
}

fn default_poll_delay() -> String {
    "200ms".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_shutdown_grace() -> String {
    "10s".to_string()
}

fn default_termination_signals() -> Vec<String> {
    ["SIGHUP", "SIGINT", "SIGQUIT", "SIGTERM"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for RawDriverSection {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            max_tasks_per_node: default_max_tasks_per_node(),
            launch_delay: default_poll_delay(),
            fetch_delay: default_poll_delay(),
            listen: default_listen(),
            log_dir: default_log_dir(),
            shutdown_grace: default_shutdown_grace(),
            registration_timeout: None,
            termination_signals: default_termination_signals(),
            launcher: None,
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAgentSection {
    /// Shell used as `<shell> -c <command>`.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Time between the soft and the forced kill at teardown.
    #[serde(default = "default_grace")]
    pub grace: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_grace() -> String {
    "3s".to_string()
}

impl Default for RawAgentSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            grace: default_grace(),
            log_dir: default_log_dir(),
        }
    }
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`) or
/// [`ConfigFile::default`], which is the validated form of an empty file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub driver: DriverConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub ignore_errors: bool,
    pub max_tasks_per_node: usize,
    pub launch_delay: Duration,
    pub fetch_delay: Duration,
    pub listen: SocketAddr,
    pub log_dir: PathBuf,
    pub shutdown_grace: Duration,
    pub registration_timeout: Option<Duration>,
    pub termination_signals: Vec<Signal>,
    pub launcher: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub shell: String,
    pub grace: Duration,
    pub log_dir: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(driver: DriverConfig, agent: AgentConfig) -> Self {
        Self { driver, agent }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            max_tasks_per_node: default_max_tasks_per_node(),
            launch_delay: Duration::from_millis(200),
            fetch_delay: Duration::from_millis(200),
            listen: SocketAddr::from(([0, 0, 0, 0], 8765)),
            log_dir: default_log_dir(),
            shutdown_grace: Duration::from_secs(10),
            registration_timeout: None,
            termination_signals: vec![
                Signal::SIGHUP,
                Signal::SIGINT,
                Signal::SIGQUIT,
                Signal::SIGTERM,
            ],
            launcher: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            grace: Duration::from_secs(3),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(DriverConfig::default(), AgentConfig::default())
    }
}
