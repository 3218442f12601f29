// src/config/validate.rs

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::config::model::{
    AgentConfig, ConfigFile, DriverConfig, RawAgentSection, RawConfigFile, RawDriverSection,
};
use crate::errors::{Result, SqError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::SqError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let driver = validate_driver(raw.driver)?;
        let agent = validate_agent(raw.agent)?;
        Ok(ConfigFile::new_unchecked(driver, agent))
    }
}

fn validate_driver(raw: RawDriverSection) -> Result<DriverConfig> {
    if raw.max_tasks_per_node == 0 {
        return Err(SqError::ConfigError(
            "[driver].max_tasks_per_node must be >= 1 (got 0)".to_string(),
        ));
    }

    let listen = SocketAddr::from_str(raw.listen.trim()).map_err(|e| {
        SqError::ConfigError(format!("[driver].listen '{}' is not an address: {e}", raw.listen))
    })?;

    if raw.termination_signals.is_empty() {
        return Err(SqError::ConfigError(
            "[driver].termination_signals must name at least one signal".to_string(),
        ));
    }
    let termination_signals = raw
        .termination_signals
        .iter()
        .map(|name| parse_signal(name))
        .collect::<Result<Vec<_>>>()?;

    if let Some(launcher) = &raw.launcher {
        if launcher.is_empty() || launcher[0].trim().is_empty() {
            return Err(SqError::ConfigError(
                "[driver].launcher must not be empty when given".to_string(),
            ));
        }
    }

    let registration_timeout = raw
        .registration_timeout
        .as_deref()
        .map(|s| duration_field("driver.registration_timeout", s))
        .transpose()?;

    Ok(DriverConfig {
        ignore_errors: raw.ignore_errors,
        max_tasks_per_node: raw.max_tasks_per_node,
        launch_delay: duration_field("driver.launch_delay", &raw.launch_delay)?,
        fetch_delay: duration_field("driver.fetch_delay", &raw.fetch_delay)?,
        listen,
        log_dir: raw.log_dir,
        shutdown_grace: duration_field("driver.shutdown_grace", &raw.shutdown_grace)?,
        registration_timeout,
        termination_signals,
        launcher: raw.launcher,
    })
}

fn validate_agent(raw: RawAgentSection) -> Result<AgentConfig> {
    if raw.shell.trim().is_empty() {
        return Err(SqError::ConfigError(
            "[agent].shell must not be empty".to_string(),
        ));
    }

    Ok(AgentConfig {
        shell: raw.shell,
        grace: duration_field("agent.grace", &raw.grace)?,
        log_dir: raw.log_dir,
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| SqError::ConfigError(format!("[{field}] invalid duration '{value}': {e}")))
}

/// Parse a simple duration string like `"200ms"`, `"3s"`, `"5m"`, `"1h"`.
///
/// Supported suffixes:
/// - `ms`: milliseconds
/// - `s` : seconds
/// - `m` : minutes
/// - `h` : hours
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

/// Parse a catchable signal name, with or without the `SIG` prefix.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };

    let signal = Signal::from_str(&full)
        .map_err(|_| SqError::ConfigError(format!("unknown signal name '{name}'")))?;

    match signal {
        Signal::SIGKILL | Signal::SIGSTOP => Err(SqError::ConfigError(format!(
            "signal {signal} cannot be intercepted"
        ))),
        other => Ok(other),
    }
}
