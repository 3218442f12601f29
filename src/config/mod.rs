// src/config/mod.rs

//! Configuration loading and validation for simplequeue.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate and type the raw values (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    AgentConfig, ConfigFile, DriverConfig, RawAgentSection, RawConfigFile, RawDriverSection,
};
pub use validate::{parse_duration, parse_signal};
