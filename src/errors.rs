// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Wire codec error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out waiting for engine registrations ({received}/{expected} received)")]
    RegistrationTimeout { received: usize, expected: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SqError>;
