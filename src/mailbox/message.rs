// src/mailbox/message.rs

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SqError};
use crate::types::{EngineId, StatusRecord, TaskIndex};

/// Eligibility verdict the driver sends back to a registering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The engine joins the pool.
    Accepted,
    /// The engine's host already has its quota of engines; exit.
    Rejected,
}

/// Message delivered to an engine's task inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    Task { index: TaskIndex, command: String },
    /// Poison message: stop fetching, do not execute anything.
    Bye,
}

/// Every value that travels through the mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Registration { host: String, engine_id: EngineId },
    Verdict(Verdict),
    Assignment(Assignment),
    Status(StatusRecord),
    Counter(u64),
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::Registration { .. } => "registration",
            Message::Verdict(_) => "verdict",
            Message::Assignment(_) => "assignment",
            Message::Status(_) => "status",
            Message::Counter(_) => "counter",
        }
    }

    pub fn into_registration(self) -> Result<(String, EngineId)> {
        match self {
            Message::Registration { host, engine_id } => Ok((host, engine_id)),
            other => Err(unexpected("registration", &other)),
        }
    }

    pub fn into_verdict(self) -> Result<Verdict> {
        match self {
            Message::Verdict(v) => Ok(v),
            other => Err(unexpected("verdict", &other)),
        }
    }

    pub fn into_assignment(self) -> Result<Assignment> {
        match self {
            Message::Assignment(a) => Ok(a),
            other => Err(unexpected("assignment", &other)),
        }
    }

    pub fn into_status(self) -> Result<StatusRecord> {
        match self {
            Message::Status(record) => Ok(record),
            other => Err(unexpected("status", &other)),
        }
    }

    pub fn into_counter(self) -> Result<u64> {
        match self {
            Message::Counter(n) => Ok(n),
            other => Err(unexpected("counter", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Message) -> SqError {
    SqError::Protocol(format!("expected {expected} message, got {}", got.kind()))
}
