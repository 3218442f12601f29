// src/pool/registration.rs

//! Startup handshake: collect engine registrations and hand out verdicts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::{Result, SqError};
use crate::mailbox::{keys, Mailbox, Message, Verdict};
use crate::types::Engine;

use super::EnginePool;

impl EnginePool {
    /// Wait for `expected` registrations on the mailbox and build the pool.
    ///
    /// An engine is accepted while its host has fewer than `per_host_cap`
    /// accepted engines; every later engine on that host is rejected and
    /// told to exit. With `timeout`, giving up is a fatal error.
    pub async fn register(
        mailbox: Arc<dyn Mailbox>,
        expected: usize,
        per_host_cap: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        info!(expected, per_host_cap, "waiting for engine registrations");

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut per_host: BTreeMap<String, usize> = BTreeMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut eligible = Vec::new();
        let mut surplus = Vec::new();
        let mut received = 0;

        while received < expected {
            let message = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, mailbox.fetch(keys::ENGINE_INFO))
                    .await
                    .map_err(|_| SqError::RegistrationTimeout { received, expected })??,
                None => mailbox.fetch(keys::ENGINE_INFO).await?,
            };

            let (host, engine_id) = match message.into_registration() {
                Ok(reg) => reg,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed registration");
                    continue;
                }
            };
            received += 1;

            let engine = Engine::new(engine_id, host);
            let accepted_on_host = per_host.entry(engine.host.clone()).or_default();

            let verdict = if !seen.insert(engine.id.clone()) {
                warn!(engine = %engine, "duplicate engine id registered; rejecting");
                Verdict::Rejected
            } else if *accepted_on_host < per_host_cap {
                *accepted_on_host += 1;
                Verdict::Accepted
            } else {
                Verdict::Rejected
            };

            mailbox
                .store(&keys::engine_status(&engine.id), Message::Verdict(verdict))
                .await?;

            match verdict {
                Verdict::Accepted => {
                    info!(engine = %engine, "engine registered");
                    eligible.push(engine);
                }
                Verdict::Rejected => {
                    info!(engine = %engine, "engine surplus to host cap; told to exit");
                    surplus.push(engine);
                }
            }
        }

        let hosts: Vec<&String> = per_host.keys().collect();
        info!(?hosts, eligible = eligible.len(), surplus = surplus.len(), "node list");

        Ok(Self::with_engines(mailbox, eligible, surplus))
    }
}
