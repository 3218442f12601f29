// src/dispatch/counters.rs

//! The four run counters, published through the mailbox for monitoring.
//!
//! The mailbox has no atomic increment, so every update is a
//! read-increment-store performed under this struct's own lock.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::Result;
use crate::mailbox::{keys, Mailbox, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Launched,
    Done,
    Succeeded,
    Failed,
}

impl Counter {
    pub const ALL: [Counter; 4] = [
        Counter::Launched,
        Counter::Done,
        Counter::Succeeded,
        Counter::Failed,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Counter::Launched => keys::LAUNCHED,
            Counter::Done => keys::DONE,
            Counter::Succeeded => keys::SUCCEEDED,
            Counter::Failed => keys::FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterValues {
    pub launched: u64,
    pub done: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl CounterValues {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Launched => self.launched,
            Counter::Done => self.done,
            Counter::Succeeded => self.succeeded,
            Counter::Failed => self.failed,
        }
    }

    fn set(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::Launched => self.launched = value,
            Counter::Done => self.done = value,
            Counter::Succeeded => self.succeeded = value,
            Counter::Failed => self.failed = value,
        }
    }
}

pub struct Counters {
    mailbox: Arc<dyn Mailbox>,
    values: Mutex<CounterValues>,
}

impl Counters {
    /// Publish all counters as zero.
    pub async fn init(mailbox: Arc<dyn Mailbox>) -> Result<Self> {
        for counter in Counter::ALL {
            mailbox.delete(counter.key()).await?;
            mailbox.store(counter.key(), Message::Counter(0)).await?;
        }

        Ok(Self {
            mailbox,
            values: Mutex::new(CounterValues::default()),
        })
    }

    async fn bump(&self, values: &mut CounterValues, counter: Counter) -> Result<u64> {
        let key = counter.key();
        let current = match self.mailbox.fetch_try(key).await? {
            Some(message) => message.into_counter()?,
            None => values.get(counter),
        };
        let next = current + 1;
        self.mailbox.store(key, Message::Counter(next)).await?;
        values.set(counter, next);
        debug!(counter = key, value = next, "counter incremented");
        Ok(next)
    }

    pub async fn increment(&self, counter: Counter) -> Result<u64> {
        let mut values = self.values.lock().await;
        self.bump(&mut values, counter).await
    }

    /// Count one finished task: `Done` plus either `Succeeded` or `Failed`,
    /// under a single lock hold so readers never see them disagree.
    pub async fn record_outcome(&self, success: bool) -> Result<()> {
        let mut values = self.values.lock().await;
        self.bump(&mut values, Counter::Done).await?;
        let counter = if success {
            Counter::Succeeded
        } else {
            Counter::Failed
        };
        self.bump(&mut values, counter).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> CounterValues {
        *self.values.lock().await
    }
}

/// Read the published counters without consuming them.
pub async fn read_counters(mailbox: &dyn Mailbox) -> Result<CounterValues> {
    let mut values = CounterValues::default();
    for counter in Counter::ALL {
        if let Some(message) = mailbox.peek(counter.key()).await? {
            values.set(counter, message.into_counter()?);
        }
    }
    Ok(values)
}
