// src/mailbox/memory.rs

//! In-process mailbox: keyed FIFO queues guarded by a mutex, with a
//! `Notify` to wake blocked `fetch` callers whenever anything is stored.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::errors::{Result, SqError};

use super::{Mailbox, MailboxFuture, Message};

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Message>>,
    closed: bool,
}

impl State {
    fn pop(&mut self, key: &str) -> Option<Message> {
        let queue = self.queues.get_mut(key)?;
        let value = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(key);
        }
        value
    }
}

#[derive(Debug, Default)]
pub struct MemoryMailbox {
    state: Mutex<State>,
    changed: Notify,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the mailbox: pending and future `fetch` calls fail with
    /// [`SqError::MailboxClosed`], stores are refused.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
        debug!("mailbox closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of values currently queued under `key`.
    pub fn queued(&self, key: &str) -> usize {
        self.lock().queues.get(key).map_or(0, VecDeque::len)
    }

    fn store_now(&self, key: &str, value: Message) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(SqError::MailboxClosed);
            }
            state
                .queues
                .entry(key.to_string())
                .or_default()
                .push_back(value);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn fetch_blocking(&self, key: &str) -> Result<Message> {
        loop {
            // Register interest before looking, so a store that lands between
            // the check and the await still wakes us.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(value) = state.pop(key) {
                    return Ok(value);
                }
                if state.closed {
                    return Err(SqError::MailboxClosed);
                }
            }

            changed.await;
        }
    }
}

impl Mailbox for MemoryMailbox {
    fn store<'a>(&'a self, key: &'a str, value: Message) -> MailboxFuture<'a, ()> {
        Box::pin(async move { self.store_now(key, value) })
    }

    fn fetch<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Message> {
        Box::pin(self.fetch_blocking(key))
    }

    fn fetch_try<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>> {
        Box::pin(async move {
            let mut state = self.lock();
            match state.pop(key) {
                Some(value) => Ok(Some(value)),
                None if state.closed => Err(SqError::MailboxClosed),
                None => Ok(None),
            }
        })
    }

    fn peek<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state.queues.get(key).and_then(|q| q.front().cloned()))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, ()> {
        Box::pin(async move {
            self.lock().queues.remove(key);
            Ok(())
        })
    }
}
