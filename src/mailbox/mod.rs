// src/mailbox/mod.rs

//! Shared coordination mailbox between the driver and its engines.
//!
//! A mailbox is a set of named FIFO queues:
//!
//! - `store` appends a value to a key's queue (history is never overwritten).
//! - `fetch` blocks until a value is available, then pops the oldest.
//! - `fetch_try` pops the oldest value or returns `None` immediately.
//! - `peek` returns the oldest value without removing it (monitoring only).
//! - `delete` drops the key's queue.
//!
//! The driver owns a [`MemoryMailbox`] and exposes it to remote engines via
//! [`MailboxServer`]; engines talk to it through [`TcpMailbox`]. Everything
//! that only needs the contract takes an `Arc<dyn Mailbox>`, so tests can
//! hand the in-memory mailbox straight to an engine or to the driver.

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;

pub mod client;
pub mod keys;
pub mod memory;
pub mod message;
pub mod server;

pub use client::TcpMailbox;
pub use memory::MemoryMailbox;
pub use message::{Assignment, Message, Verdict};
pub use server::MailboxServer;

/// Boxed future returned by [`Mailbox`] operations.
pub type MailboxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The coordination channel contract.
pub trait Mailbox: Send + Sync {
    fn store<'a>(&'a self, key: &'a str, value: Message) -> MailboxFuture<'a, ()>;

    fn fetch<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Message>;

    fn fetch_try<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>>;

    fn peek<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>>;

    fn delete<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, ()>;
}
