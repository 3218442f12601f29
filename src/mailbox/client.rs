// src/mailbox/client.rs

//! Remote mailbox client used by engines (and `simplequeue status`).
//!
//! Each `TcpMailbox` is one logical connection. Requests are serialized by
//! a per-connection lock, so a task holding a blocking `fetch` keeps the
//! connection busy until the value arrives. Open a second `TcpMailbox` when
//! traffic must not queue behind such a fetch.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{Result, SqError};

use super::server::{Request, Response};
use super::{Mailbox, MailboxFuture, Message};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct TcpMailbox {
    conn: Mutex<Connection>,
    addr: String,
}

impl std::fmt::Debug for TcpMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpMailbox")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TcpMailbox {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read, writer) = stream.into_split();

        debug!(addr, "connected to mailbox");

        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(read),
                writer,
            }),
            addr: addr.to_string(),
        })
    }

    /// Connect, retrying while the driver may still be starting up.
    pub async fn connect_with_retry(addr: &str, attempts: u32, delay: Duration) -> Result<Self> {
        let mut attempt = 1;
        loop {
            match Self::connect(addr).await {
                Ok(mailbox) => return Ok(mailbox),
                Err(e) if attempt < attempts => {
                    warn!(addr, attempt, error = %e, "mailbox not reachable yet; retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request(&self, request: Request) -> Result<Response> {
        let mut conn = self.conn.lock().await;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        conn.writer.write_all(line.as_bytes()).await?;

        let mut buf = String::new();
        if conn.reader.read_line(&mut buf).await? == 0 {
            return Err(SqError::MailboxClosed);
        }

        match serde_json::from_str::<Response>(&buf)? {
            Response::Error { closed: true, .. } => Err(SqError::MailboxClosed),
            Response::Error { message, .. } => Err(SqError::Protocol(message)),
            other => Ok(other),
        }
    }

    async fn request_value(&self, request: Request) -> Result<Option<Message>> {
        match self.request(request).await? {
            Response::Value { value } => Ok(value),
            other => Err(SqError::Protocol(format!("expected a value, got {other:?}"))),
        }
    }
}

impl Mailbox for TcpMailbox {
    fn store<'a>(&'a self, key: &'a str, value: Message) -> MailboxFuture<'a, ()> {
        Box::pin(async move {
            self.request(Request::Store {
                key: key.to_string(),
                value,
            })
            .await
            .map(|_| ())
        })
    }

    fn fetch<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Message> {
        Box::pin(async move {
            self.request_value(Request::Fetch {
                key: key.to_string(),
            })
            .await?
            .ok_or_else(|| SqError::Protocol(format!("fetch on '{key}' returned no value")))
        })
    }

    fn fetch_try<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>> {
        Box::pin(self.request_value(Request::FetchTry {
            key: key.to_string(),
        }))
    }

    fn peek<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, Option<Message>> {
        Box::pin(self.request_value(Request::Peek {
            key: key.to_string(),
        }))
    }

    fn delete<'a>(&'a self, key: &'a str) -> MailboxFuture<'a, ()> {
        Box::pin(async move {
            self.request(Request::Delete {
                key: key.to_string(),
            })
            .await
            .map(|_| ())
        })
    }
}
