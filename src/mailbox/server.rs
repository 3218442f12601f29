// src/mailbox/server.rs

//! TCP front-end for a [`MemoryMailbox`].
//!
//! Wire format: one JSON [`Request`] per line, answered by one JSON
//! [`Response`] per line. Requests on a connection are handled strictly in
//! order, so a blocking `fetch` holds up only its own connection.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, SqError};

use super::{Mailbox, MemoryMailbox, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Store { key: String, value: Message },
    Fetch { key: String },
    FetchTry { key: String },
    Peek { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Done,
    Value { value: Option<Message> },
    Error { message: String, closed: bool },
}

impl Response {
    fn from_error(err: SqError) -> Self {
        let closed = matches!(err, SqError::MailboxClosed);
        Response::Error {
            message: err.to_string(),
            closed,
        }
    }
}

pub struct MailboxServer {
    listener: TcpListener,
    mailbox: Arc<MemoryMailbox>,
}

impl MailboxServer {
    pub async fn bind(addr: SocketAddr, mailbox: Arc<MemoryMailbox>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, mailbox })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.listener.local_addr() {
                Ok(addr) => info!(%addr, "mailbox server listening"),
                Err(e) => warn!(error = %e, "mailbox server listening on unknown address"),
            }

            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "mailbox connection accepted");
                        let mailbox = Arc::clone(&self.mailbox);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, mailbox).await {
                                debug!(%peer, error = %e, "mailbox connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept mailbox connection");
                    }
                }
            }
        })
    }
}

async fn serve_connection(stream: TcpStream, mailbox: Arc<MemoryMailbox>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&mailbox, request).await,
            Err(e) => Response::Error {
                message: format!("malformed request: {e}"),
                closed: false,
            },
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write.write_all(out.as_bytes()).await?;
    }

    Ok(())
}

async fn handle_request(mailbox: &MemoryMailbox, request: Request) -> Response {
    let result = match request {
        Request::Store { key, value } => mailbox.store(&key, value).await.map(|()| Response::Done),
        Request::Fetch { key } => mailbox
            .fetch(&key)
            .await
            .map(|value| Response::Value { value: Some(value) }),
        Request::FetchTry { key } => mailbox
            .fetch_try(&key)
            .await
            .map(|value| Response::Value { value }),
        Request::Peek { key } => mailbox.peek(&key).await.map(|value| Response::Value { value }),
        Request::Delete { key } => mailbox.delete(&key).await.map(|()| Response::Done),
    };

    result.unwrap_or_else(Response::from_error)
}
