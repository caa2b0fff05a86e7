//! Point-to-point request/reply channel between peers
//!
//! The transport is strict request/reply: one JSON line out, one JSON line
//! back. Each channel is single-in-flight; concurrent callers serialize on
//! the per-peer mutex. On timeout the connection is torn down and reopened
//! before the next attempt (Lazy Pirate), up to three attempts total.

use crate::cluster::message::{NodeMessage, Reply};
use crate::common::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Maximum send attempts before the failure is reported to the caller.
const MAX_ATTEMPTS: usize = 3;

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct PeerChannel {
    /// Peer node id (or "coordinator")
    peer_id: String,
    addr: String,
    /// Per-attempt timeout
    timeout: Duration,
    /// Single-in-flight guard plus the reusable connection
    conn: Mutex<Option<Conn>>,
}

impl PeerChannel {
    pub fn new(peer_id: impl Into<String>, addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            peer_id: peer_id.into(),
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request and await its reply.
    ///
    /// Holds the peer mutex for the whole exchange; the underlying socket
    /// must never interleave two requests.
    pub async fn send(&self, msg: &NodeMessage) -> Result<Reply> {
        let line = serde_json::to_string(msg)?;
        let mut guard = self.conn.lock().await;

        let mut last_err = Error::Timeout(format!("{} unreachable", self.peer_id));
        for attempt in 1..=MAX_ATTEMPTS {
            if guard.is_none() {
                match self.connect().await {
                    Ok(conn) => *guard = Some(conn),
                    Err(e) => {
                        tracing::debug!(
                            peer = %self.peer_id,
                            attempt,
                            "connect failed: {}",
                            e
                        );
                        last_err = e;
                        continue;
                    }
                }
            }

            let conn = guard.as_mut().unwrap();
            match self.exchange(conn, &line).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    // Lazy Pirate: the socket state is unknown after a
                    // timeout, so discard it and reconnect before retrying.
                    *guard = None;
                    tracing::debug!(
                        peer = %self.peer_id,
                        attempt,
                        "request failed: {}",
                        e
                    );
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Send one request and await its reply with a timeout override.
    pub async fn send_with_timeout(&self, msg: &NodeMessage, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, self.send(msg)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} did not reply within {:?}",
                self.peer_id, timeout
            ))),
        }
    }

    async fn connect(&self) -> Result<Conn> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", self.addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        let (read, write) = stream.into_split();
        Ok(Conn {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    async fn exchange(&self, conn: &mut Conn, line: &str) -> Result<Reply> {
        let io = async {
            conn.writer.write_all(line.as_bytes()).await?;
            conn.writer.write_all(b"\n").await?;
            conn.writer.flush().await?;

            let mut reply_line = String::new();
            let n = conn.reader.read_line(&mut reply_line).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed connection",
                ));
            }
            Ok(reply_line)
        };

        let reply_line = tokio::time::timeout(self.timeout, io)
            .await
            .map_err(|_| Error::Timeout(format!("{} request timed out", self.peer_id)))?
            .map_err(|e: std::io::Error| Error::ConnectionFailed(e.to_string()))?;

        serde_json::from_str(reply_line.trim())
            .map_err(|e| Error::BadReply(format!("{}: {}", self.peer_id, e)))
    }
}
