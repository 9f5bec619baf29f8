//! Transports carrying capability-channel messages.
//!
//! `PipeTransport` frames messages over a byte stream pair (the worker
//! process's stdio); `LocalTransport` connects two in-process endpoints
//! and backs tests and embedded workers.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::errors::{FleetbootError, FleetbootResult};
use crate::message::Message;

/// A bidirectional, ordered, message-based channel endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: Message) -> FleetbootResult<()>;

    /// Receive the next message. Returns `None` once the peer has gone
    /// away (end of stream).
    async fn recv(&self) -> Option<Message>;
}

/// Line-framed transport over a read/write byte stream pair.
#[derive(Debug)]
pub struct PipeTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
}

impl<R, W> PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<R, W> Transport for PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: Message) -> FleetbootResult<()> {
        let line = message.to_line()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => return None,
                Ok(_) => {
                    let line = line.trim_end_matches(['\r', '\n']);
                    if line.is_empty() {
                        continue;
                    }
                    match Message::parse_line(line) {
                        Some(message) => return Some(message),
                        // Not a framed message: worker output, pass through.
                        None => tracing::info!(target: "worker", "{}", line),
                    }
                }
                Err(e) => {
                    tracing::warn!("transport read error: {}", e);
                    return None;
                }
            }
        }
    }
}

/// In-process transport endpoint. Created in connected pairs.
pub struct LocalTransport {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl LocalTransport {
    /// Create a connected pair: messages sent on one end arrive, in
    /// order, on the other.
    pub fn pair() -> (LocalTransport, LocalTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            LocalTransport {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            LocalTransport {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: Message) -> FleetbootResult<()> {
        self.tx
            .send(message)
            .map_err(|_| FleetbootError::Protocol("peer endpoint closed".into()))
    }

    async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_pair_delivers_in_order() {
        let (a, b) = LocalTransport::pair();
        a.send(Message::new("first")).await.unwrap();
        a.send(Message::new("second")).await.unwrap();
        assert_eq!(b.recv().await.unwrap().msg_type, "first");
        assert_eq!(b.recv().await.unwrap().msg_type, "second");

        b.send(Message::new("reply")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().msg_type, "reply");
    }

    #[tokio::test]
    async fn local_recv_ends_when_peer_dropped() {
        let (a, b) = LocalTransport::pair();
        drop(a);
        assert!(b.recv().await.is_none());
    }

    #[tokio::test]
    async fn pipe_skips_plain_output_lines() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);
        let near = PipeTransport::new(client_r, client_w);
        let far = PipeTransport::new(server_r, server_w);

        {
            let mut writer = far.writer.lock().await;
            writer.write_all(b"worker starting up\n").await.unwrap();
        }
        far.send(Message::new("hello")).await.unwrap();

        let received = near.recv().await.unwrap();
        assert_eq!(received.msg_type, "hello");
    }

    #[tokio::test]
    async fn pipe_recv_ends_on_eof() {
        let (client, server) = tokio::io::duplex(64);
        let (client_r, client_w) = tokio::io::split(client);
        let transport = PipeTransport::new(client_r, client_w);
        drop(server);
        assert!(transport.recv().await.is_none());
    }
}
