//! Plain-TCP pub/sub transport between the controller and its hub workers.
//!
//! The real system runs this over zmq PUB/PULL sockets; reaching for a zmq
//! binding here would pull in a dependency outside the rest of this stack,
//! so the same two one-directional flows are rebuilt on top of
//! `tokio::net::TcpListener`/`TcpStream` with newline-delimited frames:
//!
//! - Downlink (controller -> worker): the controller listens on `PUB_PORT`.
//!   Each worker connects and sends a one-line subscribe handshake (its hub
//!   tag, e.g. `N00H02`); the controller then forwards every published frame
//!   whose tag starts with a connected worker's subscribed prefix to that
//!   worker's socket only. No subscriber for a tag means the frame is
//!   dropped, matching zmq PUB's at-most-once, no-backlog behavior.
//! - Uplink (worker -> controller): the controller listens on `PULL_PORT`.
//!   Every connected worker's frames fan in, preserving FIFO order per
//!   connection, into a single `Message` stream the dispatcher reads from.
//!
//! Frames are `<tag> <json>\n`; the newline lives here, not in
//! [`crate::message::Message::encode`], since it is purely a transport
//! delimiter.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::message::Message;

/// Controller-side handle to the downlink (PUB) listener.
///
/// Cloning shares the same subscriber table; `publish` can be called from
/// any task that holds a clone.
#[derive(Clone)]
pub struct Downlink {
    subscribers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
    local_addr: std::net::SocketAddr,
}

impl Downlink {
    /// Binds `addr` and spawns the accept loop. Returns immediately; the
    /// accept loop runs for the lifetime of the returned handle's clones.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let downlink = Downlink {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            local_addr,
        };
        let accepted = downlink.clone();
        tokio::spawn(async move {
            accepted.accept_loop(listener).await;
        });
        Ok(downlink)
    }

    /// The address actually bound, useful when `addr` asked for an
    /// ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "downlink accept failed");
                    continue;
                }
            };
            let subscribers = self.subscribers.clone();
            tokio::spawn(async move {
                handle_subscriber(stream, subscribers).await;
            });
        }
    }

    /// Forwards `message` to every connected worker whose subscribed tag
    /// prefixes the message's address tag. Silently drops the message if
    /// no worker is subscribed (zmq PUB semantics: fire and forget).
    pub async fn publish(&self, message: &Message) -> Result<(), serde_json::Error> {
        let frame = message.encode()?;
        let tag = message.address().tag();
        let subscribers = self.subscribers.lock().await;
        for (sub_tag, tx) in subscribers.iter() {
            if tag.starts_with(sub_tag.as_str()) {
                let _ = tx.send(frame.clone());
            }
        }
        Ok(())
    }
}

async fn handle_subscriber(
    stream: TcpStream,
    subscribers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut handshake = String::new();
    if reader.read_line(&mut handshake).await.unwrap_or(0) == 0 {
        return;
    }
    let sub_tag = handshake.trim().to_string();
    if sub_tag.is_empty() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    subscribers.lock().await.insert(sub_tag.clone(), tx);

    // No linger on cancellation: the writer loop simply ends when the
    // channel closes (handle dropped) or the socket write fails.
    while let Some(frame) = rx.recv().await {
        if write_half.write_all(frame.as_bytes()).await.is_err() {
            break;
        }
        if write_half.write_all(b"\n").await.is_err() {
            break;
        }
    }

    subscribers.lock().await.remove(&sub_tag);
}

/// Controller-side handle to the uplink (PULL) listener.
///
/// Frames from every connected worker fan in, each connection preserving
/// its own FIFO order, into one channel the dispatcher drains.
pub struct Uplink {
    receiver: mpsc::UnboundedReceiver<Message>,
    local_addr: std::net::SocketAddr,
}

impl Uplink {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            accept_uplink_loop(listener, tx).await;
        });
        Ok(Uplink { receiver: rx, local_addr })
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// The address actually bound, useful when `addr` asked for an
    /// ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

async fn accept_uplink_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Message>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "uplink accept failed");
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            read_uplink_connection(stream, tx).await;
        });
    }
}

async fn read_uplink_connection(stream: TcpStream, tx: mpsc::UnboundedSender<Message>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        match Message::decode(line.trim_end()) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, frame = %line.trim_end(), "dropping malformed uplink frame"),
        }
    }
}

/// Worker-side connection to the controller's downlink (PUB) listener.
///
/// Sends the subscribe handshake on connect, then yields decoded messages
/// addressed to this hub (or any of its descendants).
pub struct Downstream {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

impl Downstream {
    pub async fn connect(addr: &str, subscribe_tag: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(subscribe_tag.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        // The write half is not read from again; dropping it would close
        // the socket's write side, which is fine since subscribers never
        // write after the handshake. Leak it onto a task that just holds
        // it open for the connection's lifetime.
        tokio::spawn(async move {
            let _keepalive = write_half;
            std::future::pending::<()>().await;
        });
        Ok(Downstream {
            reader: BufReader::new(read_half),
        })
    }

    /// Reads the next frame, or `None` on connection close.
    pub async fn recv(&mut self) -> Option<Message> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await.ok()?;
            if n == 0 {
                return None;
            }
            match Message::decode(line.trim_end()) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(error = %e, frame = %line.trim_end(), "dropping malformed downlink frame");
                    continue;
                }
            }
        }
    }
}

/// Worker-side connection to the controller's uplink (PULL) listener.
pub struct Upstream {
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Upstream {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (_read_half, writer) = stream.into_split();
        Ok(Upstream { writer })
    }

    pub async fn send(&mut self, message: &Message) -> anyhow::Result<()> {
        let frame = message.encode()?;
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use tokio::time::{timeout, Duration};

    async fn bind_loopback() -> (Downlink, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let addr = local_addr.to_string();
        let downlink = Downlink {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            local_addr,
        };
        let accepted = downlink.clone();
        tokio::spawn(async move {
            accepted.accept_loop(listener).await;
        });
        (downlink, addr)
    }

    #[tokio::test]
    async fn subscriber_receives_messages_for_its_tag() {
        let (downlink, addr) = bind_loopback().await;
        let mut downstream = Downstream::connect(&addr, "N00H01").await.unwrap();

        // Give the accept loop a moment to register the subscriber.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = Message::HubConnectInd {
            address: Address::hub(0, 1),
        };
        downlink.publish(&msg).await.unwrap();

        let received = timeout(Duration::from_secs(1), downstream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn non_matching_subscriber_does_not_receive() {
        let (downlink, addr) = bind_loopback().await;
        let mut downstream = Downstream::connect(&addr, "N00H02").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let msg = Message::HubConnectInd {
            address: Address::hub(0, 1),
        };
        downlink.publish(&msg).await.unwrap();

        let result = timeout(Duration::from_millis(200), downstream.recv()).await;
        assert!(result.is_err(), "non-matching subscriber should not receive a frame");
    }

    #[tokio::test]
    async fn uplink_fans_in_messages_from_multiple_workers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            accept_uplink_loop(listener, tx).await;
        });

        let mut up1 = Upstream::connect(&addr).await.unwrap();
        let mut up2 = Upstream::connect(&addr).await.unwrap();

        let msg1 = Message::HubConnectInd {
            address: Address::hub(0, 1),
        };
        let msg2 = Message::HubConnectInd {
            address: Address::hub(0, 2),
        };
        up1.send(&msg1).await.unwrap();
        up2.send(&msg2).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            received.push(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        assert!(received.contains(&msg1));
        assert!(received.contains(&msg2));
    }
}
