//! MISP ZMQ feed subscription and message decoding

use crate::error::{GlueError, Result};
use crate::event::Event;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::time::Duration;
use zeromq::{Socket, SocketEvent, SocketRecv, SubSocket, ZmqMessage, ZmqResult};

/// Source of raw feed messages
#[async_trait]
pub trait FeedSource: Send {
    /// Wait for the next message. `Ok(None)` means the feed is closed for good.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Strip the topic prefix and parse the rest as an event
pub fn decode_message(raw: &[u8], prefix_len: usize) -> Result<Event> {
    let body = raw.get(prefix_len..).ok_or_else(|| {
        GlueError::FeedDecode(format!(
            "message is {} bytes, shorter than the {}-byte prefix",
            raw.len(),
            prefix_len
        ))
    })?;

    let text = std::str::from_utf8(body)
        .map_err(|e| GlueError::FeedDecode(format!("payload is not UTF-8: {}", e)))?;

    Event::from_json(text)
}

/// When the subscriber tears down and rebuilds its socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect after this long without a message; `None` never does
    pub idle_timeout: Option<Duration>,
    /// Pause before each reconnect attempt
    pub retry_interval: Duration,
}

/// What woke the subscriber up
enum Wake {
    Message(ZmqResult<ZmqMessage>),
    Monitor(Option<SocketEvent>),
    Idle,
}

/// Subscriber on MISP's ZMQ publisher, receiving every topic.
///
/// The socket does not reconnect by itself, so a disconnect reported by the
/// socket monitor, or a silence longer than the idle timeout, rebuilds it.
pub struct ZmqFeed {
    endpoint: String,
    policy: ReconnectPolicy,
    socket: SubSocket,
    monitor: mpsc::Receiver<SocketEvent>,
    connected: bool,
}

impl ZmqFeed {
    /// Connect to `tcp://host:port` and subscribe to all topics
    pub async fn connect(host: &str, port: u16, policy: ReconnectPolicy) -> Result<Self> {
        let endpoint = format!("tcp://{}:{}", host, port);
        tracing::info!("Subscribing to {}", endpoint);

        let (socket, monitor) = subscribe(&endpoint).await?;

        Ok(Self {
            endpoint,
            policy,
            socket,
            monitor,
            connected: true,
        })
    }

    async fn reconnect(&mut self) -> Result<()> {
        tokio::time::sleep(self.policy.retry_interval).await;

        let (socket, monitor) = subscribe(&self.endpoint).await?;
        self.socket = socket;
        self.monitor = monitor;
        self.connected = true;

        tracing::info!("Resubscribed to {}", self.endpoint);
        Ok(())
    }
}

async fn subscribe(endpoint: &str) -> Result<(SubSocket, mpsc::Receiver<SocketEvent>)> {
    let mut socket = SubSocket::new();
    let monitor = socket.monitor();

    socket.connect(endpoint).await.map_err(|e| GlueError::Feed {
        source: e,
        context: format!("Failed to connect to {}", endpoint),
    })?;
    socket.subscribe("").await.map_err(|e| GlueError::Feed {
        source: e,
        context: format!("Failed to subscribe on {}", endpoint),
    })?;

    Ok((socket, monitor))
}

#[async_trait]
impl FeedSource for ZmqFeed {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if !self.connected {
                // A failed attempt surfaces as an error; the next call retries
                self.reconnect().await?;
            }

            let idle_timeout = self.policy.idle_timeout;
            let idle = async move {
                match idle_timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending().await,
                }
            };

            let wake = tokio::select! {
                message = self.socket.recv() => Wake::Message(message),
                event = self.monitor.next() => Wake::Monitor(event),
                _ = idle => Wake::Idle,
            };

            match wake {
                Wake::Message(Ok(message)) => {
                    // MISP publishes single-frame messages; join frames in case it ever doesn't
                    let payload = message
                        .into_vec()
                        .into_iter()
                        .flat_map(|frame| frame.to_vec())
                        .collect();
                    return Ok(Some(payload));
                }
                Wake::Message(Err(e)) => {
                    self.connected = false;
                    return Err(GlueError::Feed {
                        source: e,
                        context: format!("Failed to receive from {}", self.endpoint),
                    });
                }
                Wake::Monitor(Some(SocketEvent::Disconnected(_))) | Wake::Monitor(None) => {
                    tracing::warn!("Publisher at {} disconnected, reconnecting", self.endpoint);
                    self.connected = false;
                }
                Wake::Monitor(Some(event)) => {
                    tracing::trace!("Feed socket event: {:?}", event);
                }
                Wake::Idle => {
                    tracing::info!(
                        "No message from {} for {:?}, reconnecting",
                        self.endpoint,
                        idle_timeout.unwrap_or_default()
                    );
                    self.connected = false;
                }
            }
        }
    }
}
