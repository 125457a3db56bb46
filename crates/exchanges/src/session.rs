//! WebSocket session pump
//!
//! Reads text messages from an already connected socket, decodes them into
//! payloads and forwards them over a bounded channel. The socket is kept alive
//! with periodic pings and dropped when the peer stays silent for too long. Reads
//! are bounded by the ping interval inside the socket, so a quiet interval never
//! abandons a read in flight. Any
//! failure ends the session with a single `Disconnected` event; reconnecting is
//! left to `EventReconnector`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use unitrade_core::CancellationToken;

use crate::errors::{ExchangeError, Result};
use crate::events::{Event, EventStream};
use crate::reconnect::{DEFAULT_STREAM_BUFFER, send};
pub use crate::websocket::Incoming;
use crate::websocket::MonoioWebSocket;

/// What the pump needs from a socket.
#[async_trait(?Send)]
pub trait TextSocket {
    /// Next text message, `Incoming::Idle` when none arrived within `wait`,
    /// `Incoming::Closed` once the peer closed the connection.
    async fn receive_text(&mut self, wait: Duration) -> Result<Incoming>;

    async fn send_text(&mut self, message: &str) -> Result<()>;

    /// Protocol-level ping.
    async fn ping(&mut self) -> Result<()>;

    fn idle_for(&self) -> Duration;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait(?Send)]
impl TextSocket for MonoioWebSocket {
    async fn receive_text(&mut self, wait: Duration) -> Result<Incoming> {
        MonoioWebSocket::receive_text_within(self, wait).await
    }

    async fn send_text(&mut self, message: &str) -> Result<()> {
        MonoioWebSocket::send_text(self, message).await
    }

    async fn ping(&mut self) -> Result<()> {
        MonoioWebSocket::ping(self).await
    }

    fn idle_for(&self) -> Duration {
        MonoioWebSocket::idle_for(self)
    }

    async fn close(&mut self) -> Result<()> {
        MonoioWebSocket::close(self).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub interval: Duration,
    pub idle_timeout: Duration,
    /// Application-level ping text. `None` sends protocol ping frames.
    pub message: Option<String>,
}

impl Keepalive {
    pub fn new(interval: Duration, idle_timeout: Duration) -> Self {
        Self { interval, idle_timeout, message: None }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Start pumping `socket` until `token` is cancelled or the session fails.
///
/// `decode` turns one text message into zero or more payloads. An error from it
/// ends the session.
pub fn spawn_session<S, T, D>(
    name: impl Into<String>,
    socket: S,
    token: CancellationToken,
    keepalive: Keepalive,
    decode: D,
) -> EventStream<T>
where
    S: TextSocket + 'static,
    T: 'static,
    D: FnMut(&str) -> Result<Vec<T>> + 'static,
{
    let (tx, rx) = flume::bounded(DEFAULT_STREAM_BUFFER);
    monoio::spawn(pump(name.into(), socket, token, keepalive, decode, tx));
    rx
}

async fn pump<S, T, D>(
    name: String,
    mut socket: S,
    token: CancellationToken,
    keepalive: Keepalive,
    mut decode: D,
    tx: flume::Sender<Event<T>>,
) where
    S: TextSocket,
    D: FnMut(&str) -> Result<Vec<T>>,
{
    let mut last_ping = Instant::now();
    let cause = loop {
        let received = monoio::select! {
            _ = token.cancelled() => None,
            r = socket.receive_text(keepalive.interval) => Some(r),
        };
        let Some(received) = received else {
            let _ = socket.close().await;
            debug!("🛑 {} session cancelled", name);
            return;
        };

        match received {
            // Quiet interval, fall through to the keepalive checks.
            Ok(Incoming::Idle) => {}
            Ok(Incoming::Text(text)) => match decode(&text) {
                Ok(items) => {
                    for item in items {
                        if !send(&token, &tx, Event::Payload(item)).await {
                            let _ = socket.close().await;
                            return;
                        }
                    }
                }
                Err(e) => break e,
            },
            Ok(Incoming::Closed) => break ExchangeError::NetworkError(format!("{name} closed by peer")),
            Err(e) => break e,
        }

        let idle = socket.idle_for();
        if idle > keepalive.idle_timeout {
            break ExchangeError::Timeout(format!("{name} silent for {} ms", idle.as_millis()));
        }
        if last_ping.elapsed() >= keepalive.interval {
            let pinged = match &keepalive.message {
                Some(message) => socket.send_text(message).await,
                None => socket.ping().await,
            };
            if let Err(e) = pinged {
                break e.context("keepalive ping");
            }
            last_ping = Instant::now();
        }
    };

    warn!("🔌 {} session ended: {}", name, cause);
    let _ = socket.close().await;
    send(&token, &tx, Event::Disconnected(cause)).await;
}
