//! Auto-reconnecting event streams
//!
//! `EventReconnector<T>` turns a one-shot `connect` function into a stream that
//! survives disconnects:
//! - the first connect runs inside `watch`, its error is returned to the caller
//! - payloads and `Reconnected` markers are forwarded in order
//! - a `Disconnected` event (or the upstream closing) triggers bounded reconnects,
//!   a successful one emits a single `Reconnected` marker
//! - exhausted reconnects emit one final `Disconnected` and close the stream
//! - cancellation closes the stream without further events
//!
//! One forwarding task owns the upstream receiver and swaps it on reconnect, so an
//! old session can never deliver into the output after being replaced. Each session
//! gets its own child token, cancelled when the session is abandoned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};
use unitrade_core::{CancellationToken, RetryError, RetryPolicy, retry_all};

use crate::errors::{ExchangeError, Result};
use crate::events::{Event, EventStream};

pub type ConnectFuture<T> = Pin<Box<dyn Future<Output = Result<EventStream<T>>>>>;

pub type ConnectFn<T> = Arc<dyn Fn(CancellationToken) -> ConnectFuture<T>>;

/// Output channel capacity.
pub const DEFAULT_STREAM_BUFFER: usize = 100;

pub struct EventReconnector<T> {
    name: String,
    connect: ConnectFn<T>,
    policy: RetryPolicy,
    buffer: usize,
    on_disconnect: Option<Arc<dyn Fn()>>,
}

impl<T> Clone for EventReconnector<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connect: self.connect.clone(),
            policy: self.policy.clone(),
            buffer: self.buffer,
            on_disconnect: self.on_disconnect.clone(),
        }
    }
}

impl<T: 'static> EventReconnector<T> {
    pub fn new<F, Fut>(name: impl Into<String>, connect: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<EventStream<T>>> + 'static,
    {
        Self {
            name: name.into(),
            connect: Arc::new(move |token| Box::pin(connect(token)) as ConnectFuture<T>),
            policy: RetryPolicy::reconnect(),
            buffer: DEFAULT_STREAM_BUFFER,
            on_disconnect: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Called on every disconnect, before reconnecting and on cancellation.
    pub fn with_on_disconnect(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connect and start forwarding. Returns as soon as the first connection is up.
    pub async fn watch(&self, ctx: &CancellationToken) -> Result<EventStream<T>> {
        let session = ctx.child_token();
        let upstream = match (self.connect)(session.clone()).await {
            Ok(upstream) => upstream,
            Err(e) => {
                session.cancel();
                return Err(e);
            }
        };

        let (tx, rx) = flume::bounded(self.buffer);
        info!("🔗 {} stream connected", self.name);
        monoio::spawn(self.clone().forward(ctx.clone(), session, upstream, tx));
        Ok(rx)
    }

    async fn forward(
        self,
        ctx: CancellationToken,
        mut session: CancellationToken,
        mut upstream: EventStream<T>,
        tx: flume::Sender<Event<T>>,
    ) {
        let mut reconnects = 0u32;
        loop {
            let next = monoio::select! {
                _ = ctx.cancelled() => None,
                ev = upstream.recv_async() => Some(ev),
            };
            let Some(next) = next else {
                self.shutdown(&session);
                return;
            };

            let cause = match next {
                Ok(Event::Disconnected(e)) => e,
                Ok(ev) => {
                    if !send(&ctx, &tx, ev).await {
                        self.shutdown(&session);
                        return;
                    }
                    continue;
                }
                Err(_) => ExchangeError::NetworkError(format!("{} upstream closed", self.name)),
            };

            warn!("🔌 {} disconnected: {}", self.name, cause);
            if let Some(hook) = &self.on_disconnect {
                hook();
            }
            session.cancel();

            reconnects += 1;
            info!("🔄 {} reconnecting (reconnect #{})", self.name, reconnects);
            match self.reconnect(&ctx).await {
                Ok((new_session, new_upstream)) => {
                    info!("✅ {} reconnected", self.name);
                    session = new_session;
                    upstream = new_upstream;
                    if !send(&ctx, &tx, Event::Reconnected).await {
                        self.shutdown(&session);
                        return;
                    }
                }
                Err(RetryError::Cancelled) => {
                    self.shutdown(&session);
                    return;
                }
                Err(RetryError::Failed(last)) => {
                    warn!("❌ {} all reconnects failed, last error: {}", self.name, last);
                    let terminal = Event::Disconnected(cause.context("all reconnects failed"));
                    send(&ctx, &tx, terminal).await;
                    return;
                }
            }
        }
    }

    async fn reconnect(
        &self,
        ctx: &CancellationToken,
    ) -> std::result::Result<(CancellationToken, EventStream<T>), RetryError<ExchangeError>> {
        let connect = self.connect.clone();
        let name = self.name.clone();
        retry_all(&self.policy, ctx, |attempt| {
            let connect = connect.clone();
            let name = name.clone();
            let session = ctx.child_token();
            async move {
                match connect(session.clone()).await {
                    Ok(upstream) => Ok((session, upstream)),
                    Err(e) => {
                        session.cancel();
                        warn!("⚠️ {} reconnect attempt {} failed: {}", name, attempt + 1, e);
                        Err(e)
                    }
                }
            }
        })
        .await
    }

    fn shutdown(&self, session: &CancellationToken) {
        session.cancel();
        if let Some(hook) = &self.on_disconnect {
            hook();
        }
        info!("🛑 {} stream stopped", self.name);
    }
}

/// Send unless cancelled first. False when the stream should stop.
pub(crate) async fn send<T>(ctx: &CancellationToken, tx: &flume::Sender<Event<T>>, ev: Event<T>) -> bool {
    monoio::select! {
        _ = ctx.cancelled() => false,
        sent = tx.send_async(ev) => sent.is_ok(),
    }
}
