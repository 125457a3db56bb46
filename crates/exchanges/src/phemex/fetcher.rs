//! Order lookups backed by the private order stream
//!
//! Phemex forgets cancelled orders quickly: a REST lookup can come back with
//! `bizError = 10002` for an order that certainly existed. The fetcher keeps every
//! order seen on the AOP stream and answers from that cache first. REST is the
//! second source, and for purged orders the fetcher waits until the stream had a
//! chance to deliver the final state before giving up.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use unitrade_core::{CancellationToken, Clock, DelayType, RetryPolicy, SystemClock, sleep_or_cancelled};

use crate::errors::{ExchangeError, Result, ResultExt};
use crate::events::{Event, EventStream};
use crate::orders::{CachedOrder, OrderTracker, OrdersCache, SymbolClientOrderId, SymbolOrderId, TrackOutcome};
use crate::reconnect::EventReconnector;
use crate::types::{OrderDetailInfo, OrderInfo};

use super::PhemexConfig;
use super::api::{OrderRef, PhemexApi};
use super::models::{ORDER_NOT_FOUND_CODE, OrderFields, OrderResponse, convert_order, order_detail};
use super::stream::WsOrderUpdate;

#[derive(Default)]
struct FetcherState {
    tracker: OrderTracker<OrderFields>,
    subscribed_at: Option<DateTime<Utc>>,
}

type SharedState = Arc<RwLock<FetcherState>>;

fn read(state: &SharedState) -> std::sync::RwLockReadGuard<'_, FetcherState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(state: &SharedState) -> std::sync::RwLockWriteGuard<'_, FetcherState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CombinedOrdersFetcher {
    api: Arc<dyn PhemexApi>,
    reconnector: EventReconnector<WsOrderUpdate>,
    state: SharedState,
    clock: Arc<dyn Clock>,
    warmup: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl CombinedOrdersFetcher {
    /// `connect` opens one order stream session.
    pub fn new<F, Fut>(api: Arc<dyn PhemexApi>, config: &PhemexConfig, connect: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<EventStream<WsOrderUpdate>>> + 'static,
    {
        let state = SharedState::default();
        let on_disconnect = state.clone();
        let reconnector = EventReconnector::new("phemex orders", connect)
            .with_policy(
                RetryPolicy::reconnect()
                    .with_max_attempts(None)
                    .with_delay(config.reconnect_delay, DelayType::Fixed)
                    .with_max_jitter(Duration::ZERO),
            )
            .with_on_disconnect(move || {
                let mut state = write(&on_disconnect);
                state.tracker.reset_to_finals();
                state.subscribed_at = None;
            });

        Self {
            api,
            reconnector,
            state,
            clock: Arc::new(SystemClock),
            warmup: config.stream_warmup,
            running: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Subscribe to the order stream and keep the cache fed until `stop` or `ctx`
    /// is cancelled. Fails only when the first subscription fails.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        let token = ctx.child_token();
        let events = match self.reconnector.watch(&token).await {
            Ok(events) => events,
            Err(e) => {
                token.cancel();
                return Err(e.context("can't subscribe to orders"));
            }
        };
        write(&self.state).subscribed_at = Some(self.clock.now());

        let previous = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token);
        if let Some(previous) = previous {
            previous.cancel();
        }

        let state = self.state.clone();
        let clock = self.clock.clone();
        monoio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                match event {
                    Event::Payload(update) => record(&state, clock.as_ref(), update),
                    Event::Reconnected => write(&state).subscribed_at = Some(clock.now()),
                    Event::Disconnected(e) => warn!("❌ Phemex order stream stopped: {}", e),
                }
            }
            debug!("🛑 Phemex orders consumer stopped");
        });
        info!("📡 Phemex orders fetcher started");
        Ok(())
    }

    pub fn stop(&self) {
        let token = self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Feed one stream update into the cache.
    pub fn record(&self, update: WsOrderUpdate) {
        record(&self.state, self.clock.as_ref(), update);
    }

    pub fn subscribed_at(&self) -> Option<DateTime<Utc>> {
        read(&self.state).subscribed_at
    }

    pub async fn get_order_by_order_id(
        &self,
        ctx: &CancellationToken,
        phemex_symbol: &str,
        order_id: &str,
    ) -> Result<(OrderInfo, OrderFields)> {
        let key = SymbolOrderId::new(phemex_symbol, order_id);
        if let Some(found) = self.cached(|cache| Ok(cache.get_by_order_id(&key)), false)? {
            return Ok(found);
        }

        match self.fetch(ctx, phemex_symbol, OrderRef::OrderId(order_id)).await? {
            Some(found) => Ok(found),
            None => {
                self.wait_warmup(ctx).await?;
                self.cached(|cache| Ok(cache.get_by_order_id(&key)), true)?
                    .ok_or_else(|| cleared(order_id))
            }
        }
    }

    pub async fn get_order_by_client_order_id(
        &self,
        ctx: &CancellationToken,
        phemex_symbol: &str,
        client_order_id: &str,
    ) -> Result<(OrderInfo, OrderFields)> {
        let key = SymbolClientOrderId::new(phemex_symbol, client_order_id);
        if let Some(found) = self.cached(|cache| cache.get_by_client_order_id(&key), false)? {
            return Ok(found);
        }

        match self.fetch(ctx, phemex_symbol, OrderRef::ClientOrderId(client_order_id)).await? {
            Some(found) => Ok(found),
            None => {
                self.wait_warmup(ctx).await?;
                self.cached(|cache| cache.get_by_client_order_id(&key), true)?
                    .ok_or_else(|| cleared(client_order_id))
            }
        }
    }

    /// Open orders of every symbol.
    pub async fn get_open_orders(&self, ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>> {
        let orders = self.api.open_orders(ctx, None).await.context("error phemex get open orders")?;
        details(&orders)
    }

    /// One order when an id is given, otherwise the symbol's closed orders.
    pub async fn get_history_orders(
        &self,
        ctx: &CancellationToken,
        phemex_symbol: &str,
        order_id: Option<&str>,
        client_order_id: Option<&str>,
    ) -> Result<Vec<OrderDetailInfo>> {
        let selector = order_id
            .map(OrderRef::OrderId)
            .or_else(|| client_order_id.map(OrderRef::ClientOrderId));
        let orders = match selector {
            Some(selector) => self.api.query_order(ctx, phemex_symbol, selector).await,
            None => self.api.closed_orders(ctx, phemex_symbol).await,
        }
        .context("error phemex get history orders")?;
        details(&orders)
    }

    fn cached<L>(&self, lookup: L, finals: bool) -> Result<Option<(OrderInfo, OrderFields)>>
    where
        L: FnOnce(&OrdersCache<OrderFields>) -> Result<Option<&CachedOrder<OrderFields>>>,
    {
        let state = read(&self.state);
        let cache = if finals { state.tracker.finals() } else { state.tracker.all() };
        Ok(lookup(cache)?.map(|cached| (cached.info.clone(), cached.fields.clone())))
    }

    /// `Ok(None)` when Phemex reports the order as purged.
    async fn fetch(
        &self,
        ctx: &CancellationToken,
        phemex_symbol: &str,
        selector: OrderRef<'_>,
    ) -> Result<Option<(OrderInfo, OrderFields)>> {
        let orders = self.api.query_order(ctx, phemex_symbol, selector).await.map_err(|e| {
            if e.api_code() == Some(ORDER_NOT_FOUND_CODE) {
                e.context("unexpected not found error")
            } else {
                e.context("unable to send request")
            }
        })?;

        let order = match orders.as_slice() {
            [] => {
                return Err(ExchangeError::OrderNotFound(format!("{selector:?} on {phemex_symbol}")));
            }
            [order] => order,
            _ => return Err(ExchangeError::InvalidResponse("too many orders in response".to_string())),
        };

        let Some(info) = convert_order(order).context("unable to convert order")? else {
            debug!("🔎 Phemex purged order {}, falling back to stream cache", order.order_id);
            return Ok(None);
        };
        Ok(Some((info, OrderFields::from_response(order)?)))
    }

    /// Sleep until the stream has been subscribed for the warmup period.
    async fn wait_warmup(&self, ctx: &CancellationToken) -> Result<()> {
        let wait = match read(&self.state).subscribed_at {
            Some(at) => {
                let ready_at = at + TimeDelta::from_std(self.warmup).unwrap_or(TimeDelta::zero());
                (ready_at - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
            }
            None => self.warmup,
        };
        if !wait.is_zero() && !sleep_or_cancelled(ctx, wait).await {
            return Err(ExchangeError::Cancelled);
        }
        Ok(())
    }
}

impl Drop for CombinedOrdersFetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record(state: &SharedState, clock: &dyn Clock, update: WsOrderUpdate) {
    let now = clock.now();
    let key = SymbolOrderId::new(update.symbol.clone(), update.info.id.clone());
    let client_key = SymbolClientOrderId::new(update.symbol, update.fields.cl_ord_id.clone());
    let order_id = update.info.id.clone();

    let mut state = write(state);
    let outcome = state.tracker.apply(key, client_key, CachedOrder {
        info: update.info,
        fields: update.fields,
        seen_at: now,
    });
    if outcome == TrackOutcome::IgnoredFinal {
        debug!("⏭️ order {} already final, update ignored", order_id);
    }
    let evicted = state.tracker.evict_expired_if_due(now);
    if evicted > 0 {
        debug!("🧹 evicted {} expired final orders", evicted);
    }
}

fn cleared(id: &str) -> ExchangeError {
    ExchangeError::OrderNotFound(format!("order {id} was cleared")).context("fallback error")
}

fn details(orders: &[OrderResponse]) -> Result<Vec<OrderDetailInfo>> {
    orders.iter().map(order_detail).collect()
}
