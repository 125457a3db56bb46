//! Retrying decorator for any `Exchange`
//!
//! Request/response calls go through bounded retries with jittered backoff.
//! Cancellation has its own, longer budget and never retries once the order is
//! known to be executed. Placement flips `is_retry` on after the first attempt so
//! the adapter reconciles instead of blindly resubmitting. Streams are not retried
//! here: they are wrapped in an `EventReconnector`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use unitrade_core::{CancellationToken, Fixed, RetryPolicy, retry, retry_all};

use crate::errors::{ExchangeError, Result};
use crate::events::EventStream;
use crate::reconnect::EventReconnector;
use crate::traits::Exchange;
use crate::types::*;

pub struct RetryingExchange<E> {
    target: Arc<E>,
    call_policy: RetryPolicy,
    cancel_policy: RetryPolicy,
    reconnect_policy: RetryPolicy,
}

impl<E: Exchange + 'static> RetryingExchange<E> {
    pub fn new(target: E) -> Self {
        Self::from_shared(Arc::new(target))
    }

    pub fn from_shared(target: Arc<E>) -> Self {
        Self {
            target,
            call_policy: RetryPolicy::default_call(),
            cancel_policy: RetryPolicy::cancel(),
            reconnect_policy: RetryPolicy::reconnect(),
        }
    }

    pub fn with_call_policy(mut self, policy: RetryPolicy) -> Self {
        self.call_policy = policy;
        self
    }

    pub fn with_cancel_policy(mut self, policy: RetryPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn target(&self) -> &Arc<E> {
        &self.target
    }
}

#[async_trait(?Send)]
impl<E: Exchange + 'static> Exchange for RetryingExchange<E> {
    fn prefix(&self) -> &str {
        self.target.prefix()
    }

    fn name(&self) -> &str {
        self.target.name()
    }

    async fn round_price(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        price: Fixed,
        tick_size: Option<&str>,
    ) -> Result<Fixed> {
        retry_all(&self.call_policy, ctx, |_| self.target.round_price(ctx, symbol, price, tick_size))
            .await
            .map_err(ExchangeError::from)
    }

    async fn round_quantity(&self, ctx: &CancellationToken, symbol: &str, quantity: Fixed) -> Result<Fixed> {
        retry_all(&self.call_policy, ctx, |_| self.target.round_quantity(ctx, symbol, quantity))
            .await
            .map_err(ExchangeError::from)
    }

    async fn place_order(&self, ctx: &CancellationToken, is_retry: bool, order: &NewOrder) -> Result<String> {
        retry_all(&self.call_policy, ctx, |attempt| {
            let is_retry = is_retry || attempt > 0;
            if is_retry {
                debug!("🔁 placing {} again with reconciliation", order.client_order_id);
            }
            self.target.place_order(ctx, is_retry, order)
        })
        .await
        .map_err(ExchangeError::from)
    }

    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()> {
        retry(
            &self.cancel_policy,
            ctx,
            |e: &ExchangeError| !e.is_order_executed(),
            |_| self.target.cancel_order(ctx, symbol, id),
        )
        .await
        .map_err(ExchangeError::from)
    }

    async fn release_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()> {
        retry_all(&self.call_policy, ctx, |_| self.target.release_order(ctx, symbol, id))
            .await
            .map_err(ExchangeError::from)
    }

    async fn get_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<Fixed> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_price(ctx, symbol))
            .await
            .map_err(ExchangeError::from)
    }

    async fn get_order_info(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_order_info(ctx, symbol, id, created_at))
            .await
            .map_err(ExchangeError::from)
    }

    async fn get_order_info_by_client_order_id(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        retry_all(&self.call_policy, ctx, |_| {
            self.target
                .get_order_info_by_client_order_id(ctx, symbol, client_order_id, created_at)
        })
        .await
        .map_err(ExchangeError::from)
    }

    async fn get_tradable_symbols(&self, ctx: &CancellationToken) -> Result<Vec<SymbolInfo>> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_tradable_symbols(ctx))
            .await
            .map_err(ExchangeError::from)
    }

    async fn watch_orders_statuses(&self, ctx: &CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        let target = self.target.clone();
        EventReconnector::new(format!("{} orders", self.target.name()), move |token| {
            let target = target.clone();
            async move { target.watch_orders_statuses(&token).await }
        })
        .with_policy(self.reconnect_policy.clone())
        .watch(ctx)
        .await
    }

    async fn watch_symbol_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<EventStream<Fixed>> {
        let target = self.target.clone();
        let symbol = symbol.to_string();
        EventReconnector::new(format!("{} price {}", self.target.name(), symbol), move |token| {
            let target = target.clone();
            let symbol = symbol.clone();
            async move { target.watch_symbol_price(&token, &symbol).await }
        })
        .with_policy(self.reconnect_policy.clone())
        .watch(ctx)
        .await
    }

    async fn watch_account_positions(&self, ctx: &CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        let target = self.target.clone();
        EventReconnector::new(format!("{} positions", self.target.name()), move |token| {
            let target = target.clone();
            async move { target.watch_account_positions(&token).await }
        })
        .with_policy(self.reconnect_policy.clone())
        .watch(ctx)
        .await
    }

    async fn get_open_orders(&self, ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_open_orders(ctx))
            .await
            .map_err(ExchangeError::from)
    }

    async fn get_orders(&self, ctx: &CancellationToken, filter: &OrderFilter) -> Result<Vec<OrderDetailInfo>> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_orders(ctx, filter))
            .await
            .map_err(ExchangeError::from)
    }

    async fn get_account(&self, ctx: &CancellationToken) -> Result<Account> {
        retry_all(&self.call_policy, ctx, |_| self.target.get_account(ctx))
            .await
            .map_err(ExchangeError::from)
    }

    fn generate_client_order_id(&self, identifier: &str) -> Result<String> {
        self.target.generate_client_order_id(identifier)
    }
}
