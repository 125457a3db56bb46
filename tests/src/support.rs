//! Scripted `Exchange` shared by the integration tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use unitrade_core::{CancellationToken, DelayType, Fixed, RetryPolicy};
use unitrade_exchanges::prelude::*;

/// Retry policy that does not slow tests down.
pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::default_call()
        .with_max_attempts(Some(attempts))
        .with_delay(Duration::from_millis(1), DelayType::Fixed)
        .with_max_jitter(Duration::ZERO)
}

pub fn network_error() -> ExchangeError {
    ExchangeError::NetworkError("connection reset by peer".to_string())
}

/// Answers come from per-operation queues; an exhausted queue answers with a
/// network error. Price streams are handed out from `price_streams` in order.
#[derive(Default)]
pub struct ScriptedExchange {
    pub place_results: RefCell<VecDeque<Result<String>>>,
    pub cancel_results: RefCell<VecDeque<Result<()>>>,
    pub price_results: RefCell<VecDeque<Result<Fixed>>>,
    pub price_streams: RefCell<VecDeque<Result<EventStream<Fixed>>>>,
    /// `is_retry` flag of every placement attempt.
    pub place_flags: RefCell<Vec<bool>>,
    pub cancel_calls: RefCell<Vec<String>>,
    pub price_connects: Cell<u32>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_place(self, result: Result<String>) -> Self {
        self.place_results.borrow_mut().push_back(result);
        self
    }

    pub fn on_cancel(self, result: Result<()>) -> Self {
        self.cancel_results.borrow_mut().push_back(result);
        self
    }

    pub fn on_price(self, result: Result<Fixed>) -> Self {
        self.price_results.borrow_mut().push_back(result);
        self
    }

    pub fn on_price_stream(self, result: Result<EventStream<Fixed>>) -> Self {
        self.price_streams.borrow_mut().push_back(result);
        self
    }
}

fn next<T>(queue: &RefCell<VecDeque<Result<T>>>) -> Result<T> {
    queue.borrow_mut().pop_front().unwrap_or_else(|| Err(network_error()))
}

#[async_trait(?Send)]
impl Exchange for ScriptedExchange {
    fn prefix(&self) -> &str {
        "TEST-"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    async fn round_price(
        &self,
        _ctx: &CancellationToken,
        _symbol: &str,
        price: Fixed,
        _tick_size: Option<&str>,
    ) -> Result<Fixed> {
        Ok(price.floor_dp(2))
    }

    async fn round_quantity(&self, _ctx: &CancellationToken, _symbol: &str, quantity: Fixed) -> Result<Fixed> {
        Ok(quantity.floor_dp(4))
    }

    async fn place_order(&self, _ctx: &CancellationToken, is_retry: bool, _order: &NewOrder) -> Result<String> {
        self.place_flags.borrow_mut().push(is_retry);
        next(&self.place_results)
    }

    async fn cancel_order(&self, _ctx: &CancellationToken, _symbol: &str, id: &str) -> Result<()> {
        self.cancel_calls.borrow_mut().push(id.to_string());
        next(&self.cancel_results)
    }

    async fn release_order(&self, _ctx: &CancellationToken, _symbol: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_price(&self, _ctx: &CancellationToken, _symbol: &str) -> Result<Fixed> {
        next(&self.price_results)
    }

    async fn get_order_info(
        &self,
        _ctx: &CancellationToken,
        _symbol: &str,
        id: &str,
        _created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        Err(ExchangeError::OrderNotFound(id.to_string()))
    }

    async fn get_order_info_by_client_order_id(
        &self,
        _ctx: &CancellationToken,
        _symbol: &str,
        client_order_id: &str,
        _created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        Err(ExchangeError::OrderNotFound(client_order_id.to_string()))
    }

    async fn get_tradable_symbols(&self, _ctx: &CancellationToken) -> Result<Vec<SymbolInfo>> {
        Ok(Vec::new())
    }

    async fn watch_orders_statuses(&self, _ctx: &CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        Err(ExchangeError::UnsupportedMethod("watch_orders_statuses".to_string()))
    }

    async fn watch_symbol_price(&self, _ctx: &CancellationToken, _symbol: &str) -> Result<EventStream<Fixed>> {
        self.price_connects.set(self.price_connects.get() + 1);
        next(&self.price_streams)
    }

    async fn watch_account_positions(&self, _ctx: &CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        Err(ExchangeError::UnsupportedMethod("watch_account_positions".to_string()))
    }

    async fn get_open_orders(&self, _ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>> {
        Ok(Vec::new())
    }

    async fn get_orders(&self, _ctx: &CancellationToken, _filter: &OrderFilter) -> Result<Vec<OrderDetailInfo>> {
        Ok(Vec::new())
    }

    async fn get_account(&self, _ctx: &CancellationToken) -> Result<Account> {
        Ok(Account::default())
    }

    fn generate_client_order_id(&self, identifier: &str) -> Result<String> {
        Ok(unitrade_core::generate_client_order_id(identifier))
    }
}
