//! Exchange capability interface
//!
//! Every adapter implements `Exchange`. Symbols are the crate-wide prefixed form
//! (`PHEMEX-BTCUSD`, `BN-BTCUSDT`); adapters strip and restore their prefix.
//! Streams return immediately with a receiver. A stream closes either after a
//! terminal `Disconnected` event or when the passed token is cancelled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use unitrade_core::{CancellationToken, Fixed};

use crate::errors::Result;
use crate::events::EventStream;
use crate::types::*;

#[async_trait(?Send)]
pub trait Exchange {
    /// Symbol prefix, e.g. "PHEMEX-".
    fn prefix(&self) -> &str;

    fn name(&self) -> &str;

    async fn round_price(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        price: Fixed,
        tick_size: Option<&str>,
    ) -> Result<Fixed>;

    async fn round_quantity(&self, ctx: &CancellationToken, symbol: &str, quantity: Fixed) -> Result<Fixed>;

    /// Place an order, returning the id later calls refer to it by. `is_retry` marks a
    /// resubmission of a client order id that may already have landed.
    async fn place_order(&self, ctx: &CancellationToken, is_retry: bool, order: &NewOrder) -> Result<String>;

    async fn place_buy_order(
        &self,
        ctx: &CancellationToken,
        is_retry: bool,
        symbol: &str,
        price: Fixed,
        quantity: Fixed,
        client_order_id: &str,
    ) -> Result<String> {
        let order = NewOrder::limit(symbol, OrderSide::Buy, price, quantity, client_order_id);
        self.place_order(ctx, is_retry, &order).await
    }

    async fn place_sell_order(
        &self,
        ctx: &CancellationToken,
        is_retry: bool,
        symbol: &str,
        price: Fixed,
        quantity: Fixed,
        client_order_id: &str,
    ) -> Result<String> {
        let order = NewOrder::limit(symbol, OrderSide::Sell, price, quantity, client_order_id);
        self.place_order(ctx, is_retry, &order).await
    }

    /// `OrderExecuted` when the order was filled before it could be canceled.
    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()>;

    /// Drop any local bookkeeping for an order the caller is done with.
    async fn release_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()>;

    async fn get_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<Fixed>;

    async fn get_order_info(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo>;

    async fn get_order_info_by_client_order_id(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo>;

    async fn get_tradable_symbols(&self, ctx: &CancellationToken) -> Result<Vec<SymbolInfo>>;

    async fn watch_orders_statuses(&self, ctx: &CancellationToken) -> Result<EventStream<OrderEventPayload>>;

    async fn watch_symbol_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<EventStream<Fixed>>;

    async fn watch_account_positions(&self, ctx: &CancellationToken) -> Result<EventStream<Vec<PositionPayload>>>;

    async fn get_open_orders(&self, ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>>;

    async fn get_orders(&self, ctx: &CancellationToken, filter: &OrderFilter) -> Result<Vec<OrderDetailInfo>>;

    async fn get_account(&self, ctx: &CancellationToken) -> Result<Account>;

    fn generate_client_order_id(&self, identifier: &str) -> Result<String>;
}

/// Cancel many orders of one symbol, reporting the outcome per order.
#[async_trait(?Send)]
pub trait BulkCancelExchange {
    async fn bulk_cancel_orders(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        ids: &[String],
    ) -> Result<Vec<BulkCancelResult>>;
}
