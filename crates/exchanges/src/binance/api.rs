//! REST seam of the Binance adapter

use async_trait::async_trait;

use unitrade_core::CancellationToken;

use crate::errors::Result;

use super::models::{AccountData, BinanceOrder, ExchangeInfo, OrderFields, PriceStats};

/// Order selector for `GET order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRef<'a> {
    OrderId(&'a str),
    ClientOrderId(&'a str),
}

#[async_trait(?Send)]
pub trait BinanceApi {
    /// `GET order`. Unknown orders come back as `Api { code: -2013 }`.
    async fn get_order(&self, ctx: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<BinanceOrder>;

    async fn create_order(&self, ctx: &CancellationToken, order: &OrderFields) -> Result<BinanceOrder>;

    /// `DELETE order` by client order id.
    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, client_order_id: &str) -> Result<BinanceOrder>;

    /// Every symbol when `symbol` is `None`.
    async fn open_orders(&self, ctx: &CancellationToken, symbol: Option<&str>) -> Result<Vec<BinanceOrder>>;

    async fn all_orders(&self, ctx: &CancellationToken, symbol: &str) -> Result<Vec<BinanceOrder>>;

    async fn exchange_info(&self, ctx: &CancellationToken) -> Result<ExchangeInfo>;

    /// `ticker/24hr` for one symbol, `None` on an empty answer.
    async fn ticker(&self, ctx: &CancellationToken, symbol: &str) -> Result<Option<PriceStats>>;

    async fn account(&self, ctx: &CancellationToken) -> Result<AccountData>;

    /// Create a user data stream, returning its listen key.
    async fn start_user_stream(&self, ctx: &CancellationToken) -> Result<String>;

    async fn keepalive_user_stream(&self, ctx: &CancellationToken, listen_key: &str) -> Result<()>;
}
