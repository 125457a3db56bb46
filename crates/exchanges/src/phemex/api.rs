//! REST seam of the Phemex adapter
//!
//! Everything above this trait (fetcher, gateways, contract) is exercised in tests
//! against in-memory fakes. `PhemexRestClient` is the production implementation;
//! it waits on and corrects the rate limiter itself.

use async_trait::async_trait;

use unitrade_core::CancellationToken;

use crate::errors::Result;

use super::models::{AccountPositionsData, OrderFields, OrderResponse, Product, TickerResult};

/// Order selector for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRef<'a> {
    OrderId(&'a str),
    ClientOrderId(&'a str),
}

#[async_trait(?Send)]
pub trait PhemexApi {
    /// `GET /exchange/order`. Empty when the order is unknown.
    async fn query_order(&self, ctx: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<Vec<OrderResponse>>;

    /// `POST /orders`. Admission bounces come back as `Api` errors with the Phemex code.
    async fn create_order(&self, ctx: &CancellationToken, order: &OrderFields) -> Result<OrderResponse>;

    /// `DELETE /orders/cancel`
    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, order_id: &str) -> Result<OrderResponse>;

    /// `GET /orders/activeList`, every symbol when `symbol` is `None`.
    async fn open_orders(&self, ctx: &CancellationToken, symbol: Option<&str>) -> Result<Vec<OrderResponse>>;

    /// `GET /exchange/order/list`
    async fn closed_orders(&self, ctx: &CancellationToken, symbol: &str) -> Result<Vec<OrderResponse>>;

    /// `GET /public/products`
    async fn products(&self, ctx: &CancellationToken) -> Result<Vec<Product>>;

    /// `GET /md/ticker/24hr`
    async fn ticker(&self, ctx: &CancellationToken, symbol: &str) -> Result<TickerResult>;

    /// `GET /accounts/accountPositions` for one settle currency.
    async fn account_positions(&self, ctx: &CancellationToken, currency: &str) -> Result<AccountPositionsData>;
}
