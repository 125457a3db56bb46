//! Scripted in-memory `PhemexApi` for unit tests

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use unitrade_core::CancellationToken;

use crate::errors::{ExchangeError, Result};

use super::api::{OrderRef, PhemexApi};
use super::models::{AccountPositionsData, OrderFields, OrderResponse, PositionRecord, Product, TickerResult};

#[derive(Default)]
pub struct FakePhemexApi {
    pub query_results: RefCell<VecDeque<Result<Vec<OrderResponse>>>>,
    pub create_results: RefCell<VecDeque<Result<OrderResponse>>>,
    pub cancel_results: RefCell<VecDeque<Result<OrderResponse>>>,
    pub open_orders: RefCell<Vec<OrderResponse>>,
    pub closed_orders: RefCell<Vec<OrderResponse>>,
    pub products: RefCell<Vec<Product>>,
    pub ticker: RefCell<Option<TickerResult>>,
    pub positions: RefCell<HashMap<String, Vec<PositionRecord>>>,
    /// One line per call, `method:argument`.
    pub calls: RefCell<Vec<String>>,
    pub created: RefCell<Vec<OrderFields>>,
}

impl FakePhemexApi {
    pub fn push_query(&self, result: Result<Vec<OrderResponse>>) {
        self.query_results.borrow_mut().push_back(result);
    }

    pub fn push_create(&self, result: Result<OrderResponse>) {
        self.create_results.borrow_mut().push_back(result);
    }

    pub fn push_cancel(&self, result: Result<OrderResponse>) {
        self.cancel_results.borrow_mut().push_back(result);
    }

    pub fn calls_of(&self, method: &str) -> usize {
        let prefix = format!("{method}:");
        self.calls.borrow().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn record(&self, method: &str, argument: &str) {
        self.calls.borrow_mut().push(format!("{method}:{argument}"));
    }
}

fn exhausted<T>(method: &str) -> Result<T> {
    Err(ExchangeError::NetworkError(format!("no scripted {method} result")))
}

#[async_trait(?Send)]
impl PhemexApi for FakePhemexApi {
    async fn query_order(&self, _: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<Vec<OrderResponse>> {
        let id = match order {
            OrderRef::OrderId(id) | OrderRef::ClientOrderId(id) => id,
        };
        self.record("query_order", &format!("{symbol}/{id}"));
        self.query_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("query_order"))
    }

    async fn create_order(&self, _: &CancellationToken, order: &OrderFields) -> Result<OrderResponse> {
        self.record("create_order", &order.cl_ord_id);
        self.created.borrow_mut().push(order.clone());
        self.create_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("create_order"))
    }

    async fn cancel_order(&self, _: &CancellationToken, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        self.record("cancel_order", &format!("{symbol}/{order_id}"));
        self.cancel_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("cancel_order"))
    }

    async fn open_orders(&self, _: &CancellationToken, symbol: Option<&str>) -> Result<Vec<OrderResponse>> {
        self.record("open_orders", symbol.unwrap_or("*"));
        Ok(self
            .open_orders
            .borrow()
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn closed_orders(&self, _: &CancellationToken, symbol: &str) -> Result<Vec<OrderResponse>> {
        self.record("closed_orders", symbol);
        Ok(self.closed_orders.borrow().iter().filter(|o| o.symbol == symbol).cloned().collect())
    }

    async fn products(&self, _: &CancellationToken) -> Result<Vec<Product>> {
        self.record("products", "");
        Ok(self.products.borrow().clone())
    }

    async fn ticker(&self, _: &CancellationToken, symbol: &str) -> Result<TickerResult> {
        self.record("ticker", symbol);
        self.ticker.borrow().clone().ok_or_else(|| ExchangeError::InvalidResponse(format!("no ticker for {symbol}")))
    }

    async fn account_positions(&self, _: &CancellationToken, currency: &str) -> Result<AccountPositionsData> {
        self.record("account_positions", currency);
        Ok(AccountPositionsData {
            positions: self.positions.borrow().get(currency).cloned().unwrap_or_default(),
        })
    }
}

/// Limit order response as Phemex returns it from lookups.
pub fn order_response(order_id: &str, cl_ord_id: &str, status: &str) -> OrderResponse {
    OrderResponse {
        order_id: order_id.to_string(),
        cl_ord_id: cl_ord_id.to_string(),
        symbol: "BTCUSD".to_string(),
        side: "Buy".to_string(),
        action_time_ns: 1_700_000_000_000_000_000,
        ord_type: Some("Limit".to_string()),
        price_ep: 300_000_000,
        price: Some(30_000.0),
        order_qty: 10.0,
        time_in_force: "GoodTillCancel".to_string(),
        ord_status: status.to_string(),
        ..Default::default()
    }
}

pub fn perpetual(symbol: &str, price_scale: i64) -> Product {
    Product {
        symbol: symbol.to_string(),
        product_type: "Perpetual".to_string(),
        display_symbol: format!("{} / USD", symbol.trim_end_matches("USD")),
        settle_currency: "BTC".to_string(),
        price_scale,
        status: "Listed".to_string(),
        ..Default::default()
    }
}
