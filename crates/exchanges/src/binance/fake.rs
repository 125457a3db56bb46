//! Scripted in-memory `BinanceApi` for unit tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use async_trait::async_trait;

use unitrade_core::CancellationToken;

use crate::errors::{ExchangeError, Result};

use super::api::{BinanceApi, OrderRef};
use super::models::{AccountData, BinanceOrder, ExchangeInfo, OrderFields, PriceStats};

#[derive(Default)]
pub struct FakeBinanceApi {
    pub get_results: RefCell<VecDeque<Result<BinanceOrder>>>,
    pub create_results: RefCell<VecDeque<Result<BinanceOrder>>>,
    pub cancel_results: RefCell<VecDeque<Result<BinanceOrder>>>,
    pub open_orders: RefCell<Vec<BinanceOrder>>,
    pub all_orders: RefCell<Vec<BinanceOrder>>,
    pub exchange_info: RefCell<ExchangeInfo>,
    pub ticker: RefCell<Option<PriceStats>>,
    pub account: RefCell<AccountData>,
    pub fail_listen_key: Cell<bool>,
    pub fail_keepalive: Cell<bool>,
    /// One line per call, `method:argument`.
    pub calls: RefCell<Vec<String>>,
    pub created: RefCell<Vec<OrderFields>>,
}

impl FakeBinanceApi {
    pub fn push_get(&self, result: Result<BinanceOrder>) {
        self.get_results.borrow_mut().push_back(result);
    }

    pub fn push_create(&self, result: Result<BinanceOrder>) {
        self.create_results.borrow_mut().push_back(result);
    }

    pub fn push_cancel(&self, result: Result<BinanceOrder>) {
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
impl BinanceApi for FakeBinanceApi {
    async fn get_order(&self, _: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<BinanceOrder> {
        let id = match order {
            OrderRef::OrderId(id) | OrderRef::ClientOrderId(id) => id,
        };
        self.record("get_order", &format!("{symbol}/{id}"));
        self.get_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("get_order"))
    }

    async fn create_order(&self, _: &CancellationToken, order: &OrderFields) -> Result<BinanceOrder> {
        self.record("create_order", &order.new_client_order_id);
        self.created.borrow_mut().push(order.clone());
        self.create_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("create_order"))
    }

    async fn cancel_order(&self, _: &CancellationToken, symbol: &str, client_order_id: &str) -> Result<BinanceOrder> {
        self.record("cancel_order", &format!("{symbol}/{client_order_id}"));
        self.cancel_results.borrow_mut().pop_front().unwrap_or_else(|| exhausted("cancel_order"))
    }

    async fn open_orders(&self, _: &CancellationToken, symbol: Option<&str>) -> Result<Vec<BinanceOrder>> {
        self.record("open_orders", symbol.unwrap_or("*"));
        Ok(self
            .open_orders
            .borrow()
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn all_orders(&self, _: &CancellationToken, symbol: &str) -> Result<Vec<BinanceOrder>> {
        self.record("all_orders", symbol);
        Ok(self.all_orders.borrow().iter().filter(|o| o.symbol == symbol).cloned().collect())
    }

    async fn exchange_info(&self, _: &CancellationToken) -> Result<ExchangeInfo> {
        self.record("exchange_info", "");
        Ok(self.exchange_info.borrow().clone())
    }

    async fn ticker(&self, _: &CancellationToken, symbol: &str) -> Result<Option<PriceStats>> {
        self.record("ticker", symbol);
        Ok(self.ticker.borrow().clone())
    }

    async fn account(&self, _: &CancellationToken) -> Result<AccountData> {
        self.record("account", "");
        Ok(self.account.borrow().clone())
    }

    async fn start_user_stream(&self, _: &CancellationToken) -> Result<String> {
        self.record("start_user_stream", "");
        if self.fail_listen_key.get() {
            return Err(ExchangeError::Api {
                code: -2015,
                msg: "Invalid API-key, IP, or permissions for action.".into(),
            });
        }
        Ok("pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1".to_string())
    }

    async fn keepalive_user_stream(&self, _: &CancellationToken, listen_key: &str) -> Result<()> {
        self.record("keepalive_user_stream", listen_key);
        if self.fail_keepalive.get() {
            return Err(ExchangeError::Api { code: -1125, msg: "This listenKey does not exist.".into() });
        }
        Ok(())
    }
}

/// Order as `GET order` reports it.
pub fn binance_order(client_order_id: &str, status: &str) -> BinanceOrder {
    BinanceOrder {
        symbol: "BTCUSDT".to_string(),
        order_id: 4_293_153,
        client_order_id: client_order_id.to_string(),
        price: "30000.00000000".to_string(),
        orig_qty: "0.01000000".to_string(),
        executed_qty: "0.00000000".to_string(),
        cummulative_quote_qty: "0.00000000".to_string(),
        status: status.to_string(),
        time_in_force: "GTC".to_string(),
        order_type: "LIMIT".to_string(),
        side: "BUY".to_string(),
        stop_price: "0.00000000".to_string(),
        time: 1_700_000_000_000,
    }
}

/// Placement ACK: identifiers only.
pub fn ack(client_order_id: &str) -> BinanceOrder {
    BinanceOrder {
        symbol: "BTCUSDT".to_string(),
        order_id: 4_293_153,
        client_order_id: client_order_id.to_string(),
        ..Default::default()
    }
}

pub fn api_error(code: i64, msg: &str) -> ExchangeError {
    ExchangeError::Api { code, msg: msg.to_string() }
}
