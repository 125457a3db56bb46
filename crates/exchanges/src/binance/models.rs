//! Binance wire shapes and their conversion into the common model
//!
//! Binance sends decimals as strings; they are parsed exactly into `Fixed`.
//! User data events use single-letter keys that differ only by case (`c`/`C`,
//! `x`/`X`), which serde keeps apart.

use std::collections::HashMap;

use serde::Deserialize;

use unitrade_core::fixed::precision_from_tick_size;
use unitrade_core::{Fixed, numeric_eq};

use crate::errors::{ExchangeError, Result};
use crate::types::{
    AccountBalance, AccountPosition, OrderDetailInfo, OrderInfo, OrderSide, OrderStatus, OrderType, PositionPayload,
    SymbolInfo, TimeInForce,
};

use super::to_full_symbol;

/// Order placement was refused by the matching engine.
pub const NEW_ORDER_REJECTED_CODE: i64 = -2010;
/// Bad parameter; a rejection only when it is a filter failure.
pub const BAD_PARAMETER_CODE: i64 = -1013;
pub const FILTER_FAILURE_PREFIX: &str = "Filter failure:";
/// `GET order` answer for an order Binance does not know.
pub const NO_SUCH_ORDER_CODE: i64 = -2013;
/// Cancel refused; the order is unknown only with `UNKNOWN_ORDER_MSG`.
pub const CANCEL_REJECTED_CODE: i64 = -2011;
pub const UNKNOWN_ORDER_MSG: &str = "Unknown order sent.";

pub const GOOD_TILL_CANCEL: &str = "GTC";
pub const ACK_RESPONSE: &str = "ACK";

/// Used when a symbol's tick size is not supplied.
pub const DEFAULT_PRECISION: u32 = 8;

fn api_error(err: &ExchangeError) -> Option<(i64, &str)> {
    match err.root() {
        ExchangeError::Api { code, msg } => Some((*code, msg.as_str())),
        _ => None,
    }
}

pub fn is_order_rejected(err: &ExchangeError) -> bool {
    match api_error(err) {
        Some((NEW_ORDER_REJECTED_CODE, _)) => true,
        Some((BAD_PARAMETER_CODE, msg)) => msg.starts_with(FILTER_FAILURE_PREFIX),
        _ => false,
    }
}

pub fn is_lookup_not_found(err: &ExchangeError) -> bool {
    matches!(api_error(err), Some((NO_SUCH_ORDER_CODE, _)))
}

pub fn is_cancel_not_found(err: &ExchangeError) -> bool {
    matches!(api_error(err), Some((CANCEL_REJECTED_CODE, UNKNOWN_ORDER_MSG)))
}

/// Error body of every failed REST call.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// Order as `GET order`, `openOrders`, `allOrders` and placement report it.
/// The placement ACK carries only the identifiers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    #[serde(alias = "cumQuote")]
    pub cummulative_quote_qty: String,
    pub status: String,
    pub time_in_force: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub stop_price: String,
    pub time: i64,
}

/// Unknown statuses are kept as `Unknown` rather than failing the caller.
pub fn convert_order_status(status: &str) -> OrderStatus {
    OrderStatus::parse(status).unwrap_or(OrderStatus::Unknown)
}

impl BinanceOrder {
    pub fn info(&self) -> OrderInfo {
        OrderInfo {
            id: self.client_order_id.clone(),
            client_order_id: Some(self.client_order_id.clone()),
            status: convert_order_status(&self.status),
        }
    }
}

fn optional_decimal(value: &str) -> Result<Option<Fixed>> {
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(Fixed::from_str_exact(value)?))
}

pub fn order_detail(order: &BinanceOrder) -> Result<OrderDetailInfo> {
    Ok(OrderDetailInfo {
        symbol: to_full_symbol(&order.symbol),
        id: order.client_order_id.clone(),
        client_order_id: Some(order.client_order_id.clone()),
        price: optional_decimal(&order.price)?,
        quantity: optional_decimal(&order.orig_qty)?,
        executed_qty: optional_decimal(&order.executed_qty)?,
        status: convert_order_status(&order.status),
        order_type: OrderType::parse(&order.order_type),
        time: order.time,
        side: OrderSide::parse(&order.side).ok(),
        time_in_force: TimeInForce::parse(&order.time_in_force),
        stop_price: optional_decimal(&order.stop_price)?,
        quote_quantity: optional_decimal(&order.cummulative_quote_qty)?,
    })
}

/// Immutable placement request. Quantity and price compare by numeric value,
/// the response type does not take part in the comparison.
#[derive(Debug, Clone)]
pub struct OrderFields {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub time_in_force: String,
    pub quantity: String,
    pub price: String,
    pub new_client_order_id: String,
    pub new_order_resp_type: String,
}

impl PartialEq for OrderFields {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.side == other.side
            && self.order_type == other.order_type
            && self.time_in_force == other.time_in_force
            && numeric_eq(&self.quantity, &other.quantity)
            && numeric_eq(&self.price, &other.price)
            && self.new_client_order_id == other.new_client_order_id
    }
}

impl OrderFields {
    /// Re-express a placed order as the request that would have produced it.
    pub fn from_order(order: &BinanceOrder) -> Self {
        Self {
            symbol: order.symbol.clone(),
            side: order.side.clone(),
            order_type: order.order_type.clone(),
            time_in_force: order.time_in_force.clone(),
            quantity: order.orig_qty.clone(),
            price: order.price.clone(),
            new_client_order_id: order.client_order_id.clone(),
            new_order_resp_type: ACK_RESPONSE.to_string(),
        }
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market.as_str()
    }

    /// Query parameters of `POST order`. Market orders carry neither price nor time in force.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.clone()),
            ("type", self.order_type.clone()),
        ];
        if !self.is_market() {
            params.push(("timeInForce", self.time_in_force.clone()));
        }
        params.push(("quantity", self.quantity.clone()));
        if !self.is_market() {
            params.push(("price", self.price.clone()));
        }
        params.push(("newClientOrderId", self.new_client_order_id.clone()));
        params.push(("newOrderRespType", self.new_order_resp_type.clone()));
        params
    }
}

/// Floor `value` to the precision implied by `tick_size`, or to `DEFAULT_PRECISION`.
pub fn floor_to_precision(value: Fixed, tick_size: Option<&str>, what: &str) -> Result<Fixed> {
    if value.is_negative() {
        return Err(ExchangeError::InvalidOrder(format!("invalid {what} {value}")));
    }
    let precision = tick_size.and_then(precision_from_tick_size).unwrap_or(DEFAULT_PRECISION);
    Ok(value.floor_dp(precision))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExchangeInfo {
    pub symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub status: String,
    /// Spot only.
    pub is_spot_trading_allowed: Option<bool>,
    pub filters: Vec<HashMap<String, serde_json::Value>>,
}

impl ExchangeSymbol {
    pub fn to_symbol_info(&self) -> SymbolInfo {
        let symbol = to_full_symbol(&self.symbol);
        SymbolInfo {
            display_name: symbol.clone(),
            original_symbol: self.symbol.clone(),
            symbol,
            filters: self.filters.clone(),
        }
    }
}

/// `ticker/24hr` for one symbol.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceStats {
    pub symbol: String,
    pub last_price: String,
}

/// Spot accounts fill `balances`, futures accounts fill `positions`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountData {
    pub balances: Vec<BalanceRecord>,
    pub positions: Vec<FuturesPositionRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BalanceRecord {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

impl BalanceRecord {
    pub fn to_balance(&self) -> Result<AccountBalance> {
        Ok(AccountBalance {
            coin: self.asset.clone(),
            free: Fixed::from_str_exact(&self.free)?,
            locked: Fixed::from_str_exact(&self.locked)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FuturesPositionRecord {
    pub symbol: String,
    pub unrealized_profit: String,
    pub leverage: String,
    pub entry_price: String,
    pub position_amt: String,
    pub position_side: String,
}

impl FuturesPositionRecord {
    pub fn to_account_position(&self) -> Result<AccountPosition> {
        Ok(AccountPosition {
            symbol: to_full_symbol(&self.symbol),
            unrealized_profit: optional_decimal(&self.unrealized_profit)?,
            leverage: optional_decimal(&self.leverage)?,
            entry_price: optional_decimal(&self.entry_price)?,
            size: optional_decimal(&self.position_amt)?,
            side: self.position_side.clone(),
            category: "futures".to_string(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

/// Common part of every user data event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    #[serde(rename = "e")]
    pub event_type: String,
}

/// Spot `executionReport`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    /// Set on cancellations: the id of the order being canceled.
    #[serde(rename = "C", default)]
    pub original_client_order_id: Option<String>,
    #[serde(rename = "X")]
    pub status: String,
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        match self.original_client_order_id.as_deref() {
            Some(original) if !original.is_empty() => original,
            _ => &self.client_order_id,
        }
    }
}

/// Futures `ORDER_TRADE_UPDATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesOrderUpdate {
    #[serde(rename = "o")]
    pub order: FuturesOrderData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuturesOrderData {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "X")]
    pub status: String,
}

/// Spot `outboundAccountPosition`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboundAccountPosition {
    #[serde(rename = "B", default)]
    pub balances: Vec<WsBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: String,
    #[serde(rename = "l", default)]
    pub locked: String,
}

impl WsBalance {
    /// Free balance keyed by the bare asset name.
    pub fn payload(&self) -> Result<PositionPayload> {
        Ok(PositionPayload {
            symbol: self.asset.clone(),
            value: Fixed::from_str_exact(&self.free)
                .map_err(|e| ExchangeError::from(e).context("can't generate free balance"))?,
        })
    }
}

/// Futures `ACCOUNT_UPDATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct FuturesAccountUpdate {
    #[serde(rename = "a")]
    pub data: FuturesAccountData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuturesAccountData {
    #[serde(rename = "P", default)]
    pub positions: Vec<WsFuturesPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsFuturesPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    /// Signed position amount.
    #[serde(rename = "pa")]
    pub amount: String,
}

impl WsFuturesPosition {
    pub fn payload(&self) -> Result<PositionPayload> {
        Ok(PositionPayload {
            symbol: to_full_symbol(&self.symbol),
            value: Fixed::from_str_exact(&self.amount)?,
        })
    }
}

/// One entry of the all-market ticker arrays.
#[derive(Debug, Clone, Deserialize)]
pub struct WsTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
}
