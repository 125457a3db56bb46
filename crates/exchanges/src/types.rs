//! Common order and account model shared by every adapter
//!
//! Adapters convert exchange-native shapes into these before anything reaches the
//! reconciliation layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use unitrade_core::Fixed;

use crate::errors::{ExchangeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl OrderSide {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(ExchangeError::InvalidResponse(format!("unknown order side: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
    LimitMaker,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    MarketIfTouched,
    LimitIfTouched,
    Pegged,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLossLimit => "STOP_LOSS_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
            OrderType::MarketIfTouched => "MARKET_IF_TOUCHED",
            OrderType::LimitIfTouched => "LIMIT_IF_TOUCHED",
            OrderType::Pegged => "PEGGED",
        }
    }

    /// Accepts both `STOP_LOSS_LIMIT` and `StopLossLimit` spellings.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s.chars().filter(|c| *c != '_').collect::<String>().to_ascii_uppercase();
        let parsed = match normalized.as_str() {
            "LIMIT" => OrderType::Limit,
            "MARKET" => OrderType::Market,
            "LIMITMAKER" => OrderType::LimitMaker,
            "STOPLOSS" | "STOP" => OrderType::StopLoss,
            "STOPLOSSLIMIT" | "STOPLIMIT" => OrderType::StopLossLimit,
            "TAKEPROFIT" => OrderType::TakeProfit,
            "TAKEPROFITLIMIT" => OrderType::TakeProfitLimit,
            "MARKETIFTOUCHED" => OrderType::MarketIfTouched,
            "LIMITIFTOUCHED" => OrderType::LimitIfTouched,
            "PEGGED" => OrderType::Pegged,
            _ => return None,
        };
        Some(parsed)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status. Filled, Canceled, Rejected and Expired are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    Unknown,
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Open,
    Closed,
}

impl OrderStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Binance-style upper snake case names.
    pub fn parse(s: &str) -> Option<Self> {
        let status = match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "PENDING_CANCEL" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Unknown => "Unknown",
            OrderStatus::New => "New",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Canceled => "Canceled",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Expired => "Expired",
            OrderStatus::Open => "Open",
            OrderStatus::Closed => "Closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    #[default]
    GoodTillCanceled,
    ImmediateOrCancel,
    FillOrKill,
    Day,
}

impl TimeInForce {
    pub fn parse(s: &str) -> Option<Self> {
        let tif = match s.to_ascii_uppercase().as_str() {
            "GTC" | "GOOD_TILL_CANCEL" | "GOODTILLCANCEL" => TimeInForce::GoodTillCanceled,
            "IOC" | "IMMEDIATE_OR_CANCEL" | "IMMEDIATEORCANCEL" => TimeInForce::ImmediateOrCancel,
            "FOK" | "FILL_OR_KILL" | "FILLORKILL" => TimeInForce::FillOrKill,
            "DAY" => TimeInForce::Day,
            _ => return None,
        };
        Some(tif)
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::GoodTillCanceled => write!(f, "GTC"),
            TimeInForce::ImmediateOrCancel => write!(f, "IOC"),
            TimeInForce::FillOrKill => write!(f, "FOK"),
            TimeInForce::Day => write!(f, "DAY"),
        }
    }
}

/// Minimal order state returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub id: String,
    pub client_order_id: Option<String>,
    pub status: OrderStatus,
}

impl fmt::Display for OrderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client_order_id {
            Some(cid) => write!(f, "{{ID='{}', Status='{}', ClientOrderID='{}'}}", self.id, self.status, cid),
            None => write!(f, "{{ID='{}', Status='{}', ClientOrderID=nil}}", self.id, self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetailInfo {
    pub symbol: String,
    pub id: String,
    pub client_order_id: Option<String>,
    pub price: Option<Fixed>,
    pub quantity: Option<Fixed>,
    pub executed_qty: Option<Fixed>,
    pub status: OrderStatus,
    pub order_type: Option<OrderType>,
    /// Creation time, milliseconds since epoch.
    pub time: i64,
    pub side: Option<OrderSide>,
    pub time_in_force: Option<TimeInForce>,
    pub stop_price: Option<Fixed>,
    pub quote_quantity: Option<Fixed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// e.g. "PHEMEX-BTCUSD (BTC-Margin)"
    pub display_name: String,
    /// Exchange-native symbol, e.g. "BTCUSD"
    pub original_symbol: String,
    /// Prefixed symbol used across the crate, e.g. "PHEMEX-BTCUSD"
    pub symbol: String,
    pub filters: Vec<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub coin: String,
    pub free: Fixed,
    pub locked: Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AccountPosition {
    pub symbol: String,
    pub unrealized_profit: Option<Fixed>,
    pub leverage: Option<Fixed>,
    pub entry_price: Option<Fixed>,
    pub size: Option<Fixed>,
    pub mark_price: Option<Fixed>,
    pub position_value: Option<Fixed>,
    pub side: String,
    pub cum_realised_pnl: Option<Fixed>,
    pub liq_price: Option<Fixed>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Account {
    pub balances: Vec<AccountBalance>,
    pub positions: Vec<AccountPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderFilter {
    pub symbol: Option<String>,
    pub order_id: Option<String>,
    pub client_order_id: Option<String>,
}

/// Order placement request as callers express it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Fixed,
    pub quantity: Fixed,
    pub client_order_id: String,
    pub order_type: OrderType,
}

impl NewOrder {
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: Fixed,
        quantity: Fixed,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            quantity,
            client_order_id: client_order_id.into(),
            order_type: OrderType::Limit,
        }
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }
}

/// Status change observed on an order stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEventPayload {
    pub order_id: String,
    pub status: OrderStatus,
    pub symbol: Option<String>,
}

impl fmt::Display for OrderEventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{OrderID: {}, OrderStatus: {}", self.order_id, self.status)?;
        if let Some(symbol) = &self.symbol {
            write!(f, ", Symbol: {symbol}")?;
        }
        write!(f, "}}")
    }
}

/// Signed position size for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionPayload {
    pub symbol: String,
    pub value: Fixed,
}

/// Outcome of one order inside a bulk cancel.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCancelResult {
    pub id: String,
    pub error: Option<ExchangeError>,
}
