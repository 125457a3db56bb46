//! Phemex wire shapes and their conversion into the common model

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use unitrade_core::Fixed;

use crate::errors::{ExchangeError, Result};
use crate::types::{
    AccountPosition, OrderDetailInfo, OrderInfo, OrderSide, OrderStatus, OrderType, SymbolInfo, TimeInForce,
};

use super::{PHEMEX_PREFIX, to_full_symbol};

/// `OM_ORDER_NOT_FOUND`. In an order's `bizError` it means Phemex already purged it.
pub const ORDER_NOT_FOUND_CODE: i64 = 10002;

pub const PERPETUAL_PRODUCT_TYPE: &str = "Perpetual";
pub const LISTED_PRODUCT_STATUS: &str = "Listed";

/// Admission errors: the order was bounced and never reached the book.
pub fn is_order_rejected_code(code: i64) -> bool {
    matches!(
        code,
        11001..=11015
            | 11032
            | 11053..=11060
            | 11074..=11076
            | 11078
            | 11079
            | 11081
            | 11082
            | 11087..=11094
            | 11096
            | 11100..=11102
            | 11106
            | 11107
            | 11114
            | 11115
            | 11118..=11120
            | 11122..=11124
    )
}

/// `{code, msg, data}` wrapper of signed REST responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Error body; Phemex sends `code` as a number or as a string.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

fn code_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid code {n}"))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid code {s}"))),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!("invalid code {other}"))),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderResponse {
    pub biz_error: i64,
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: String,
    pub action_time_ns: i64,
    pub order_type: Option<String>,
    #[serde(rename = "ordType")]
    pub ord_type: Option<String>,
    pub price_ep: i64,
    pub price: Option<f64>,
    pub order_qty: f64,
    pub time_in_force: String,
    pub closed_size: Option<f64>,
    pub cum_qty: Option<f64>,
    pub ord_status: String,
}

impl OrderResponse {
    /// Phemex names the field `ordType` on some endpoints and `orderType` on others.
    pub fn order_type(&self) -> &str {
        self.ord_type.as_deref().or(self.order_type.as_deref()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrderRows {
    pub rows: Vec<OrderResponse>,
}

/// Immutable placement request. Two requests are the same order only when every
/// field matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderFields {
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    #[serde(rename = "ordType")]
    pub ord_type: String,
    #[serde(rename = "orderQty")]
    pub order_qty: i64,
    #[serde(rename = "priceEp")]
    pub price_ep: i64,
    pub side: String,
    pub symbol: String,
    #[serde(rename = "timeInForce")]
    pub time_in_force: String,
}

impl OrderFields {
    pub fn from_response(order: &OrderResponse) -> Result<Self> {
        Ok(Self {
            cl_ord_id: order.cl_ord_id.clone(),
            ord_type: order.order_type().to_string(),
            order_qty: contracts(order.order_qty)?,
            price_ep: order.price_ep,
            side: order.side.clone(),
            symbol: order.symbol.clone(),
            time_in_force: order.time_in_force.clone(),
        })
    }
}

/// Contract quantities are whole numbers.
fn contracts(qty: f64) -> Result<i64> {
    Ok(Fixed::from_f64(qty)?.to_integer()?)
}

pub fn side_to_phemex(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

pub fn order_type_to_phemex(order_type: OrderType) -> Result<&'static str> {
    let ord_type = match order_type {
        OrderType::Limit => "Limit",
        OrderType::Market => "Market",
        OrderType::StopLoss => "Stop",
        OrderType::StopLossLimit => "StopLimit",
        OrderType::MarketIfTouched => "MarketIfTouched",
        OrderType::LimitIfTouched => "LimitIfTouched",
        OrderType::Pegged => "Pegged",
        other => {
            return Err(ExchangeError::InvalidOrder(format!(
                "order type {other} is not supported by Phemex contracts"
            )));
        }
    };
    Ok(ord_type)
}

pub const GOOD_TILL_CANCEL: &str = "GoodTillCancel";

/// Valid only where the order carries no `bizError`.
pub fn convert_order_status(status: &str) -> Result<OrderStatus> {
    match status {
        // Conditional orders waiting for or being triggered.
        "Untriggered" | "Triggered" => Ok(OrderStatus::Unknown),
        "Rejected" => Ok(OrderStatus::Rejected),
        "New" | "Created" => Ok(OrderStatus::New),
        "PartiallyFilled" => Ok(OrderStatus::PartiallyFilled),
        "Filled" => Ok(OrderStatus::Filled),
        "Canceled" => Ok(OrderStatus::Canceled),
        other => Err(ExchangeError::InvalidResponse(format!("unknown order status = {other}"))),
    }
}

/// `Ok(None)` when Phemex reports the order as purged (`bizError = 10002`).
pub fn convert_order(order: &OrderResponse) -> Result<Option<OrderInfo>> {
    let biz_status = match order.biz_error {
        0 => None,
        ORDER_NOT_FOUND_CODE => return Ok(None),
        code if is_order_rejected_code(code) => Some(OrderStatus::Rejected),
        code => {
            return Err(ExchangeError::InvalidResponse(format!(
                "invalid BizError={code}, orderID={}",
                order.order_id
            ))
            .context("invalid bizError"));
        }
    };

    let status = convert_order_status(&order.ord_status).map_err(|e| e.context("can't convert status"))?;
    if let Some(biz_status) = biz_status {
        if biz_status != status {
            return Err(ExchangeError::InconsistentResponse(format!(
                "unknown statuses (bizStatus={biz_status}, status={status})"
            )));
        }
    }

    Ok(Some(OrderInfo {
        id: order.order_id.clone(),
        client_order_id: Some(order.cl_ord_id.clone()),
        status,
    }))
}

pub fn order_detail(order: &OrderResponse) -> Result<OrderDetailInfo> {
    let status = convert_order_status(&order.ord_status).map_err(|e| e.context("convert order status"))?;
    let decimal = |v: f64| Fixed::from_f64(v).map_err(ExchangeError::from);

    Ok(OrderDetailInfo {
        symbol: to_full_symbol(&order.symbol),
        id: order.order_id.clone(),
        client_order_id: Some(order.cl_ord_id.clone()),
        price: order.price.map(decimal).transpose()?,
        quantity: Some(decimal(order.order_qty)?),
        executed_qty: order.closed_size.or(order.cum_qty).map(decimal).transpose()?,
        status,
        order_type: OrderType::parse(order.order_type()),
        time: order.action_time_ns / 1_000_000,
        side: OrderSide::parse(&order.side).ok(),
        time_in_force: TimeInForce::parse(&order.time_in_force),
        stop_price: None,
        quote_quantity: None,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProductsData {
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Product {
    pub symbol: String,
    #[serde(rename = "type")]
    pub product_type: String,
    pub display_symbol: String,
    pub settle_currency: String,
    pub contract_size: serde_json::Value,
    pub lot_size: serde_json::Value,
    pub tick_size: serde_json::Value,
    pub price_scale: i64,
    pub status: String,
}

impl Product {
    pub fn is_tradable_perpetual(&self) -> bool {
        self.product_type == PERPETUAL_PRODUCT_TYPE && self.status == LISTED_PRODUCT_STATUS
    }

    pub fn to_symbol_info(&self) -> SymbolInfo {
        let display_symbol = format!("{PHEMEX_PREFIX}{}", self.display_symbol.replace(" / ", ""));
        let filters = HashMap::from([
            ("contractSize".to_string(), self.contract_size.clone()),
            ("lotSize".to_string(), self.lot_size.clone()),
            ("tickSize".to_string(), self.tick_size.clone()),
        ]);
        SymbolInfo {
            display_name: format!("{display_symbol} ({}-Margin)", self.settle_currency),
            original_symbol: self.symbol.clone(),
            symbol: to_full_symbol(&self.symbol),
            filters: vec![filters],
        }
    }
}

/// `/md/ticker/24hr` response. Prices are scaled by the symbol's price scale.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    pub result: Option<TickerResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TickerResult {
    pub symbol: String,
    #[serde(rename = "close")]
    pub close_ep: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountPositionsData {
    pub positions: Vec<PositionRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub leverage: Option<f64>,
    pub avg_entry_price: Option<f64>,
    pub un_realised_pos_loss: Option<f64>,
    pub mark_price: Option<f64>,
    pub value: Option<f64>,
    pub cum_realised_pnl: Option<f64>,
    pub liquidation_price: Option<f64>,
}

impl PositionRecord {
    pub fn to_account_position(&self) -> Result<AccountPosition> {
        let decimal = |v: Option<f64>| v.map(Fixed::from_f64).transpose().map_err(ExchangeError::from);
        Ok(AccountPosition {
            symbol: to_full_symbol(&self.symbol),
            unrealized_profit: decimal(self.un_realised_pos_loss)?,
            leverage: decimal(self.leverage)?,
            entry_price: decimal(self.avg_entry_price)?,
            size: Some(Fixed::from_f64(self.size)?),
            mark_price: decimal(self.mark_price)?,
            position_value: decimal(self.value)?,
            side: self.side.clone(),
            cum_realised_pnl: decimal(self.cum_realised_pnl)?,
            liq_price: decimal(self.liquidation_price)?,
            category: "contract".to_string(),
        })
    }
}

/// Account-order-position push of the private stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WsAopMessage {
    pub orders: Vec<WsOrder>,
    pub positions: Vec<WsPosition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsOrder {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "clOrdID")]
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: String,
    pub ord_type: String,
    pub order_qty: f64,
    pub price_ep: i64,
    pub time_in_force: String,
    pub ord_status: String,
}

impl WsOrder {
    pub fn fields(&self) -> Result<OrderFields> {
        Ok(OrderFields {
            cl_ord_id: self.cl_ord_id.clone(),
            ord_type: self.ord_type.clone(),
            order_qty: contracts(self.order_qty)?,
            price_ep: self.price_ep,
            side: self.side.clone(),
            symbol: self.symbol.clone(),
            time_in_force: self.time_in_force.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WsPosition {
    pub symbol: String,
    pub size: f64,
    pub side: String,
}

impl WsPosition {
    /// Size signed by side: shorts are negative.
    pub fn signed_size(&self) -> Result<Fixed> {
        let size = Fixed::from_f64(self.size)?.abs();
        Ok(if self.side == "Sell" { Fixed::ZERO - size } else { size })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsMarket24h {
    pub market24h: TickerResult,
}

/// Reply to a WebSocket method call.
#[derive(Debug, Clone, Deserialize)]
pub struct WsCallResponse {
    pub error: Option<WsCallError>,
    pub id: Option<i64>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsCallError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
