//! Phemex WebSocket sessions
//!
//! The private AOP (account-order-position) stream needs a `user.auth` call before
//! `aop.subscribe`; the public `market24h` ticker needs only the subscribe. Both
//! calls are answered by a call response carrying the request id. After that the
//! socket is handed to the session pump with the matching decoder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use unitrade_core::{CancellationToken, Fixed};

use crate::errors::{ExchangeError, Result, ResultExt};
use crate::events::EventStream;
use crate::session::{Incoming, Keepalive, TextSocket, spawn_session};
use crate::types::{OrderEventPayload, OrderInfo, PositionPayload};
use crate::websocket::MonoioWebSocket;

use super::auth::PhemexSigner;
use super::models::{OrderFields, WsAopMessage, WsCallResponse, WsMarket24h, WsOrder, convert_order_status};
use super::scales::ScalesService;
use super::{PhemexConfig, to_full_symbol};

pub const AUTH_CALL_ID: i64 = 1;
pub const AOP_CALL_ID: i64 = 232;
pub const MARKET24H_CALL_ID: i64 = 75;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(15);

const PING_MESSAGE: &str = r#"{"id":0,"method":"server.ping","params":[]}"#;

pub fn keepalive() -> Keepalive {
    Keepalive::new(HEARTBEAT_INTERVAL, SESSION_TIMEOUT).with_message(PING_MESSAGE)
}

/// Order state pushed on the private stream.
#[derive(Debug, Clone, PartialEq)]
pub struct WsOrderUpdate {
    pub info: OrderInfo,
    /// Phemex symbol, without the `PHEMEX-` prefix.
    pub symbol: String,
    pub fields: OrderFields,
}

impl WsOrderUpdate {
    pub fn payload(&self) -> OrderEventPayload {
        OrderEventPayload {
            order_id: self.info.id.clone(),
            status: self.info.status,
            symbol: Some(to_full_symbol(&self.symbol)),
        }
    }
}

enum Message {
    Call(WsCallResponse),
    Data(Value),
}

fn classify(text: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ExchangeError::from(e).context("can't unmarshal ws message"))?;

    if let Some(object) = value.as_object() {
        if object.contains_key("error") {
            let has_error = object.get("error").is_some_and(|e| !e.is_null());
            let has_result = object.get("result").is_some_and(|r| !r.is_null());
            if has_error || has_result {
                let response = serde_json::from_value(value)
                    .map_err(|e| ExchangeError::from(e).context("can't unmarshal call response"))?;
                return Ok(Message::Call(response));
            }
        }
    }
    Ok(Message::Data(value))
}

/// `Ok(true)` when `response` answers `call_id`. Error responses fail whatever id they carry.
pub fn check_call_response(call_id: i64, response: &WsCallResponse) -> Result<bool> {
    if let Some(error) = &response.error {
        let status = response
            .result
            .as_ref()
            .and_then(|r| r.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("-");
        return Err(ExchangeError::Api {
            code: error.code,
            msg: format!(
                "came phemex WS error: {} (code={}, id={}, status={})",
                error.message,
                error.code,
                response.id.unwrap_or_default(),
                status
            ),
        });
    }
    Ok(response.id == Some(call_id))
}

fn order_update(order: &WsOrder) -> Result<WsOrderUpdate> {
    let status = convert_order_status(&order.ord_status).context("can't convert status")?;
    Ok(WsOrderUpdate {
        info: OrderInfo {
            id: order.order_id.clone(),
            client_order_id: Some(order.cl_ord_id.clone()),
            status,
        },
        symbol: order.symbol.clone(),
        fields: order.fields()?,
    })
}

fn aop_message(value: Value) -> Result<WsAopMessage> {
    serde_json::from_value(value).map_err(|e| ExchangeError::from(e).context("can't unmarshal aop message"))
}

pub fn decode_orders(text: &str) -> Result<Vec<WsOrderUpdate>> {
    match classify(text)? {
        Message::Call(response) => {
            check_call_response(AOP_CALL_ID, &response)?;
            Ok(Vec::new())
        }
        Message::Data(value) => aop_message(value)?.orders.iter().map(order_update).collect(),
    }
}

/// One batch per message that carries positions.
pub fn decode_positions(text: &str) -> Result<Vec<Vec<PositionPayload>>> {
    let value = match classify(text)? {
        Message::Call(response) => {
            check_call_response(AOP_CALL_ID, &response)?;
            return Ok(Vec::new());
        }
        Message::Data(value) => value,
    };

    let positions = aop_message(value)?
        .positions
        .iter()
        .map(|p| {
            Ok(PositionPayload {
                symbol: to_full_symbol(&p.symbol),
                value: p.signed_size()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(if positions.is_empty() { Vec::new() } else { vec![positions] })
}

/// Close price of `phemex_symbol` when the message is its ticker.
pub fn decode_market24h(text: &str, phemex_symbol: &str, scales: &ScalesService) -> Result<Option<Fixed>> {
    let value = match classify(text)? {
        Message::Call(response) => {
            check_call_response(MARKET24H_CALL_ID, &response)?;
            return Ok(None);
        }
        Message::Data(value) => value,
    };

    let message: WsMarket24h = serde_json::from_value(value)
        .map_err(|e| ExchangeError::from(e).context("came response with empty 'market24h' field"))?;
    if message.market24h.symbol != phemex_symbol {
        return Ok(None);
    }
    let scale = scales.get(phemex_symbol)?;
    Ok(Some(scale.ep_to_price(message.market24h.close_ep)?))
}

/// Send a method call and wait for its response, skipping unrelated messages.
pub async fn call<S: TextSocket>(
    ctx: &CancellationToken,
    socket: &mut S,
    id: i64,
    method: &str,
    params: Value,
) -> Result<()> {
    let request = json!({ "id": id, "method": method, "params": params }).to_string();
    socket.send_text(&request).await?;

    let deadline = Instant::now() + SESSION_TIMEOUT;
    let response = async {
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match socket.receive_text(wait).await? {
                Incoming::Text(text) => {
                    if let Message::Call(response) = classify(&text)? {
                        if check_call_response(id, &response)? {
                            return Ok(());
                        }
                    }
                }
                Incoming::Idle => return Err(ExchangeError::Timeout(format!("no response to {method}"))),
                Incoming::Closed => {
                    return Err(ExchangeError::NetworkError(format!("closed while waiting for {method} response")));
                }
            }
        }
    };

    monoio::select! {
        _ = ctx.cancelled() => Err(ExchangeError::Cancelled),
        r = response => r,
    }
}

/// Opens Phemex WebSocket sessions.
pub struct PhemexStreams {
    ws_url: Url,
    signer: Option<Arc<PhemexSigner>>,
}

impl PhemexStreams {
    pub fn new(config: &PhemexConfig) -> Result<Self> {
        let credentials = config.credentials();
        let signer = if credentials.is_valid() {
            Some(Arc::new(PhemexSigner::new(credentials, config.request_expiry)?))
        } else {
            None
        };
        Ok(Self { ws_url: Url::parse(&config.ws_url)?, signer })
    }

    async fn open_authenticated(&self, ctx: &CancellationToken) -> Result<MonoioWebSocket> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ExchangeError::MissingCredentials("PHEMEX_API_KEY".to_string()))?;

        let mut ws = MonoioWebSocket::connect(&self.ws_url).await?;
        let params = signer.websocket_auth_params(signer.expiry_at(Utc::now().timestamp()))?;
        call(ctx, &mut ws, AUTH_CALL_ID, "user.auth", params).await.context("unable to auth")?;
        debug!("🔐 Phemex WebSocket authenticated");
        Ok(ws)
    }

    async fn open_aop(&self, ctx: &CancellationToken) -> Result<MonoioWebSocket> {
        let mut ws = self.open_authenticated(ctx).await?;
        call(ctx, &mut ws, AOP_CALL_ID, "aop.subscribe", json!([]))
            .await
            .context("can't subscribe to aop")?;
        Ok(ws)
    }

    pub async fn orders(&self, ctx: CancellationToken) -> Result<EventStream<WsOrderUpdate>> {
        let ws = self.open_aop(&ctx).await?;
        info!("📡 Phemex order stream subscribed");
        Ok(spawn_session("phemex orders", ws, ctx, keepalive(), decode_orders))
    }

    /// Status changes only, with prefixed symbols.
    pub async fn order_events(&self, ctx: CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        let ws = self.open_aop(&ctx).await?;
        info!("📡 Phemex order status stream subscribed");
        Ok(spawn_session("phemex order statuses", ws, ctx, keepalive(), |text: &str| {
            Ok(decode_orders(text)?.iter().map(WsOrderUpdate::payload).collect())
        }))
    }

    pub async fn positions(&self, ctx: CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        let ws = self.open_aop(&ctx).await?;
        info!("📡 Phemex position stream subscribed");
        Ok(spawn_session("phemex positions", ws, ctx, keepalive(), decode_positions))
    }

    /// `phemex_symbol` is the bare Phemex symbol.
    pub async fn prices(
        &self,
        ctx: CancellationToken,
        phemex_symbol: String,
        scales: Arc<ScalesService>,
    ) -> Result<EventStream<Fixed>> {
        scales.check_or_update(&ctx).await.context("can't fetch scales")?;

        let mut ws = MonoioWebSocket::connect(&self.ws_url).await?;
        call(&ctx, &mut ws, MARKET24H_CALL_ID, "market24h.subscribe", json!([]))
            .await
            .context("can't subscribe to market24h")?;
        info!("📡 Phemex price stream subscribed for {}", phemex_symbol);

        Ok(spawn_session("phemex prices", ws, ctx, keepalive(), move |text: &str| {
            Ok(decode_market24h(text, &phemex_symbol, &scales)?.into_iter().collect())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::phemex::fake::FakePhemexApi;
    use crate::phemex::scales::SymbolScale;
    use crate::session::tests::ChannelSocket;
    use crate::types::OrderStatus;

    const AOP_ORDERS: &str = r#"{
        "orders": [{
            "orderID": "ab90a08c-b728-4b6b-97c4-36fa497335bf",
            "clOrdID": "RUN1-00aa11bb",
            "symbol": "BTCUSD",
            "side": "Buy",
            "ordType": "Limit",
            "orderQty": 10,
            "priceEp": 93185000,
            "timeInForce": "GoodTillCancel",
            "ordStatus": "PartiallyFilled"
        }],
        "positions": [],
        "sequence": 11450,
        "type": "incremental"
    }"#;

    #[test]
    fn test_decode_orders() {
        let updates = decode_orders(AOP_ORDERS).unwrap();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.info.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.fields.order_qty, 10);
        assert_eq!(update.fields.price_ep, 93_185_000);
        assert_eq!(
            update.payload(),
            OrderEventPayload {
                order_id: "ab90a08c-b728-4b6b-97c4-36fa497335bf".into(),
                status: OrderStatus::PartiallyFilled,
                symbol: Some("PHEMEX-BTCUSD".into()),
            }
        );
    }

    #[test]
    fn test_decode_orders_skips_call_responses() {
        assert!(decode_orders(r#"{"error":null,"id":232,"result":{"status":"success"}}"#).unwrap().is_empty());
        assert!(decode_orders(r#"{"error":null,"id":0,"result":"pong"}"#).unwrap().is_empty());
        assert!(decode_orders(r#"{"accounts":[{"accountBalanceEv":100}]}"#).unwrap().is_empty());
    }

    #[test]
    fn test_decode_orders_unknown_status_fails() {
        let text = AOP_ORDERS.replace("PartiallyFilled", "Deactivated");
        let err = decode_orders(&text).unwrap_err();
        assert!(err.to_string().contains("can't convert status"));
    }

    #[test]
    fn test_ws_error_message() {
        let err = decode_orders(r#"{"error":{"code":6001,"message":"invalid argument"},"id":232,"result":null}"#)
            .unwrap_err();
        assert_eq!(err.api_code(), Some(6001));
        assert!(err.to_string().contains("came phemex WS error: invalid argument (code=6001, id=232, status=-)"));
    }

    #[test]
    fn test_decode_positions_signed() {
        let text = r#"{"positions":[
            {"symbol":"BTCUSD","side":"Sell","size":5},
            {"symbol":"ETHUSD","side":"Buy","size":2}
        ]}"#;
        let batches = decode_positions(text).unwrap();
        assert_eq!(batches, vec![vec![
            PositionPayload { symbol: "PHEMEX-BTCUSD".into(), value: Fixed::from_i64(-5) },
            PositionPayload { symbol: "PHEMEX-ETHUSD".into(), value: Fixed::from_i64(2) },
        ]]);
        assert!(decode_positions(AOP_ORDERS).unwrap().is_empty());
    }

    #[test]
    fn test_decode_market24h() {
        let scales = ScalesService::new(Arc::new(FakePhemexApi::default()), Duration::from_secs(300));
        scales.set_scales(HashMap::from([("BTCUSD".to_string(), SymbolScale { price_scale: 4 })]));

        let btc = r#"{"market24h":{"symbol":"BTCUSD","close":87425000,"open":87000000},"timestamp":1}"#;
        assert_eq!(decode_market24h(btc, "BTCUSD", &scales).unwrap(), Some(Fixed::from_str_exact("8742.5").unwrap()));

        let eth = r#"{"market24h":{"symbol":"ETHUSD","close":2000000}}"#;
        assert_eq!(decode_market24h(eth, "BTCUSD", &scales).unwrap(), None);

        assert!(decode_market24h(r#"{"timestamp":1}"#, "BTCUSD", &scales).is_err());
        assert!(decode_market24h("not json", "BTCUSD", &scales).is_err());
    }

    #[monoio::test(enable_timer = true)]
    async fn test_call_waits_for_its_id() {
        let (tx, mut socket) = ChannelSocket::new();
        let sent = socket.sent.clone();
        tx.send(Ok(r#"{"error":null,"id":0,"result":"pong"}"#.into())).unwrap();
        tx.send(Ok(r#"{"market24h":{"symbol":"BTCUSD","close":1}}"#.into())).unwrap();
        tx.send(Ok(r#"{"error":null,"id":75,"result":{"status":"success"}}"#.into())).unwrap();

        call(&CancellationToken::new(), &mut socket, 75, "market24h.subscribe", json!([]))
            .await
            .unwrap();
        let request: Value = serde_json::from_str(&sent.borrow()[0]).unwrap();
        assert_eq!(request, json!({"id": 75, "method": "market24h.subscribe", "params": []}));
    }

    #[monoio::test(enable_timer = true)]
    async fn test_call_fails_on_error_or_close() {
        let (tx, mut socket) = ChannelSocket::new();
        tx.send(Ok(r#"{"error":{"code":10500,"message":"auth failed"},"id":1,"result":null}"#.into()))
            .unwrap();
        let err = call(&CancellationToken::new(), &mut socket, AUTH_CALL_ID, "user.auth", json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.api_code(), Some(10500));

        drop(tx);
        let err = call(&CancellationToken::new(), &mut socket, AUTH_CALL_ID, "user.auth", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::NetworkError(_)));
    }

    #[test]
    fn test_streams_without_credentials() {
        let streams = PhemexStreams::new(&PhemexConfig::default()).unwrap();
        assert!(streams.signer.is_none());
    }
}
