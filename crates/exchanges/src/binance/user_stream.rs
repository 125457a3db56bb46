//! Binance user data and ticker streams
//!
//! A user data stream lives at `{ws_url}/{listenKey}`. The listen key expires
//! unless it is kept alive, so every session started here spawns a keepalive task
//! bound to the session's token. Market prices come from the all-market ticker
//! array, filtered down to one symbol.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use unitrade_core::{CancellationToken, Fixed, sleep_or_cancelled};

use crate::errors::{ExchangeError, Result, ResultExt};
use crate::events::EventStream;
use crate::session::{Keepalive, spawn_session};
use crate::types::{OrderEventPayload, PositionPayload};
use crate::websocket::MonoioWebSocket;

use super::api::BinanceApi;
use super::models::{
    EventHeader, ExecutionReport, FuturesAccountUpdate, FuturesOrderUpdate, OutboundAccountPosition, WsTicker,
    convert_order_status,
};
use super::{BinanceConfig, BinanceFlavor, to_full_symbol};

pub const PING_INTERVAL: Duration = Duration::from_secs(15);
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

pub fn keepalive() -> Keepalive {
    Keepalive::new(PING_INTERVAL, SESSION_TIMEOUT)
}

fn event_type(text: &str, what: &str) -> Result<String> {
    let header: EventHeader = serde_json::from_str(text)
        .map_err(|e| ExchangeError::from(e).context(format!("can't understand type of {what} datastream event")))?;
    Ok(header.event_type)
}

/// Order status changes; other user data events are skipped.
pub fn decode_order_events(flavor: BinanceFlavor, text: &str) -> Result<Vec<OrderEventPayload>> {
    if event_type(text, "user")? != flavor.order_event_type() {
        return Ok(Vec::new());
    }

    let (order_id, status, symbol) = match flavor {
        BinanceFlavor::Spot | BinanceFlavor::Us => {
            let report: ExecutionReport =
                serde_json::from_str(text).map_err(|e| ExchangeError::from(e).context("can't parse OrderEvent"))?;
            (report.order_id().to_string(), report.status, report.symbol)
        }
        BinanceFlavor::Futures => {
            let update: FuturesOrderUpdate =
                serde_json::from_str(text).map_err(|e| ExchangeError::from(e).context("can't parse OrderEvent"))?;
            (update.order.client_order_id, update.order.status, update.order.symbol)
        }
    };

    Ok(vec![OrderEventPayload {
        order_id,
        status: convert_order_status(&status),
        symbol: Some(to_full_symbol(&symbol)),
    }])
}

/// Spot yields free balances per asset; futures yields signed position amounts.
pub fn decode_positions(flavor: BinanceFlavor, text: &str) -> Result<Vec<Vec<PositionPayload>>> {
    if event_type(text, "account update")? != flavor.position_event_type() {
        return Ok(Vec::new());
    }

    let parse_err = |e: serde_json::Error| ExchangeError::from(e).context("can't parse account update");
    let positions = match flavor {
        BinanceFlavor::Spot | BinanceFlavor::Us => {
            let update: OutboundAccountPosition = serde_json::from_str(text).map_err(parse_err)?;
            update.balances.iter().map(|b| b.payload()).collect::<Result<Vec<_>>>()?
        }
        BinanceFlavor::Futures => {
            let update: FuturesAccountUpdate = serde_json::from_str(text).map_err(parse_err)?;
            update.data.positions.iter().map(|p| p.payload()).collect::<Result<Vec<_>>>()?
        }
    };
    Ok(vec![positions])
}

/// Last price of `symbol` when the ticker array carries it.
pub fn decode_ticker(text: &str, symbol: &str) -> Result<Option<Fixed>> {
    let tickers: Vec<WsTicker> =
        serde_json::from_str(text).map_err(|e| ExchangeError::from(e).context("can't unmarshal JSON"))?;
    let Some(ticker) = tickers.iter().find(|t| t.symbol.eq_ignore_ascii_case(symbol)) else {
        return Ok(None);
    };
    let price = Fixed::from_str_exact(&ticker.last_price)
        .map_err(|e| ExchangeError::from(e).context(format!("can't convert price from '{}'", ticker.last_price)))?;
    Ok(Some(price))
}

/// Refresh `listen_key` every `interval` until `token` is cancelled. Failures are
/// logged and retried at the next tick.
pub async fn keep_listen_key_alive(
    api: Arc<dyn BinanceApi>,
    token: CancellationToken,
    listen_key: String,
    interval: Duration,
) {
    while sleep_or_cancelled(&token, interval).await {
        match api.keepalive_user_stream(&token, &listen_key).await {
            Ok(()) => debug!("🔑 Binance listen key refreshed"),
            Err(e) if e.is_cancelled() => break,
            Err(e) => warn!("⚠️ can't keep alive user stream listen key, waiting for next tick: {}", e),
        }
    }
    debug!("🛑 Binance listen key keepalive stopped");
}

/// Opens Binance WebSocket sessions.
pub struct BinanceStreams {
    api: Arc<dyn BinanceApi>,
    ws_url: String,
    flavor: BinanceFlavor,
    listen_key_keepalive: Duration,
}

impl BinanceStreams {
    pub fn new(config: &BinanceConfig, api: Arc<dyn BinanceApi>) -> Result<Self> {
        Url::parse(&config.ws_url)?;
        Ok(Self {
            api,
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            flavor: config.flavor,
            listen_key_keepalive: config.listen_key_keepalive,
        })
    }

    fn stream_url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/{}", self.ws_url, path))?)
    }

    /// Take a listen key, keep it alive for the life of `ctx` and connect to it.
    async fn open_user_data(&self, ctx: &CancellationToken) -> Result<MonoioWebSocket> {
        let listen_key = self.api.start_user_stream(ctx).await.context("can't take listen key")?;
        let url = self.stream_url(&listen_key)?;

        let keepalive_token = ctx.child_token();
        monoio::spawn(keep_listen_key_alive(
            self.api.clone(),
            keepalive_token.clone(),
            listen_key,
            self.listen_key_keepalive,
        ));

        MonoioWebSocket::connect(&url).await.map_err(|e| {
            keepalive_token.cancel();
            e.context("can't start websocket")
        })
    }

    pub async fn orders(&self, ctx: CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        let ws = self.open_user_data(&ctx).await?;
        info!("📡 {} order stream connected", self.flavor.name());
        let flavor = self.flavor;
        Ok(spawn_session("binance orders", ws, ctx, keepalive(), move |text: &str| {
            decode_order_events(flavor, text)
        }))
    }

    pub async fn positions(&self, ctx: CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        let ws = self.open_user_data(&ctx).await?;
        info!("📡 {} position stream connected", self.flavor.name());
        let flavor = self.flavor;
        Ok(spawn_session("binance positions", ws, ctx, keepalive(), move |text: &str| {
            decode_positions(flavor, text)
        }))
    }

    /// `binance_symbol` is the bare Binance symbol.
    pub async fn prices(&self, ctx: CancellationToken, binance_symbol: String) -> Result<EventStream<Fixed>> {
        let url = self.stream_url(self.flavor.ticker_stream())?;
        let ws = MonoioWebSocket::connect(&url).await.context("can't start websocket")?;
        info!("📡 {} price stream connected for {}", self.flavor.name(), binance_symbol);

        let symbol = binance_symbol.to_ascii_uppercase();
        Ok(spawn_session("binance prices", ws, ctx, keepalive(), move |text: &str| {
            Ok(decode_ticker(text, &symbol)?.into_iter().collect())
        }))
    }
}
