//! Binance spot, Binance US and USDⓈ-M futures adapter
//!
//! All flavors share one implementation; `BinanceFlavor` picks the endpoint
//! paths, stream names and link prefix. Binance US is spot over its own hosts. Binance identifies orders by the client
//! order id everywhere in this adapter: the id returned by `place_order` is the
//! client order id that was sent.
//!
//! - `auth` signs query strings
//! - `models` holds wire shapes and their conversion into the common model
//! - `rest` is the HTTPS client behind the `BinanceApi` seam
//! - `user_stream` manages listen keys and decodes user data and ticker streams
//! - `exchange` implements `Exchange`

pub mod api;
pub mod auth;
pub mod exchange;
pub mod models;
pub mod rest;
pub mod user_stream;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use unitrade_core::id_gen::{BINANCE_FUTURES_LINK_PREFIX, BINANCE_SPOT_LINK_PREFIX};

use crate::errors::{ExchangeError, Result};

pub use api::{BinanceApi, OrderRef};
pub use auth::{BinanceCredentials, BinanceSigner};
pub use exchange::BinanceExchange;
pub use models::{BinanceOrder, OrderFields};
pub use rest::BinanceRestClient;
pub use user_stream::BinanceStreams;

pub const BINANCE_PREFIX: &str = "BN-";

/// `BN-BTCUSDT` -> `BTCUSDT`
pub fn to_binance_symbol(symbol: &str) -> &str {
    symbol.strip_prefix(BINANCE_PREFIX).unwrap_or(symbol)
}

/// `BTCUSDT` -> `BN-BTCUSDT`
pub fn to_full_symbol(binance_symbol: &str) -> String {
    format!("{BINANCE_PREFIX}{binance_symbol}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinanceFlavor {
    Spot,
    /// Spot semantics on the binance.us hosts, without a link prefix.
    Us,
    Futures,
}

/// REST endpoints used by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Order,
    OpenOrders,
    AllOrders,
    ExchangeInfo,
    Ticker24h,
    Account,
    ListenKey,
}

impl BinanceFlavor {
    pub fn name(self) -> &'static str {
        match self {
            BinanceFlavor::Spot => "Binance Spot",
            BinanceFlavor::Us => "Binance US",
            BinanceFlavor::Futures => "Binance Futures",
        }
    }

    /// Spot order types, balances and `/api/v3` paths.
    pub fn is_spot(self) -> bool {
        !matches!(self, BinanceFlavor::Futures)
    }

    /// Broker link prefix of client order ids. Binance US takes plain ids.
    pub fn link_prefix(self) -> &'static str {
        match self {
            BinanceFlavor::Spot => BINANCE_SPOT_LINK_PREFIX,
            BinanceFlavor::Us => "",
            BinanceFlavor::Futures => BINANCE_FUTURES_LINK_PREFIX,
        }
    }

    pub fn path(self, endpoint: Endpoint) -> &'static str {
        match (self, endpoint) {
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::Order) => "/api/v3/order",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::OpenOrders) => "/api/v3/openOrders",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::AllOrders) => "/api/v3/allOrders",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::ExchangeInfo) => "/api/v3/exchangeInfo",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::Ticker24h) => "/api/v3/ticker/24hr",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::Account) => "/api/v3/account",
            (BinanceFlavor::Spot | BinanceFlavor::Us, Endpoint::ListenKey) => "/api/v3/userDataStream",
            (BinanceFlavor::Futures, Endpoint::Order) => "/fapi/v1/order",
            (BinanceFlavor::Futures, Endpoint::OpenOrders) => "/fapi/v1/openOrders",
            (BinanceFlavor::Futures, Endpoint::AllOrders) => "/fapi/v1/allOrders",
            (BinanceFlavor::Futures, Endpoint::ExchangeInfo) => "/fapi/v1/exchangeInfo",
            (BinanceFlavor::Futures, Endpoint::Ticker24h) => "/fapi/v1/ticker/24hr",
            (BinanceFlavor::Futures, Endpoint::Account) => "/fapi/v2/account",
            (BinanceFlavor::Futures, Endpoint::ListenKey) => "/fapi/v1/listenKey",
        }
    }

    /// All-market ticker stream carrying last prices.
    pub fn ticker_stream(self) -> &'static str {
        match self {
            BinanceFlavor::Spot => "!miniTicker@arr",
            BinanceFlavor::Us | BinanceFlavor::Futures => "!ticker@arr",
        }
    }

    /// User data event type carrying order updates.
    pub fn order_event_type(self) -> &'static str {
        match self {
            BinanceFlavor::Spot | BinanceFlavor::Us => "executionReport",
            BinanceFlavor::Futures => "ORDER_TRADE_UPDATE",
        }
    }

    /// User data event type carrying balances or positions.
    pub fn position_event_type(self) -> &'static str {
        match self {
            BinanceFlavor::Spot | BinanceFlavor::Us => "outboundAccountPosition",
            BinanceFlavor::Futures => "ACCOUNT_UPDATE",
        }
    }
}

/// Binance adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    /// Stream base, without a trailing slash, e.g. `wss://stream.binance.com:9443/ws`.
    pub ws_url: String,
    pub flavor: BinanceFlavor,
    pub testnet: bool,
    /// `recvWindow` of signed requests, in milliseconds.
    pub recv_window: u64,
    pub listen_key_keepalive: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self::spot()
    }
}

impl BinanceConfig {
    pub fn spot() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            flavor: BinanceFlavor::Spot,
            testnet: false,
            recv_window: 5000,
            listen_key_keepalive: Duration::from_secs(20 * 60),
        }
    }

    pub fn futures() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com/ws".to_string(),
            flavor: BinanceFlavor::Futures,
            ..Self::spot()
        }
    }

    pub fn us() -> Self {
        Self {
            base_url: "https://api.binance.us".to_string(),
            ws_url: "wss://stream.binance.us:9443/ws".to_string(),
            flavor: BinanceFlavor::Us,
            ..Self::spot()
        }
    }

    /// Switch to the testnet endpoints of the current flavor. Binance US has no
    /// testnet and keeps its production endpoints.
    pub fn testnet(mut self) -> Self {
        let (base_url, ws_url) = match self.flavor {
            BinanceFlavor::Spot => ("https://testnet.binance.vision", "wss://testnet.binance.vision/ws"),
            BinanceFlavor::Futures => ("https://testnet.binancefuture.com", "wss://stream.binancefuture.com/ws"),
            BinanceFlavor::Us => {
                warn!("⚠️ Binance US has no testnet, keeping {}", self.base_url);
                return self;
            }
        };
        self.base_url = base_url.to_string();
        self.ws_url = ws_url.to_string();
        self.testnet = true;
        self
    }

    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.api_key = api_key;
        self.api_secret = api_secret;
        self
    }

    pub fn with_env_credentials(mut self) -> Result<Self> {
        let credentials = BinanceCredentials::from_env()?;
        self.api_key = credentials.api_key;
        self.api_secret = credentials.secret_key;
        Ok(self)
    }

    pub fn with_recv_window(mut self, recv_window: u64) -> Self {
        self.recv_window = recv_window;
        self
    }

    pub fn with_listen_key_keepalive(mut self, interval: Duration) -> Self {
        self.listen_key_keepalive = interval;
        self
    }

    pub fn credentials(&self) -> BinanceCredentials {
        BinanceCredentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)?;
        url::Url::parse(&self.ws_url)?;
        if self.recv_window == 0 || self.recv_window > 60_000 {
            return Err(ExchangeError::ConfigurationError(format!(
                "recv window must be within 1..=60000 ms, got {}",
                self.recv_window
            )));
        }
        if self.listen_key_keepalive.is_zero() {
            return Err(ExchangeError::ConfigurationError(
                "listen key keepalive interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
