//! Phemex contract (inverse and linear perpetual) adapter
//!
//! Layout:
//! - `auth` signs REST requests and the WebSocket login
//! - `rate_limit` keeps one minute budget per Phemex rate-limit group
//! - `models` holds wire shapes and their conversion into the common model
//! - `rest` is the HTTPS client behind the `PhemexApi` seam
//! - `scales` refreshes per-symbol price scales in the background
//! - `stream` runs the authenticated AOP and public ticker WebSocket sessions
//! - `fetcher` merges the order stream cache with REST lookups
//! - `contract` implements `Exchange` on top of all of the above

pub mod api;
pub mod auth;
pub mod contract;
pub mod fetcher;
pub mod models;
pub mod rate_limit;
pub mod rest;
pub mod scales;
pub mod stream;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ExchangeError, Result};

pub use api::{OrderRef, PhemexApi};
pub use auth::{PhemexCredentials, PhemexSigner};
pub use contract::PhemexContract;
pub use fetcher::CombinedOrdersFetcher;
pub use models::{OrderFields, OrderResponse};
pub use rate_limit::{PhemexRateLimiter, RateLimitGroup, RateLimitHeaders};
pub use rest::PhemexRestClient;
pub use scales::{ScalesService, SymbolScale};
pub use stream::{PhemexStreams, WsOrderUpdate};

pub const PHEMEX_PREFIX: &str = "PHEMEX-";

/// `PHEMEX-BTCUSD` -> `BTCUSD`. Symbols without the prefix pass through.
pub fn to_phemex_symbol(symbol: &str) -> &str {
    symbol.strip_prefix(PHEMEX_PREFIX).unwrap_or(symbol)
}

/// `BTCUSD` -> `PHEMEX-BTCUSD`
pub fn to_full_symbol(phemex_symbol: &str) -> String {
    format!("{PHEMEX_PREFIX}{phemex_symbol}")
}

/// Phemex adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhemexConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_url: String,
    pub testnet: bool,
    /// Lifetime of a signed request.
    pub request_expiry: Duration,
    pub contract_rate_limit: u32,
    pub others_rate_limit: u32,
    pub scales_refresh_interval: Duration,
    /// How long after subscribing the order stream is trusted to have caught up.
    pub stream_warmup: Duration,
    /// Delay between order stream reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for PhemexConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.phemex.com".to_string(),
            ws_url: "wss://phemex.com/ws".to_string(),
            testnet: false,
            request_expiry: Duration::from_secs(60),
            contract_rate_limit: 500,
            others_rate_limit: 100,
            scales_refresh_interval: Duration::from_secs(5 * 60),
            stream_warmup: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl PhemexConfig {
    pub fn testnet() -> Self {
        Self {
            base_url: "https://testnet-api.phemex.com".to_string(),
            ws_url: "wss://testnet.phemex.com/ws".to_string(),
            testnet: true,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.api_key = api_key;
        self.api_secret = api_secret;
        self
    }

    pub fn with_env_credentials(mut self) -> Result<Self> {
        let credentials = PhemexCredentials::from_env()?;
        self.api_key = credentials.api_key;
        self.api_secret = credentials.secret_key;
        Ok(self)
    }

    pub fn with_rate_limits(mut self, contract: u32, others: u32) -> Self {
        self.contract_rate_limit = contract;
        self.others_rate_limit = others;
        self
    }

    pub fn with_scales_refresh_interval(mut self, interval: Duration) -> Self {
        self.scales_refresh_interval = interval;
        self
    }

    pub fn with_stream_warmup(mut self, warmup: Duration) -> Self {
        self.stream_warmup = warmup;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn credentials(&self) -> PhemexCredentials {
        PhemexCredentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url)?;
        url::Url::parse(&self.ws_url)?;
        if self.contract_rate_limit == 0 || self.others_rate_limit == 0 {
            return Err(ExchangeError::ConfigurationError(
                "rate limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
