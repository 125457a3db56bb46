//! Binance authentication and request signing
//!
//! Signed endpoints take `timestamp`, `recvWindow` and
//! `signature = hex(HMAC-SHA256(secret, query))` appended to the query string.
//! The API key travels in the `X-MBX-APIKEY` header, which listen key calls
//! need as well.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use unitrade_core::PerfTimer;

use crate::errors::{ExchangeError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Binance API credentials
#[derive(Debug, Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl BinanceCredentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self { api_key, secret_key }
    }

    /// Load credentials from `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| ExchangeError::MissingCredentials("BINANCE_API_KEY".to_string()))?;
        let secret_key = std::env::var("BINANCE_SECRET_KEY")
            .map_err(|_| ExchangeError::MissingCredentials("BINANCE_SECRET_KEY".to_string()))?;

        Ok(Self::new(api_key, secret_key))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

pub struct BinanceSigner {
    credentials: BinanceCredentials,
    recv_window: u64,
}

impl BinanceSigner {
    pub fn new(credentials: BinanceCredentials, recv_window: u64) -> Result<Self> {
        if !credentials.is_valid() {
            return Err(ExchangeError::MissingCredentials("binance api key or secret".to_string()));
        }
        Ok(Self { credentials, recv_window })
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// `query` is the encoded query without `?`, possibly empty. Returns it with
    /// `recvWindow`, `timestamp` and `signature` appended.
    pub fn signed_query(&self, query: &str, timestamp_ms: i64) -> Result<String> {
        let timer = PerfTimer::start("binance_sign_request");
        let mut payload = String::with_capacity(query.len() + 96);
        if !query.is_empty() {
            payload.push_str(query);
            payload.push('&');
        }
        payload.push_str(&format!("recvWindow={}&timestamp={timestamp_ms}", self.recv_window));

        let signature = self.sign(&payload)?;
        payload.push_str("&signature=");
        payload.push_str(&signature);
        timer.log_elapsed();
        debug!("🔐 Signed Binance query at {}", timestamp_ms);
        Ok(payload)
    }

    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| ExchangeError::SigningError(format!("HMAC setup failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
