//! Phemex authentication and request signing
//!
//! REST: `hex(HMAC-SHA256(secret, path + query + expiry + body))` sent in the
//! `x-phemex-request-signature` header. WebSocket login signs `api_key + expiry`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use unitrade_core::PerfTimer;

use crate::errors::{ExchangeError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_TOKEN_HEADER: &str = "x-phemex-access-token";
pub const EXPIRY_HEADER: &str = "x-phemex-request-expiry";
pub const SIGNATURE_HEADER: &str = "x-phemex-request-signature";

/// Phemex API credentials
#[derive(Debug, Clone)]
pub struct PhemexCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl PhemexCredentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self { api_key, secret_key }
    }

    /// Load credentials from `PHEMEX_API_KEY` / `PHEMEX_SECRET_KEY`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("PHEMEX_API_KEY")
            .map_err(|_| ExchangeError::MissingCredentials("PHEMEX_API_KEY".to_string()))?;
        let secret_key = std::env::var("PHEMEX_SECRET_KEY")
            .map_err(|_| ExchangeError::MissingCredentials("PHEMEX_SECRET_KEY".to_string()))?;

        Ok(Self::new(api_key, secret_key))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

/// Headers of one signed REST request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_token: String,
    pub expiry: i64,
    pub signature: String,
}

impl SignedHeaders {
    pub fn as_pairs(&self) -> [(&'static str, String); 3] {
        [
            (ACCESS_TOKEN_HEADER, self.access_token.clone()),
            (EXPIRY_HEADER, self.expiry.to_string()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }
}

pub struct PhemexSigner {
    credentials: PhemexCredentials,
    expiry: Duration,
}

impl PhemexSigner {
    pub fn new(credentials: PhemexCredentials, expiry: Duration) -> Result<Self> {
        if !credentials.is_valid() {
            return Err(ExchangeError::MissingCredentials("phemex api key or secret".to_string()));
        }
        Ok(Self { credentials, expiry })
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Unix seconds at which a request signed now stops being accepted.
    pub fn expiry_at(&self, now_secs: i64) -> i64 {
        now_secs + self.expiry.as_secs() as i64
    }

    /// `query` is the raw query string without `?`.
    pub fn sign_request(&self, path: &str, query: &str, body: &str, expiry: i64) -> Result<SignedHeaders> {
        let timer = PerfTimer::start("phemex_sign_request");
        let payload = format!("{path}{query}{expiry}{body}");
        let signature = self.create_signature(&payload)?;
        timer.log_elapsed();
        debug!("🔐 Signed request: {}", path);

        Ok(SignedHeaders {
            access_token: self.credentials.api_key.clone(),
            expiry,
            signature,
        })
    }

    /// Params of the `user.auth` call: `["API", key, signature, expiry]`.
    pub fn websocket_auth_params(&self, expiry: i64) -> Result<serde_json::Value> {
        let signature = self.create_signature(&format!("{}{expiry}", self.credentials.api_key))?;
        Ok(serde_json::json!(["API", self.credentials.api_key, signature, expiry]))
    }

    fn create_signature(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| ExchangeError::SigningError(format!("HMAC setup failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
