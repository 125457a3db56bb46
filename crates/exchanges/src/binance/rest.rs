//! Binance REST client using the monoio HTTPS transport

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use unitrade_core::{CancellationToken, PerfTimer};

use crate::errors::{ExchangeError, Result};
use crate::http::{HttpResponse, HttpsClient, Method};

use super::api::{BinanceApi, OrderRef};
use super::auth::{API_KEY_HEADER, BinanceSigner};
use super::models::{AccountData, ApiErrorBody, BinanceOrder, ExchangeInfo, ListenKey, OrderFields, PriceStats};
use super::{BinanceConfig, BinanceFlavor, Endpoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    None,
    /// API key header only, used by listen key calls.
    ApiKey,
    Signed,
}

struct Call {
    method: Method,
    path: &'static str,
    query: Vec<(&'static str, String)>,
    auth: Auth,
}

impl Call {
    fn new(method: Method, path: &'static str) -> Self {
        Self { method, path, query: Vec::new(), auth: Auth::None }
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

pub struct BinanceRestClient {
    base_url: String,
    flavor: BinanceFlavor,
    signer: Option<BinanceSigner>,
    http: HttpsClient,
}

impl BinanceRestClient {
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        config.validate()?;
        let credentials = config.credentials();
        let signer = if credentials.is_valid() {
            Some(BinanceSigner::new(credentials, config.recv_window)?)
        } else {
            warn!("⚠️ Binance client created without credentials, signed endpoints will fail");
            None
        };

        info!("🔗 {} REST client created", config.flavor.name());
        info!("   Base URL: {}", config.base_url);
        info!("   Testnet: {}", config.testnet);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            flavor: config.flavor,
            signer,
            http: HttpsClient::new(),
        })
    }

    fn path(&self, endpoint: Endpoint) -> &'static str {
        self.flavor.path(endpoint)
    }

    fn signer(&self) -> Result<&BinanceSigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| ExchangeError::MissingCredentials("BINANCE_API_KEY".to_string()))
    }

    async fn send(&self, ctx: &CancellationToken, call: Call) -> Result<HttpResponse> {
        if ctx.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }

        let mut query = call.query_string();
        let mut headers: Vec<(&str, &str)> = Vec::new();
        match call.auth {
            Auth::None => {}
            Auth::ApiKey => headers.push((API_KEY_HEADER, self.signer()?.api_key())),
            Auth::Signed => {
                let signer = self.signer()?;
                query = signer.signed_query(&query, Utc::now().timestamp_millis())?;
                headers.push((API_KEY_HEADER, signer.api_key()));
            }
        }

        let mut url = format!("{}{}", self.base_url, call.path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        Url::parse(&url)?;

        let timer = PerfTimer::start(format!("binance {} {}", call.method, call.path));
        let response = monoio::select! {
            _ = ctx.cancelled() => return Err(ExchangeError::Cancelled),
            r = self.http.send(call.method, &url, &headers, None) => r?,
        };
        timer.log_elapsed();

        if !response.is_success() {
            if matches!(response.status, 418 | 429) {
                warn!("⚠️ Binance rate limit hit on {}: {}", call.path, response.status);
                return Err(ExchangeError::RateLimitExceeded);
            }
            return Err(match serde_json::from_str::<ApiErrorBody>(&response.body) {
                Ok(err) => ExchangeError::Api { code: err.code, msg: err.msg },
                Err(_) => ExchangeError::HttpError(response.status, response.body),
            });
        }
        debug!("📥 Binance {} {} -> {}", call.method, call.path, response.status);
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, ctx: &CancellationToken, call: Call) -> Result<T> {
        self.send(ctx, call).await?.json()
    }
}

#[async_trait(?Send)]
impl BinanceApi for BinanceRestClient {
    async fn get_order(&self, ctx: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<BinanceOrder> {
        let call = Call::new(Method::Get, self.path(Endpoint::Order)).query("symbol", symbol);
        let call = match order {
            OrderRef::OrderId(id) => call.query("orderId", id),
            OrderRef::ClientOrderId(id) => call.query("origClientOrderId", id),
        };
        self.json(ctx, call.auth(Auth::Signed)).await
    }

    async fn create_order(&self, ctx: &CancellationToken, order: &OrderFields) -> Result<BinanceOrder> {
        let mut call = Call::new(Method::Post, self.path(Endpoint::Order));
        for (key, value) in order.to_params() {
            call = call.query(key, value);
        }
        self.json(ctx, call.auth(Auth::Signed)).await
    }

    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, client_order_id: &str) -> Result<BinanceOrder> {
        let call = Call::new(Method::Delete, self.path(Endpoint::Order))
            .query("symbol", symbol)
            .query("origClientOrderId", client_order_id)
            .auth(Auth::Signed);
        self.json(ctx, call).await
    }

    async fn open_orders(&self, ctx: &CancellationToken, symbol: Option<&str>) -> Result<Vec<BinanceOrder>> {
        let mut call = Call::new(Method::Get, self.path(Endpoint::OpenOrders));
        if let Some(symbol) = symbol {
            call = call.query("symbol", symbol);
        }
        self.json(ctx, call.auth(Auth::Signed)).await
    }

    async fn all_orders(&self, ctx: &CancellationToken, symbol: &str) -> Result<Vec<BinanceOrder>> {
        let call = Call::new(Method::Get, self.path(Endpoint::AllOrders))
            .query("symbol", symbol)
            .auth(Auth::Signed);
        self.json(ctx, call).await
    }

    async fn exchange_info(&self, ctx: &CancellationToken) -> Result<ExchangeInfo> {
        self.json(ctx, Call::new(Method::Get, self.path(Endpoint::ExchangeInfo))).await
    }

    async fn ticker(&self, ctx: &CancellationToken, symbol: &str) -> Result<Option<PriceStats>> {
        let call = Call::new(Method::Get, self.path(Endpoint::Ticker24h)).query("symbol", symbol);
        let value: serde_json::Value = self.json(ctx, call).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn account(&self, ctx: &CancellationToken) -> Result<AccountData> {
        let call = Call::new(Method::Get, self.path(Endpoint::Account)).auth(Auth::Signed);
        self.json(ctx, call).await
    }

    async fn start_user_stream(&self, ctx: &CancellationToken) -> Result<String> {
        let call = Call::new(Method::Post, self.path(Endpoint::ListenKey)).auth(Auth::ApiKey);
        let key: ListenKey = self.json(ctx, call).await?;
        Ok(key.listen_key)
    }

    async fn keepalive_user_stream(&self, ctx: &CancellationToken, listen_key: &str) -> Result<()> {
        let call = Call::new(Method::Put, self.path(Endpoint::ListenKey))
            .query("listenKey", listen_key)
            .auth(Auth::ApiKey);
        self.send(ctx, call).await?;
        Ok(())
    }
}
