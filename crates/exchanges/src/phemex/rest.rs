//! Phemex REST client using the monoio HTTPS transport

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use unitrade_core::{CancellationToken, PerfTimer};

use crate::errors::{ExchangeError, Result};
use crate::http::{HttpResponse, HttpsClient, Method};

use super::PhemexConfig;
use super::api::{OrderRef, PhemexApi};
use super::auth::PhemexSigner;
use super::models::{
    AccountPositionsData, ApiEnvelope, ApiErrorBody, ORDER_NOT_FOUND_CODE, OrderFields, OrderResponse, OrderRows,
    Product, ProductsData, TickerResponse, TickerResult,
};
use super::rate_limit::{PhemexRateLimiter, RateLimitGroup, RateLimitHeaders};

pub struct PhemexRestClient {
    base_url: String,
    signer: Option<PhemexSigner>,
    http: HttpsClient,
    limiter: Arc<PhemexRateLimiter>,
}

/// One outgoing call.
struct Call<'a> {
    method: Method,
    path: &'a str,
    query: Vec<(&'a str, String)>,
    body: Option<String>,
    group: Option<RateLimitGroup>,
    signed: bool,
}

impl<'a> Call<'a> {
    fn new(method: Method, path: &'a str) -> Self {
        Self { method, path, query: Vec::new(), body: None, group: None, signed: false }
    }

    fn query(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    fn signed(mut self, group: RateLimitGroup) -> Self {
        self.group = Some(group);
        self.signed = true;
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

impl PhemexRestClient {
    pub fn new(config: &PhemexConfig, limiter: Arc<PhemexRateLimiter>) -> Result<Self> {
        config.validate()?;
        let credentials = config.credentials();
        let signer = if credentials.is_valid() {
            Some(PhemexSigner::new(credentials, config.request_expiry)?)
        } else {
            warn!("⚠️ Phemex client created without credentials, signed endpoints will fail");
            None
        };

        info!("🔗 Phemex REST client created");
        info!("   Base URL: {}", config.base_url);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer,
            http: HttpsClient::new(),
            limiter,
        })
    }

    pub fn limiter(&self) -> &Arc<PhemexRateLimiter> {
        &self.limiter
    }

    async fn send(&self, ctx: &CancellationToken, call: Call<'_>) -> Result<HttpResponse> {
        if ctx.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }
        if let Some(group) = call.group {
            monoio::select! {
                _ = ctx.cancelled() => return Err(ExchangeError::Cancelled),
                _ = self.limiter.wait(group) => {}
            }
        }

        let query = call.query_string();
        let body = call.body.as_deref().unwrap_or_default();
        let mut headers: Vec<(&str, String)> = Vec::new();
        if call.signed {
            let signer = self
                .signer
                .as_ref()
                .ok_or_else(|| ExchangeError::MissingCredentials("PHEMEX_API_KEY".to_string()))?;
            let expiry = signer.expiry_at(Utc::now().timestamp());
            headers.extend(signer.sign_request(call.path, &query, body, expiry)?.as_pairs());
        }
        if call.body.is_some() {
            headers.push(("Content-Type", "application/json".to_string()));
        }
        let header_refs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let mut url = format!("{}{}", self.base_url, call.path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        Url::parse(&url)?;

        let timer = PerfTimer::start(format!("phemex {} {}", call.method, call.path));
        let response = monoio::select! {
            _ = ctx.cancelled() => return Err(ExchangeError::Cancelled),
            r = self.http.send(call.method, &url, &header_refs, call.body.as_deref()) => r?,
        };
        timer.log_elapsed();

        match RateLimitHeaders::parse(&response) {
            Ok(headers) => self.limiter.apply(headers.as_ref()),
            Err(e) => warn!("⚠️ can't parse Phemex rate limit headers: {}", e),
        }

        if !response.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&response.body) {
                Ok(err) => ExchangeError::Api { code: err.code, msg: err.msg },
                Err(_) => ExchangeError::HttpError(response.status, response.body),
            });
        }
        debug!("📥 Phemex {} {} -> {}", call.method, call.path, response.status);
        Ok(response)
    }

    async fn data<T: DeserializeOwned>(&self, ctx: &CancellationToken, call: Call<'_>) -> Result<T> {
        let response = self.send(ctx, call).await?;
        let envelope: ApiEnvelope<T> = response.json()?;
        if envelope.code != 0 {
            return Err(ExchangeError::Api { code: envelope.code, msg: envelope.msg });
        }
        envelope
            .data
            .ok_or_else(|| ExchangeError::InvalidResponse("missing data in Phemex response".to_string()))
    }
}

#[async_trait(?Send)]
impl PhemexApi for PhemexRestClient {
    async fn query_order(&self, ctx: &CancellationToken, symbol: &str, order: OrderRef<'_>) -> Result<Vec<OrderResponse>> {
        let call = Call::new(Method::Get, "/exchange/order").query("symbol", symbol);
        let call = match order {
            OrderRef::OrderId(id) => call.query("orderID", id),
            OrderRef::ClientOrderId(id) => call.query("clOrdID", id),
        };
        self.data(ctx, call.signed(RateLimitGroup::Others)).await
    }

    async fn create_order(&self, ctx: &CancellationToken, order: &OrderFields) -> Result<OrderResponse> {
        let body = serde_json::to_string(order)?;
        let call = Call::new(Method::Post, "/orders").body(body).signed(RateLimitGroup::Contract);
        self.data(ctx, call).await
    }

    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        let call = Call::new(Method::Delete, "/orders/cancel")
            .query("orderID", order_id)
            .query("symbol", symbol)
            .signed(RateLimitGroup::Contract);
        self.data(ctx, call).await
    }

    async fn open_orders(&self, ctx: &CancellationToken, symbol: Option<&str>) -> Result<Vec<OrderResponse>> {
        let mut call = Call::new(Method::Get, "/orders/activeList");
        if let Some(symbol) = symbol {
            call = call.query("symbol", symbol);
        }
        let call = call.signed(RateLimitGroup::Others);
        match self.data::<OrderRows>(ctx, call).await {
            Ok(rows) => Ok(rows.rows),
            // Phemex answers "order not found" when nothing is open.
            Err(e) if e.api_code() == Some(ORDER_NOT_FOUND_CODE) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn closed_orders(&self, ctx: &CancellationToken, symbol: &str) -> Result<Vec<OrderResponse>> {
        let call = Call::new(Method::Get, "/exchange/order/list")
            .query("symbol", symbol)
            .signed(RateLimitGroup::Others);
        Ok(self.data::<OrderRows>(ctx, call).await?.rows)
    }

    async fn products(&self, ctx: &CancellationToken) -> Result<Vec<Product>> {
        let data: ProductsData = self.data(ctx, Call::new(Method::Get, "/public/products")).await?;
        Ok(data.products)
    }

    async fn ticker(&self, ctx: &CancellationToken, symbol: &str) -> Result<TickerResult> {
        let call = Call::new(Method::Get, "/md/ticker/24hr").query("symbol", symbol);
        let response: TickerResponse = self.send(ctx, call).await?.json()?;
        response
            .result
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("no ticker for {symbol}")))
    }

    async fn account_positions(&self, ctx: &CancellationToken, currency: &str) -> Result<AccountPositionsData> {
        let call = Call::new(Method::Get, "/accounts/accountPositions")
            .query("currency", currency)
            .signed(RateLimitGroup::Others);
        self.data(ctx, call).await
    }
}
