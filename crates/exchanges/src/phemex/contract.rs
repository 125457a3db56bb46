//! `Exchange` implementation for Phemex contracts
//!
//! Placement and cancellation go through the shared reconciling `OrderPlacer` and
//! `OrderCanceller`; the Phemex gateways below supply request building, submission
//! and lookups. Lookups prefer the order stream cache kept by
//! `CombinedOrdersFetcher`, because Phemex purges canceled orders from REST.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use unitrade_core::{CancellationToken, Fixed, PerfTimer};

use crate::errors::{ExchangeError, Result, ResultExt};
use crate::events::EventStream;
use crate::orders::{CancellationGateway, OrderCanceller, OrderPlacer, PlacementGateway};
use crate::traits::Exchange;
use crate::types::*;

use super::api::PhemexApi;
use super::fetcher::CombinedOrdersFetcher;
use super::models::{
    GOOD_TILL_CANCEL, ORDER_NOT_FOUND_CODE, OrderFields, convert_order, is_order_rejected_code, order_type_to_phemex,
    side_to_phemex,
};
use super::rate_limit::PhemexRateLimiter;
use super::rest::PhemexRestClient;
use super::scales::ScalesService;
use super::stream::PhemexStreams;
use super::{PHEMEX_PREFIX, PhemexConfig, to_phemex_symbol};

/// Orders older than this are no longer answered reliably by Phemex.
pub const MAX_ORDER_AGE_DAYS: i64 = 55;

/// Settlement currencies whose positions make up the account.
pub const ACCOUNT_CURRENCIES: [&str; 2] = ["BTC", "USD"];

pub struct PhemexPlacementGateway {
    api: Arc<dyn PhemexApi>,
    fetcher: Arc<CombinedOrdersFetcher>,
    scales: Arc<ScalesService>,
}

#[async_trait(?Send)]
impl PlacementGateway for PhemexPlacementGateway {
    type Request = OrderFields;

    async fn create_request(&self, ctx: &CancellationToken, order: &NewOrder) -> Result<OrderFields> {
        let symbol = to_phemex_symbol(&order.symbol);
        let order_qty = order
            .quantity
            .to_integer()
            .map_err(|e| ExchangeError::from(e).context("can't convert quantity"))?;
        let price_ep = self
            .scales
            .price_to_ep(ctx, symbol, order.price)
            .await
            .context("can't convert price")?;

        Ok(OrderFields {
            cl_ord_id: order.client_order_id.clone(),
            ord_type: order_type_to_phemex(order.order_type)?.to_string(),
            order_qty,
            price_ep,
            side: side_to_phemex(order.side).to_string(),
            symbol: symbol.to_string(),
            time_in_force: GOOD_TILL_CANCEL.to_string(),
        })
    }

    fn symbol<'a>(&self, request: &'a OrderFields) -> &'a str {
        &request.symbol
    }

    fn client_order_id<'a>(&self, request: &'a OrderFields) -> &'a str {
        &request.cl_ord_id
    }

    async fn submit(&self, ctx: &CancellationToken, request: &OrderFields) -> Result<String> {
        let response = self.api.create_order(ctx, request).await.map_err(|e| match e.api_code() {
            Some(code) if is_order_rejected_code(code) => ExchangeError::NewOrderRejected(e.to_string()),
            _ => e.context(format!("can't place {} order", request.side)),
        })?;

        let info = convert_order(&response).context("unable to convert status")?.ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("order {} reported cleared on placement", response.order_id))
        })?;
        if info.status == OrderStatus::Rejected {
            return Err(ExchangeError::NewOrderRejected("order have status = REJECTED".to_string()));
        }
        Ok(info.id)
    }

    async fn lookup(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(OrderInfo, OrderFields)> {
        self.fetcher.get_order_by_client_order_id(ctx, symbol, client_order_id).await
    }
}

pub struct PhemexCancellationGateway {
    api: Arc<dyn PhemexApi>,
    fetcher: Arc<CombinedOrdersFetcher>,
}

#[async_trait(?Send)]
impl CancellationGateway for PhemexCancellationGateway {
    async fn order_status(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<OrderStatus> {
        let (info, _) = self.fetcher.get_order_by_order_id(ctx, symbol, id).await?;
        Ok(info.status)
    }

    async fn send_cancel(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<Option<OrderStatus>> {
        match self.api.cancel_order(ctx, symbol, id).await {
            Ok(_) => Ok(None),
            Err(e) if e.api_code() == Some(ORDER_NOT_FOUND_CODE) => {
                Err(ExchangeError::OrderNotFound(format!("cancel {id}: {e}")))
            }
            Err(e) => Err(e.context("can't make cancel request")),
        }
    }
}

pub struct PhemexContract {
    api: Arc<dyn PhemexApi>,
    streams: Arc<PhemexStreams>,
    scales: Arc<ScalesService>,
    fetcher: Arc<CombinedOrdersFetcher>,
    placer: OrderPlacer<PhemexPlacementGateway>,
    canceller: OrderCanceller<PhemexCancellationGateway>,
}

impl PhemexContract {
    /// Build the REST client, the stream factory and the background services.
    /// Nothing connects until `start_background_job`.
    pub fn new(config: PhemexConfig) -> Result<Self> {
        config.validate()?;
        let limiter = Arc::new(PhemexRateLimiter::new(config.contract_rate_limit, config.others_rate_limit));
        let api: Arc<dyn PhemexApi> = Arc::new(PhemexRestClient::new(&config, limiter)?);
        let streams = Arc::new(PhemexStreams::new(&config)?);

        let order_streams = streams.clone();
        let fetcher = CombinedOrdersFetcher::new(api.clone(), &config, move |token| {
            let streams = order_streams.clone();
            async move { streams.orders(token).await }
        });
        let scales = Arc::new(ScalesService::new(api.clone(), config.scales_refresh_interval));

        info!("🏗️ Phemex contract adapter created (testnet: {})", config.testnet);
        Ok(Self::from_parts(api, streams, Arc::new(fetcher), scales))
    }

    pub fn from_parts(
        api: Arc<dyn PhemexApi>,
        streams: Arc<PhemexStreams>,
        fetcher: Arc<CombinedOrdersFetcher>,
        scales: Arc<ScalesService>,
    ) -> Self {
        let placer = OrderPlacer::new(PhemexPlacementGateway {
            api: api.clone(),
            fetcher: fetcher.clone(),
            scales: scales.clone(),
        });
        let canceller = OrderCanceller::new(PhemexCancellationGateway {
            api: api.clone(),
            fetcher: fetcher.clone(),
        })
        .with_pre_check(true);

        Self { api, streams, scales, fetcher, placer, canceller }
    }

    /// Load price scales and subscribe to the order stream. Both keep running
    /// until `stop` or until `ctx` is cancelled.
    pub async fn start_background_job(&self, ctx: &CancellationToken) -> Result<()> {
        self.scales.start(ctx).await.context("can't start scales service")?;
        self.fetcher.start(ctx).await?;
        Ok(())
    }

    pub fn stop(&self) {
        self.fetcher.stop();
        self.scales.stop();
    }

    pub fn scales(&self) -> &Arc<ScalesService> {
        &self.scales
    }

    pub fn fetcher(&self) -> &Arc<CombinedOrdersFetcher> {
        &self.fetcher
    }
}

fn check_order_date(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<()> {
    match created_at {
        Some(created_at) if now - created_at > TimeDelta::days(MAX_ORDER_AGE_DAYS) => Err(
            ExchangeError::InvalidOrder("order is too old and can't be used".to_string()),
        ),
        _ => Ok(()),
    }
}

#[async_trait(?Send)]
impl Exchange for PhemexContract {
    fn prefix(&self) -> &str {
        PHEMEX_PREFIX
    }

    fn name(&self) -> &str {
        "Phemex Contract"
    }

    async fn round_price(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        price: Fixed,
        _tick_size: Option<&str>,
    ) -> Result<Fixed> {
        self.scales.scale_for(ctx, to_phemex_symbol(symbol)).await?.round_price(price)
    }

    /// Contracts are whole numbers; anything that rounds to zero becomes one contract.
    async fn round_quantity(&self, _ctx: &CancellationToken, _symbol: &str, quantity: Fixed) -> Result<Fixed> {
        let mut rounded = quantity.round();
        if rounded.is_zero() {
            rounded = Fixed::ONE;
        }
        rounded.to_integer()?;
        Ok(rounded)
    }

    async fn place_order(&self, ctx: &CancellationToken, is_retry: bool, order: &NewOrder) -> Result<String> {
        let timer = PerfTimer::start(format!("phemex place {}", order.client_order_id));
        let result = self.placer.place(ctx, is_retry, order).await;
        timer.log_elapsed();
        result
    }

    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()> {
        self.canceller.cancel(ctx, to_phemex_symbol(symbol), id).await
    }

    async fn release_order(&self, _ctx: &CancellationToken, _symbol: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<Fixed> {
        let phemex_symbol = to_phemex_symbol(symbol);
        let ticker = self.api.ticker(ctx, phemex_symbol).await.context("can't get ticker")?;
        self.scales.scale_for(ctx, phemex_symbol).await?.ep_to_price(ticker.close_ep)
    }

    async fn get_order_info(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        check_order_date(created_at, Utc::now())?;
        let (info, _) = self.fetcher.get_order_by_order_id(ctx, to_phemex_symbol(symbol), id).await?;
        Ok(info)
    }

    async fn get_order_info_by_client_order_id(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        check_order_date(created_at, Utc::now())?;
        let (info, _) = self
            .fetcher
            .get_order_by_client_order_id(ctx, to_phemex_symbol(symbol), client_order_id)
            .await?;
        Ok(info)
    }

    async fn get_tradable_symbols(&self, ctx: &CancellationToken) -> Result<Vec<SymbolInfo>> {
        let products = self.api.products(ctx).await.context("unable to make request")?;
        let symbols: Vec<SymbolInfo> = products
            .iter()
            .filter(|p| p.is_tradable_perpetual())
            .map(|p| p.to_symbol_info())
            .collect();
        debug!("📋 {} tradable Phemex perpetuals", symbols.len());
        Ok(symbols)
    }

    async fn watch_orders_statuses(&self, ctx: &CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        self.streams.order_events(ctx.clone()).await
    }

    async fn watch_symbol_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<EventStream<Fixed>> {
        self.streams
            .prices(ctx.clone(), to_phemex_symbol(symbol).to_string(), self.scales.clone())
            .await
    }

    async fn watch_account_positions(&self, ctx: &CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        self.streams.positions(ctx.clone()).await
    }

    async fn get_open_orders(&self, ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>> {
        self.fetcher.get_open_orders(ctx).await
    }

    async fn get_orders(&self, ctx: &CancellationToken, filter: &OrderFilter) -> Result<Vec<OrderDetailInfo>> {
        let symbol = filter
            .symbol
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExchangeError::InvalidSymbol("symbol is empty!".to_string()))?;
        self.fetcher
            .get_history_orders(
                ctx,
                to_phemex_symbol(symbol),
                filter.order_id.as_deref(),
                filter.client_order_id.as_deref(),
            )
            .await
    }

    async fn get_account(&self, ctx: &CancellationToken) -> Result<Account> {
        let mut positions = Vec::new();
        for currency in ACCOUNT_CURRENCIES {
            let data = self
                .api
                .account_positions(ctx, currency)
                .await
                .context(format!("can't get {currency} positions"))?;
            for record in &data.positions {
                positions.push(record.to_account_position()?);
            }
        }
        Ok(Account { balances: Vec::new(), positions })
    }

    fn generate_client_order_id(&self, identifier: &str) -> Result<String> {
        Ok(unitrade_core::generate_client_order_id(identifier))
    }
}
