//! `Exchange` implementation for Binance spot and futures
//!
//! Binance tracks orders by client order id, so ids handed out by
//! `place_order` are client order ids and lookups go straight to REST. The
//! canceller runs without a status pre-check: a repeated cancel on Binance only
//! reports the order unknown, which the post-check resolves.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use unitrade_core::id_gen::generate_prefixed_client_order_id;
use unitrade_core::{CancellationToken, Fixed, PerfTimer};

use crate::errors::{ExchangeError, Result, ResultExt};
use crate::events::EventStream;
use crate::orders::{CancellationGateway, OrderCanceller, OrderPlacer, PlacementGateway};
use crate::traits::Exchange;
use crate::types::*;

use super::api::{BinanceApi, OrderRef};
use super::models::{
    ACK_RESPONSE, BinanceOrder, GOOD_TILL_CANCEL, OrderFields, convert_order_status, floor_to_precision,
    is_cancel_not_found, is_lookup_not_found, is_order_rejected, order_detail,
};
use super::rest::BinanceRestClient;
use super::user_stream::BinanceStreams;
use super::{BINANCE_PREFIX, BinanceConfig, BinanceFlavor, to_binance_symbol, to_full_symbol};

/// Longest client order id Binance accepts.
pub const MAX_CLIENT_ORDER_ID_LEN: usize = 36;

fn order_type_for(flavor: BinanceFlavor, order_type: OrderType) -> Result<&'static str> {
    let supported = match flavor {
        BinanceFlavor::Spot | BinanceFlavor::Us => matches!(
            order_type,
            OrderType::Limit
                | OrderType::Market
                | OrderType::LimitMaker
                | OrderType::StopLoss
                | OrderType::StopLossLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
        ),
        BinanceFlavor::Futures => matches!(order_type, OrderType::Limit | OrderType::Market),
    };
    if !supported {
        return Err(ExchangeError::InvalidOrder(format!(
            "order type {order_type} is not supported by {}",
            flavor.name()
        )));
    }
    Ok(order_type.as_str())
}

async fn get_order(
    api: &dyn BinanceApi,
    ctx: &CancellationToken,
    symbol: &str,
    client_order_id: &str,
) -> Result<BinanceOrder> {
    api.get_order(ctx, symbol, OrderRef::ClientOrderId(client_order_id))
        .await
        .map_err(|e| {
            if is_lookup_not_found(&e) {
                ExchangeError::OrderNotFound(e.to_string())
            } else {
                e
            }
        })
}

pub struct BinancePlacementGateway {
    api: Arc<dyn BinanceApi>,
    flavor: BinanceFlavor,
}

#[async_trait(?Send)]
impl PlacementGateway for BinancePlacementGateway {
    type Request = OrderFields;

    async fn create_request(&self, _ctx: &CancellationToken, order: &NewOrder) -> Result<OrderFields> {
        let order_type = order_type_for(self.flavor, order.order_type)?;
        let price = if order.order_type == OrderType::Market {
            Fixed::ZERO.to_flat_string()
        } else {
            order.price.to_flat_string()
        };
        Ok(OrderFields {
            symbol: to_binance_symbol(&order.symbol).to_string(),
            side: order.side.to_string(),
            order_type: order_type.to_string(),
            time_in_force: GOOD_TILL_CANCEL.to_string(),
            quantity: order.quantity.to_flat_string(),
            price,
            new_client_order_id: order.client_order_id.clone(),
            new_order_resp_type: ACK_RESPONSE.to_string(),
        })
    }

    fn symbol<'a>(&self, request: &'a OrderFields) -> &'a str {
        &request.symbol
    }

    fn client_order_id<'a>(&self, request: &'a OrderFields) -> &'a str {
        &request.new_client_order_id
    }

    async fn submit(&self, ctx: &CancellationToken, request: &OrderFields) -> Result<String> {
        let order = self.api.create_order(ctx, request).await.map_err(|e| {
            let e = if is_order_rejected(&e) { ExchangeError::NewOrderRejected(e.to_string()) } else { e };
            e.context(format!("can't place {} order", request.side))
        })?;

        if convert_order_status(&order.status) == OrderStatus::Rejected {
            return Err(ExchangeError::NewOrderRejected("order have status = REJECTED".to_string()));
        }
        if order.client_order_id.is_empty() {
            return Ok(request.new_client_order_id.clone());
        }
        Ok(order.client_order_id)
    }

    async fn lookup(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(OrderInfo, OrderFields)> {
        let order = get_order(self.api.as_ref(), ctx, symbol, client_order_id).await?;
        Ok((order.info(), OrderFields::from_order(&order)))
    }
}

pub struct BinanceCancellationGateway {
    api: Arc<dyn BinanceApi>,
}

#[async_trait(?Send)]
impl CancellationGateway for BinanceCancellationGateway {
    async fn order_status(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<OrderStatus> {
        let order = get_order(self.api.as_ref(), ctx, symbol, id).await?;
        Ok(convert_order_status(&order.status))
    }

    async fn send_cancel(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<Option<OrderStatus>> {
        match self.api.cancel_order(ctx, symbol, id).await {
            Ok(order) => Ok(Some(convert_order_status(&order.status))),
            Err(e) if is_cancel_not_found(&e) => Err(ExchangeError::OrderNotFound(format!("cancel {id}: {e}"))),
            Err(e) => Err(e.context("can't make cancel request")),
        }
    }
}

pub struct BinanceExchange {
    api: Arc<dyn BinanceApi>,
    streams: Arc<BinanceStreams>,
    flavor: BinanceFlavor,
    placer: OrderPlacer<BinancePlacementGateway>,
    canceller: OrderCanceller<BinanceCancellationGateway>,
}

impl BinanceExchange {
    pub fn new(config: BinanceConfig) -> Result<Self> {
        config.validate()?;
        let api: Arc<dyn BinanceApi> = Arc::new(BinanceRestClient::new(&config)?);
        let streams = Arc::new(BinanceStreams::new(&config, api.clone())?);
        info!("🏗️ {} adapter created (testnet: {})", config.flavor.name(), config.testnet);
        Ok(Self::from_parts(config.flavor, api, streams))
    }

    pub fn from_parts(flavor: BinanceFlavor, api: Arc<dyn BinanceApi>, streams: Arc<BinanceStreams>) -> Self {
        let placer = OrderPlacer::new(BinancePlacementGateway { api: api.clone(), flavor });
        let canceller = OrderCanceller::new(BinanceCancellationGateway { api: api.clone() }).with_pre_check(false);
        Self { api, streams, flavor, placer, canceller }
    }

    pub fn flavor(&self) -> BinanceFlavor {
        self.flavor
    }
}

#[async_trait(?Send)]
impl Exchange for BinanceExchange {
    fn prefix(&self) -> &str {
        BINANCE_PREFIX
    }

    fn name(&self) -> &str {
        self.flavor.name()
    }

    async fn round_price(
        &self,
        _ctx: &CancellationToken,
        _symbol: &str,
        price: Fixed,
        tick_size: Option<&str>,
    ) -> Result<Fixed> {
        floor_to_precision(price, tick_size, "price")
    }

    async fn round_quantity(&self, _ctx: &CancellationToken, _symbol: &str, quantity: Fixed) -> Result<Fixed> {
        floor_to_precision(quantity, None, "quantity")
    }

    async fn place_order(&self, ctx: &CancellationToken, is_retry: bool, order: &NewOrder) -> Result<String> {
        let timer = PerfTimer::start(format!("binance place {}", order.client_order_id));
        let result = self.placer.place(ctx, is_retry, order).await;
        timer.log_elapsed();
        result
    }

    async fn cancel_order(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()> {
        self.canceller.cancel(ctx, to_binance_symbol(symbol), id).await
    }

    async fn release_order(&self, _ctx: &CancellationToken, _symbol: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<Fixed> {
        let binance_symbol = to_binance_symbol(symbol);
        let stats = self
            .api
            .ticker(ctx, binance_symbol)
            .await
            .context("can't do request")?
            .ok_or_else(|| ExchangeError::InvalidResponse("empty result".to_string()))?;
        if stats.symbol != binance_symbol {
            return Err(ExchangeError::InvalidResponse(format!(
                "got result for another symbol: {}",
                to_full_symbol(&stats.symbol)
            )));
        }
        Fixed::from_str_exact(&stats.last_price)
            .map_err(|e| ExchangeError::from(e).context(format!("can't convert price from '{}'", stats.last_price)))
    }

    /// Binance ids are client order ids.
    async fn get_order_info(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        self.get_order_info_by_client_order_id(ctx, symbol, id, created_at).await
    }

    async fn get_order_info_by_client_order_id(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
        _created_at: Option<DateTime<Utc>>,
    ) -> Result<OrderInfo> {
        let order = get_order(self.api.as_ref(), ctx, to_binance_symbol(symbol), client_order_id)
            .await
            .context("can't query order")?;
        Ok(order.info())
    }

    async fn get_tradable_symbols(&self, ctx: &CancellationToken) -> Result<Vec<SymbolInfo>> {
        let info = self.api.exchange_info(ctx).await.context("unable to do ExchangeInfo request")?;
        let symbols: Vec<SymbolInfo> = info
            .symbols
            .iter()
            .filter(|s| !self.flavor.is_spot() || s.is_spot_trading_allowed == Some(true))
            .map(|s| s.to_symbol_info())
            .collect();
        debug!("📋 {} tradable {} symbols", symbols.len(), self.flavor.name());
        Ok(symbols)
    }

    async fn watch_orders_statuses(&self, ctx: &CancellationToken) -> Result<EventStream<OrderEventPayload>> {
        self.streams.orders(ctx.clone()).await
    }

    async fn watch_symbol_price(&self, ctx: &CancellationToken, symbol: &str) -> Result<EventStream<Fixed>> {
        self.streams.prices(ctx.clone(), to_binance_symbol(symbol).to_string()).await
    }

    async fn watch_account_positions(&self, ctx: &CancellationToken) -> Result<EventStream<Vec<PositionPayload>>> {
        self.streams.positions(ctx.clone()).await
    }

    async fn get_open_orders(&self, ctx: &CancellationToken) -> Result<Vec<OrderDetailInfo>> {
        let orders = self.api.open_orders(ctx, None).await.context("can't query open order")?;
        orders.iter().map(order_detail).collect()
    }

    async fn get_orders(&self, ctx: &CancellationToken, filter: &OrderFilter) -> Result<Vec<OrderDetailInfo>> {
        let symbol = filter
            .symbol
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExchangeError::InvalidSymbol("symbol is empty!".to_string()))?;
        let binance_symbol = to_binance_symbol(symbol);

        let order_ref = match (filter.client_order_id.as_deref(), filter.order_id.as_deref()) {
            (Some(client_order_id), _) => Some(OrderRef::ClientOrderId(client_order_id)),
            (None, Some(order_id)) => Some(OrderRef::OrderId(order_id)),
            (None, None) => None,
        };
        let orders = match order_ref {
            Some(order_ref) => vec![self.api.get_order(ctx, binance_symbol, order_ref).await.context("can't query order")?],
            None => self.api.all_orders(ctx, binance_symbol).await.context("can't query orders")?,
        };
        orders.iter().map(order_detail).collect()
    }

    /// Spot accounts report balances, futures accounts report positions.
    async fn get_account(&self, ctx: &CancellationToken) -> Result<Account> {
        let data = self.api.account(ctx).await.context("can't get account")?;
        let mut account = Account::default();
        match self.flavor {
            BinanceFlavor::Spot | BinanceFlavor::Us => {
                account.balances = data.balances.iter().map(|b| b.to_balance()).collect::<Result<_>>()?;
            }
            BinanceFlavor::Futures => {
                account.positions =
                    data.positions.iter().map(|p| p.to_account_position()).collect::<Result<_>>()?;
            }
        }
        Ok(account)
    }

    fn generate_client_order_id(&self, identifier: &str) -> Result<String> {
        let id = generate_prefixed_client_order_id(self.flavor.link_prefix(), identifier);
        if id.len() > MAX_CLIENT_ORDER_ID_LEN {
            return Err(ExchangeError::InvalidOrder(format!(
                "client order id {id} is longer than {MAX_CLIENT_ORDER_ID_LEN} characters"
            )));
        }
        Ok(id)
    }
}
