//! Order placement with reconciliation
//!
//! Exchanges do not guarantee idempotent placement by client order id. A resend
//! can be bounced while the first submission is live, and a timeout says nothing
//! about whether the order landed. `OrderPlacer` resolves both cases by looking
//! the order up and comparing it field by field with what was requested.

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use unitrade_core::CancellationToken;

use crate::errors::{ExchangeError, Result};
use crate::types::{NewOrder, OrderInfo, OrderStatus};

/// Exchange-specific half of placement.
#[async_trait(?Send)]
pub trait PlacementGateway {
    /// Immutable request snapshot, comparable with what the exchange reports back.
    type Request: PartialEq + fmt::Debug;

    async fn create_request(&self, ctx: &CancellationToken, order: &NewOrder) -> Result<Self::Request>;

    fn symbol<'a>(&self, request: &'a Self::Request) -> &'a str;

    fn client_order_id<'a>(&self, request: &'a Self::Request) -> &'a str;

    /// Submit the order. Admission bounces must surface as `NewOrderRejected`.
    async fn submit(&self, ctx: &CancellationToken, request: &Self::Request) -> Result<String>;

    /// Look the order up by client order id and re-express it as a request.
    /// `OrderNotFound` when the exchange has no such order.
    async fn lookup(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(OrderInfo, Self::Request)>;
}

pub struct OrderPlacer<G> {
    gateway: G,
}

impl<G: PlacementGateway> OrderPlacer<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the order id, or one of `NewOrderRejected`, `OrderCollision`, or the
    /// transport error. With `is_retry` an already placed identical order is
    /// returned instead of being submitted twice.
    pub async fn place(&self, ctx: &CancellationToken, is_retry: bool, order: &NewOrder) -> Result<String> {
        let request = self
            .gateway
            .create_request(ctx, order)
            .await
            .map_err(|e| e.context("can't create order req"))?;

        if is_retry {
            match self.fetch_and_compare(ctx, &request).await {
                Ok(id) => {
                    debug!("♻️ order {} already placed as {}", order.client_order_id, id);
                    return Ok(id);
                }
                Err(e) if e.is_order_not_found() => {}
                Err(e) => return Err(e.context("first fetch and compare order")),
            }
        }

        let place_err = match self.gateway.submit(ctx, &request).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_rejected() => e,
            Err(e) => return Err(e),
        };

        match self.fetch_and_compare(ctx, &request).await {
            Ok(id) => {
                debug!(
                    "📌 order {} went through despite rejection: {}",
                    order.client_order_id, place_err
                );
                Ok(id)
            }
            Err(e) if e.is_order_not_found() || e.is_rejected() => Err(place_err),
            Err(e) => Err(place_err.with_subreason("second fetch and compare order", e)),
        }
    }

    async fn fetch_and_compare(&self, ctx: &CancellationToken, request: &G::Request) -> Result<String> {
        let symbol = self.gateway.symbol(request);
        let client_order_id = self.gateway.client_order_id(request);

        let (info, placed) = match self.gateway.lookup(ctx, symbol, client_order_id).await {
            Ok(found) => found,
            Err(e) if e.is_order_not_found() => return Err(e),
            Err(e) => return Err(e.context("can't fetch order")),
        };

        if &placed != request {
            warn!(
                "⚠️ order with same ClientOrderID is different: req={:?} resp={:?}",
                request, placed
            );
            return Err(ExchangeError::OrderCollision {
                client_order_id: client_order_id.to_string(),
            });
        }
        if info.status == OrderStatus::Rejected {
            return Err(ExchangeError::NewOrderRejected(
                "order have status = REJECTED".to_string(),
            ));
        }
        Ok(info.id)
    }
}
