//! Order cancellation with reconciliation
//!
//! A cancel races against fills and against the exchange forgetting old orders.
//! `OrderCanceller` always resolves to success, `OrderExecuted`, or a named error,
//! consulting the order's status before and after the request when needed.

use async_trait::async_trait;
use tracing::debug;

use unitrade_core::CancellationToken;

use crate::errors::{ExchangeError, Result};
use crate::types::OrderStatus;

/// Exchange-specific half of cancellation.
#[async_trait(?Send)]
pub trait CancellationGateway {
    /// Current status from the stream cache or REST. `OrderNotFound` when unknown.
    async fn order_status(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<OrderStatus>;

    /// Send the cancel request. `OrderNotFound` when the exchange reports the order
    /// missing; `Some(status)` when the response carries the resulting status.
    async fn send_cancel(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<Option<OrderStatus>>;
}

pub struct OrderCanceller<G> {
    gateway: G,
    pre_check: bool,
}

impl<G: CancellationGateway> OrderCanceller<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway, pre_check: true }
    }

    /// Look the order up before cancelling. Needed where a repeated cancel makes the
    /// exchange drop the order entirely.
    pub fn with_pre_check(mut self, pre_check: bool) -> Self {
        self.pre_check = pre_check;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub async fn cancel(&self, ctx: &CancellationToken, symbol: &str, id: &str) -> Result<()> {
        if self.pre_check {
            match self.gateway.order_status(ctx, symbol, id).await {
                Ok(status) => {
                    if is_already_canceled(status)? {
                        debug!("🧹 order {} already {}, skipping cancel", id, status);
                        return Ok(());
                    }
                }
                Err(e) if e.is_order_not_found() => {}
                Err(e) => return Err(e.context("can't make order status pre-cancel check")),
            }
        }

        match self.gateway.send_cancel(ctx, symbol, id).await {
            Ok(None) | Ok(Some(OrderStatus::Canceled)) => return Ok(()),
            Ok(Some(status)) => {
                return Err(ExchangeError::InconsistentResponse(format!(
                    "cancel of {id} returned status {status}"
                )));
            }
            Err(e) if e.is_order_not_found() => {
                debug!("🔎 cancel of {} reported not found, checking status", id);
            }
            Err(e) => return Err(e),
        }

        let status = self
            .gateway
            .order_status(ctx, symbol, id)
            .await
            .map_err(|e| {
                if e.is_order_not_found() {
                    e.context("can't check orders status (order can be removed)")
                } else {
                    e.context("can't make order status post-cancel check")
                }
            })?;
        cancellation_status_to_result(status)
    }
}

/// Pre-check mapping: `true` when there is nothing left to cancel.
fn is_already_canceled(status: OrderStatus) -> Result<bool> {
    match status {
        OrderStatus::Filled => Err(ExchangeError::OrderExecuted),
        OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => Ok(true),
        OrderStatus::Unknown
        | OrderStatus::New
        | OrderStatus::PartiallyFilled
        | OrderStatus::Open
        | OrderStatus::Closed => Ok(false),
    }
}

/// Post-check mapping after the exchange said the order was not found.
pub fn cancellation_status_to_result(status: OrderStatus) -> Result<()> {
    match status {
        OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => Ok(()),
        OrderStatus::Filled => Err(ExchangeError::OrderExecuted),
        OrderStatus::New | OrderStatus::PartiallyFilled => {
            Err(ExchangeError::OrderNotCanceled(status.to_string()))
        }
        OrderStatus::Unknown | OrderStatus::Open | OrderStatus::Closed => Err(
            ExchangeError::InconsistentResponse(format!("order have {status} status")),
        ),
    }
}
