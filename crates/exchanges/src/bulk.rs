//! Bulk cancellation for exchanges without a native batch endpoint

use async_trait::async_trait;
use tracing::warn;

use unitrade_core::CancellationToken;

use crate::errors::Result;
use crate::traits::{BulkCancelExchange, Exchange};
use crate::types::BulkCancelResult;

/// Cancels orders one at a time through `Exchange::cancel_order`.
pub struct SequentialBulkCancel<'a, E: ?Sized> {
    exchange: &'a E,
}

impl<'a, E: Exchange + ?Sized> SequentialBulkCancel<'a, E> {
    pub fn new(exchange: &'a E) -> Self {
        Self { exchange }
    }
}

#[async_trait(?Send)]
impl<E: Exchange + ?Sized> BulkCancelExchange for SequentialBulkCancel<'_, E> {
    async fn bulk_cancel_orders(
        &self,
        ctx: &CancellationToken,
        symbol: &str,
        ids: &[String],
    ) -> Result<Vec<BulkCancelResult>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let error = match self.exchange.cancel_order(ctx, symbol, id).await {
                Ok(()) => None,
                Err(e) => {
                    warn!("⚠️ bulk cancel of {} failed: {}", id, e);
                    Some(e.context(format!("can't cancel order (OrderID={id})")))
                }
            };
            results.push(BulkCancelResult { id: id.clone(), error });
        }
        Ok(results)
    }
}
