//! Order reconciliation shared by every adapter

pub mod cache;
pub mod canceller;
pub mod placer;

pub use cache::{
    CachedOrder, DEFAULT_FINAL_ORDER_TTL, OrderTracker, OrdersCache, SymbolClientOrderId, SymbolOrderId,
    TrackOutcome,
};
pub use canceller::{CancellationGateway, OrderCanceller, cancellation_status_to_result};
pub use placer::{OrderPlacer, PlacementGateway};
