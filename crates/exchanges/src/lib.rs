//! # Unitrade Exchange Adapters
//!
//! One `Exchange` interface over Phemex contracts and Binance spot/futures.
//!
//! ## Architecture
//!
//! - **monoio-native transport** - HTTPS and WebSocket over rustls, one thread per core
//! - **Order reconciliation** - placement and cancellation survive ambiguous responses
//! - **Reconnecting streams** - order, price and position events with reconnect markers
//! - **Retrying decorator** - bounded, jittered retries around any adapter
//! - **Fixed-point arithmetic** - exact decimals for prices and quantities

#[cfg(feature = "binance")]
pub mod binance;
pub mod bulk;
pub mod errors;
pub mod events;
pub mod http;
pub mod orders;
#[cfg(feature = "phemex")]
pub mod phemex;
pub mod reconnect;
pub mod retrying;
pub mod session;
pub mod traits;
pub mod types;
pub mod websocket;

#[cfg(feature = "binance")]
pub use binance::{BinanceConfig, BinanceExchange, BinanceFlavor};
pub use bulk::SequentialBulkCancel;
pub use errors::{ExchangeError, Result, ResultExt};
pub use events::{Event, EventStream, OrderEvent, PositionEvent, PriceEvent};
pub use http::HttpsClient;
#[cfg(feature = "phemex")]
pub use phemex::{PhemexConfig, PhemexContract};
pub use reconnect::EventReconnector;
pub use retrying::RetryingExchange;
pub use traits::{BulkCancelExchange, Exchange};
pub use types::*;
pub use websocket::MonoioWebSocket;

/// Prelude for convenient imports
pub mod prelude {
    #[cfg(feature = "binance")]
    pub use crate::binance::{BinanceConfig, BinanceExchange, BinanceFlavor};
    pub use crate::errors::{ExchangeError, Result, ResultExt};
    pub use crate::events::{Event, EventStream};
    #[cfg(feature = "phemex")]
    pub use crate::phemex::{PhemexConfig, PhemexContract};
    pub use crate::retrying::RetryingExchange;
    pub use crate::traits::{BulkCancelExchange, Exchange};
    pub use crate::types::*;
    pub use unitrade_core::prelude::*;
}
