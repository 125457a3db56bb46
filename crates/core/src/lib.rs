//! # Unitrade Core
//!
//! Runtime-level building blocks shared by every exchange adapter.
//!
//! ## Architecture Principles
//!
//! 1. **Single-threaded async with monoio** - one runtime per core, no `Send` futures required
//! 2. **Cooperative cancellation** - every long-running call takes a `CancellationToken`
//! 3. **Bounded retries** - exponential backoff with jitter, last error wins
//! 4. **Minute-window rate limiting** - correctable from exchange response headers
//! 5. **Exact decimals** - prices and quantities never go through floating point
//! 6. **Unified logging** - ftlog and tracing behind one init call

pub mod fixed;
pub mod id_gen;
pub mod logging;
pub mod rate_limit;
pub mod retry;
pub mod timing;

pub use tokio_util::sync::CancellationToken;
pub use fixed::{Fixed, FixedError, numeric_eq};
pub use id_gen::{generate_client_order_id, generate_id};
pub use logging::{init_logging, init_logging_with_level};
pub use rate_limit::{ChangeableMinuteRateLimiter, MinuteRateLimiter};
pub use retry::{DelayType, RetryError, RetryPolicy, retry, retry_all, sleep_or_cancelled};
pub use timing::{Clock, ManualClock, PerfTimer, SystemClock, Timestamp, nanos};

/// Prelude module for convenient imports
pub mod prelude {
    pub use tokio_util::sync::CancellationToken;
    pub use crate::fixed::Fixed;
    pub use crate::logging::init_logging;
    pub use crate::retry::{RetryPolicy, retry};
    pub use crate::timing::{Clock, PerfTimer, SystemClock};

    pub use chrono::{DateTime, Utc};
    pub use monoio;
}
