//! Unified logging integration
//!
//! ftlog backs the `log` facade when the `ftlog` feature is on; tracing-subscriber handles
//! `tracing` events either way. Initialization is idempotent.

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Initialize logging with `RUST_LOG` or `info` as the filter.
pub fn init_logging() {
    init_logging_with_level(Level::INFO);
}

/// Initialize logging, falling back to `level` when `RUST_LOG` is not set.
pub fn init_logging_with_level(level: Level) {
    INIT.call_once(|| {
        #[cfg(feature = "ftlog")]
        init_ftlog();

        init_tracing(level);
    });
}

#[cfg(feature = "ftlog")]
fn init_ftlog() {
    // A second logger may already own the `log` facade in tests.
    if let Err(e) = ftlog::builder()
        .max_log_level(ftlog::LevelFilter::Debug)
        .bounded(100_000, false)
        .utc()
        .try_init()
    {
        eprintln!("ftlog not initialized: {e}");
    }
}

fn init_tracing(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!("📝 Initialized logging at {}", level);
    }
}

#[macro_export]
macro_rules! log_order {
    ($action:expr, $order_id:expr, $symbol:expr) => {
        tracing::info!("📋 ORDER {}: {} ({})", $action, $order_id, $symbol);
    };
}

#[macro_export]
macro_rules! log_error {
    ($operation:expr, $error:expr) => {
        tracing::error!("❌ {} failed: {}", $operation, $error);
    };
}
