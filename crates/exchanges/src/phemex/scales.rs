//! Per-symbol price scales
//!
//! Phemex prices travel as scaled integers (`priceEp = price * 10^priceScale`). The
//! scales come from the product list and are refreshed in the background. After too
//! many consecutive refresh failures the scales are dropped, so stale precision is
//! never used to price an order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use unitrade_core::{CancellationToken, Fixed, sleep_or_cancelled};

use crate::errors::{ExchangeError, Result};

use super::api::PhemexApi;
use super::models::{PERPETUAL_PRODUCT_TYPE, Product};

/// Consecutive refresh failures tolerated before the scales are erased.
pub const MAX_SEQUENTIAL_ERRORS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolScale {
    pub price_scale: u32,
}

impl SymbolScale {
    pub fn price_to_ep(&self, price: Fixed) -> Result<i64> {
        Ok(price.to_scaled_i64(self.price_scale)?)
    }

    pub fn ep_to_price(&self, price_ep: i64) -> Result<Fixed> {
        Ok(Fixed::from_scaled(price_ep, self.price_scale)?)
    }

    /// Round to the nearest representable price.
    pub fn round_price(&self, price: Fixed) -> Result<Fixed> {
        self.ep_to_price(self.price_to_ep(price)?)
    }
}

#[derive(Default)]
struct ScalesState {
    scales: HashMap<String, SymbolScale>,
    sequential_errors: u32,
}

pub struct ScalesService {
    api: Arc<dyn PhemexApi>,
    state: RwLock<ScalesState>,
    refresh_interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl ScalesService {
    pub fn new(api: Arc<dyn PhemexApi>, refresh_interval: Duration) -> Self {
        Self {
            api,
            state: RwLock::new(ScalesState::default()),
            refresh_interval,
            running: Mutex::new(None),
        }
    }

    /// Load the scales once and keep refreshing them until `stop` or `ctx` is cancelled.
    pub async fn start(self: &Arc<Self>, ctx: &CancellationToken) -> Result<()> {
        self.refresh(ctx).await?;

        let token = ctx.child_token();
        if let Some(previous) = self.lock_running().replace(token.clone()) {
            previous.cancel();
        }

        let service = self.clone();
        monoio::spawn(async move {
            while sleep_or_cancelled(&token, service.refresh_interval).await {
                if let Err(e) = service.refresh(&token).await {
                    if e.is_cancelled() {
                        break;
                    }
                    warn!("⚠️ Phemex scales refresh failed: {}", e);
                }
            }
            debug!("🛑 Phemex scales refresher stopped");
        });
        info!("📐 Phemex scales service started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(token) = self.lock_running().take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Fetch the product list and replace the scales. Failures are counted; past
    /// `MAX_SEQUENTIAL_ERRORS` the current scales are erased.
    pub async fn refresh(&self, ctx: &CancellationToken) -> Result<()> {
        match self.api.products(ctx).await.and_then(|p| collect_scales(&p)) {
            Ok(scales) => {
                let mut state = self.write();
                debug!("📐 loaded {} Phemex price scales", scales.len());
                state.scales = scales;
                state.sequential_errors = 0;
                Ok(())
            }
            Err(e) => {
                if !e.is_cancelled() {
                    let mut state = self.write();
                    state.sequential_errors += 1;
                    if state.sequential_errors > MAX_SEQUENTIAL_ERRORS {
                        warn!("⚠️ {} Phemex scales refreshes failed in a row, erasing scales", state.sequential_errors);
                        state.scales.clear();
                    }
                }
                Err(e.context("can't refresh scales"))
            }
        }
    }

    /// Fetch now if nothing is loaded.
    pub async fn check_or_update(&self, ctx: &CancellationToken) -> Result<()> {
        if self.read().scales.is_empty() {
            self.refresh(ctx).await?;
        }
        Ok(())
    }

    pub fn get(&self, phemex_symbol: &str) -> Result<SymbolScale> {
        let state = self.read();
        if state.scales.is_empty() {
            return Err(ExchangeError::ConfigurationError("scales are empty".to_string()));
        }
        state.scales.get(phemex_symbol).copied().ok_or_else(|| {
            ExchangeError::ConfigurationError(format!("scales for symbol {phemex_symbol} not found"))
        })
    }

    pub async fn scale_for(&self, ctx: &CancellationToken, phemex_symbol: &str) -> Result<SymbolScale> {
        self.check_or_update(ctx).await?;
        self.get(phemex_symbol).map_err(|e| e.context("get scales error"))
    }

    pub async fn price_to_ep(&self, ctx: &CancellationToken, phemex_symbol: &str, price: Fixed) -> Result<i64> {
        self.scale_for(ctx, phemex_symbol).await?.price_to_ep(price)
    }

    /// Install scales directly, bypassing the product list.
    pub fn set_scales(&self, scales: HashMap<String, SymbolScale>) {
        let mut state = self.write();
        state.scales = scales;
        state.sequential_errors = 0;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScalesState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScalesState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ScalesService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_scales(products: &[Product]) -> Result<HashMap<String, SymbolScale>> {
    products
        .iter()
        .filter(|p| p.product_type == PERPETUAL_PRODUCT_TYPE)
        .map(|p| {
            let price_scale = u32::try_from(p.price_scale).map_err(|_| {
                ExchangeError::InvalidResponse(format!("negative price scale {} for {}", p.price_scale, p.symbol))
            })?;
            Ok((p.symbol.clone(), SymbolScale { price_scale }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use crate::phemex::api::OrderRef;
    use crate::phemex::models::{AccountPositionsData, OrderFields, OrderResponse, TickerResult};

    #[derive(Default)]
    struct ProductsOnly {
        responses: RefCell<VecDeque<Result<Vec<Product>>>>,
        calls: Cell<u32>,
    }

    impl ProductsOnly {
        fn push(&self, r: Result<Vec<Product>>) {
            self.responses.borrow_mut().push_back(r);
        }
    }

    fn unsupported<T>() -> Result<T> {
        Err(ExchangeError::UnsupportedMethod("not used in this test".into()))
    }

    #[async_trait(?Send)]
    impl PhemexApi for ProductsOnly {
        async fn query_order(&self, _: &CancellationToken, _: &str, _: OrderRef<'_>) -> Result<Vec<OrderResponse>> {
            unsupported()
        }
        async fn create_order(&self, _: &CancellationToken, _: &OrderFields) -> Result<OrderResponse> {
            unsupported()
        }
        async fn cancel_order(&self, _: &CancellationToken, _: &str, _: &str) -> Result<OrderResponse> {
            unsupported()
        }
        async fn open_orders(&self, _: &CancellationToken, _: Option<&str>) -> Result<Vec<OrderResponse>> {
            unsupported()
        }
        async fn closed_orders(&self, _: &CancellationToken, _: &str) -> Result<Vec<OrderResponse>> {
            unsupported()
        }
        async fn products(&self, _: &CancellationToken) -> Result<Vec<Product>> {
            self.calls.set(self.calls.get() + 1);
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ExchangeError::NetworkError("down".into())))
        }
        async fn ticker(&self, _: &CancellationToken, _: &str) -> Result<TickerResult> {
            unsupported()
        }
        async fn account_positions(&self, _: &CancellationToken, _: &str) -> Result<AccountPositionsData> {
            unsupported()
        }
    }

    fn product(symbol: &str, product_type: &str, price_scale: i64) -> Product {
        Product {
            symbol: symbol.into(),
            product_type: product_type.into(),
            price_scale,
            status: "Listed".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_scale_conversion() {
        let scale = SymbolScale { price_scale: 4 };
        let price = Fixed::from_str_exact("9897.12345").unwrap();
        assert_eq!(scale.price_to_ep(price).unwrap(), 98_971_235);
        assert_eq!(scale.round_price(price).unwrap(), Fixed::from_str_exact("9897.1235").unwrap());
        assert_eq!(scale.ep_to_price(98_970_000).unwrap(), Fixed::from_i64(9897));
    }

    #[monoio::test]
    async fn test_check_or_update_fetches_when_empty() {
        let api = Arc::new(ProductsOnly::default());
        api.push(Ok(vec![product("BTCUSD", "Perpetual", 4), product("sBTCUSDT", "Spot", 8)]));
        let service = ScalesService::new(api.clone(), Duration::from_secs(300));

        let ctx = CancellationToken::new();
        assert_eq!(service.price_to_ep(&ctx, "BTCUSD", Fixed::from_i64(10)).await.unwrap(), 100_000);
        assert_eq!(api.calls.get(), 1);

        // Loaded: no second fetch.
        service.price_to_ep(&ctx, "BTCUSD", Fixed::from_i64(11)).await.unwrap();
        assert_eq!(api.calls.get(), 1);

        let err = service.get("sBTCUSDT").unwrap_err();
        assert!(err.to_string().contains("scales for symbol sBTCUSDT not found"));
    }

    #[test]
    fn test_empty_scales_error() {
        let service = ScalesService::new(Arc::new(ProductsOnly::default()), Duration::from_secs(300));
        assert_eq!(service.get("BTCUSD").unwrap_err(), ExchangeError::ConfigurationError("scales are empty".into()));
    }

    #[monoio::test]
    async fn test_scales_erased_after_too_many_failures() {
        let api = Arc::new(ProductsOnly::default());
        api.push(Ok(vec![product("BTCUSD", "Perpetual", 4)]));
        let service = ScalesService::new(api.clone(), Duration::from_secs(300));
        let ctx = CancellationToken::new();
        service.refresh(&ctx).await.unwrap();

        for _ in 0..MAX_SEQUENTIAL_ERRORS {
            assert!(service.refresh(&ctx).await.is_err());
        }
        assert!(service.get("BTCUSD").is_ok());

        assert!(service.refresh(&ctx).await.is_err());
        assert!(service.get("BTCUSD").is_err());
    }

    #[monoio::test]
    async fn test_negative_scale_is_an_error() {
        let api = Arc::new(ProductsOnly::default());
        api.push(Ok(vec![product("BTCUSD", "Perpetual", -1)]));
        let service = ScalesService::new(api, Duration::from_secs(300));
        assert!(service.refresh(&CancellationToken::new()).await.is_err());
    }

    #[monoio::test(enable_timer = true)]
    async fn test_start_and_stop() {
        let api = Arc::new(ProductsOnly::default());
        api.push(Ok(vec![product("BTCUSD", "Perpetual", 4)]));
        let service = Arc::new(ScalesService::new(api, Duration::from_secs(300)));

        service.start(&CancellationToken::new()).await.unwrap();
        assert!(service.is_running());
        assert_eq!(service.get("BTCUSD").unwrap().price_scale, 4);

        service.stop();
        assert!(!service.is_running());
    }
}
