//! Adapter configuration, credentials and live testnet smoke checks
//!
//! Tests touching process environment run under `#[serial]`. The live tests are
//! ignored by default; run them with `cargo test -- --ignored` and credentials in
//! `.env`.

use std::time::Duration;

use rstest::*;
use serial_test::serial;

use unitrade_exchanges::binance::{BinanceCredentials, BinanceExchange};
use unitrade_exchanges::phemex::PhemexCredentials;
use unitrade_exchanges::prelude::*;

#[fixture]
fn binance_testnet() -> BinanceConfig {
    BinanceConfig::spot().testnet()
}

#[rstest]
#[case(1, true)]
#[case(5000, true)]
#[case(60_000, true)]
#[case(0, false)]
#[case(60_001, false)]
fn test_recv_window_bounds(binance_testnet: BinanceConfig, #[case] recv_window: u64, #[case] valid: bool) {
    let result = binance_testnet.with_recv_window(recv_window).validate();
    assert_eq!(result.is_ok(), valid, "{result:?}");
}

#[rstest]
#[case(BinanceConfig::spot(), "Binance Spot", "x-INHON5QW_")]
#[case(BinanceConfig::futures(), "Binance Futures", "x-9Oc4JrZL_")]
#[case(BinanceConfig::us(), "Binance US", "RUN3-")]
fn test_binance_flavors(#[case] config: BinanceConfig, #[case] name: &str, #[case] link_prefix: &str) {
    let exchange = BinanceExchange::new(config).unwrap();
    assert_eq!(exchange.name(), name);
    assert_eq!(exchange.prefix(), "BN-");
    assert!(exchange.generate_client_order_id("3").unwrap().starts_with(link_prefix));
}

#[rstest]
#[case(PhemexConfig::default(), "https://api.phemex.com")]
#[case(PhemexConfig::testnet(), "https://testnet-api.phemex.com")]
fn test_phemex_endpoints(#[case] config: PhemexConfig, #[case] base_url: &str) {
    assert_eq!(config.base_url, base_url);
    assert!(config.validate().is_ok());
    assert!(config.with_rate_limits(0, 100).validate().is_err());
}

#[test]
fn test_binance_us_endpoints() {
    let config = BinanceConfig::us();
    assert_eq!(config.flavor, BinanceFlavor::Us);
    assert_eq!(config.base_url, "https://api.binance.us");
    assert_eq!(config.ws_url, "wss://stream.binance.us:9443/ws");
    assert!(config.validate().is_ok());
    assert_eq!(config.testnet().base_url, "https://api.binance.us");
}

#[rstest]
fn test_zero_listen_key_keepalive_rejected(binance_testnet: BinanceConfig) {
    let err = binance_testnet.with_listen_key_keepalive(Duration::ZERO).validate().unwrap_err();
    assert!(matches!(err, ExchangeError::ConfigurationError(_)));
}

#[test]
#[serial]
fn test_env_credentials_round_trip() {
    std::env::set_var("BINANCE_API_KEY", "binance-key");
    std::env::set_var("BINANCE_SECRET_KEY", "binance-secret");
    std::env::set_var("PHEMEX_API_KEY", "phemex-key");
    std::env::set_var("PHEMEX_SECRET_KEY", "phemex-secret");

    let binance = BinanceConfig::futures().with_env_credentials().unwrap();
    assert_eq!(binance.api_key, "binance-key");
    assert!(binance.credentials().is_valid());

    let phemex = PhemexConfig::default().with_env_credentials().unwrap();
    assert_eq!(phemex.api_secret, "phemex-secret");
    assert!(phemex.credentials().is_valid());

    std::env::remove_var("BINANCE_API_KEY");
    std::env::remove_var("BINANCE_SECRET_KEY");
    std::env::remove_var("PHEMEX_API_KEY");
    std::env::remove_var("PHEMEX_SECRET_KEY");
}

#[test]
#[serial]
fn test_missing_env_credentials() {
    std::env::remove_var("BINANCE_API_KEY");
    std::env::remove_var("PHEMEX_SECRET_KEY");

    let err = BinanceCredentials::from_env().unwrap_err();
    assert_eq!(err, ExchangeError::MissingCredentials("BINANCE_API_KEY".to_string()));
    assert!(PhemexCredentials::from_env().is_err());
}

async fn live_price_and_symbols(config: BinanceConfig) -> anyhow::Result<(Fixed, Vec<SymbolInfo>)> {
    let exchange = RetryingExchange::new(BinanceExchange::new(config)?);
    let ctx = CancellationToken::new();
    let price = exchange.get_price(&ctx, "BN-BTCUSDT").await?;
    let symbols = exchange.get_tradable_symbols(&ctx).await?;
    Ok((price, symbols))
}

async fn live_account(config: BinanceConfig) -> anyhow::Result<Account> {
    let exchange = BinanceExchange::new(config.with_env_credentials()?)?;
    Ok(exchange.get_account(&CancellationToken::new()).await?)
}

#[rstest]
#[monoio::test(enable_timer = true)]
#[ignore = "hits the Binance spot testnet"]
async fn test_live_binance_price(binance_testnet: BinanceConfig) {
    dotenv::dotenv().ok();
    init_logging();

    let (price, symbols) = live_price_and_symbols(binance_testnet).await.unwrap();
    assert!(price > Fixed::ZERO);
    assert!(symbols.iter().any(|s| s.symbol == "BN-BTCUSDT"));
}

#[rstest]
#[monoio::test(enable_timer = true)]
#[ignore = "needs BINANCE_API_KEY/BINANCE_SECRET_KEY for the spot testnet"]
async fn test_live_binance_account(binance_testnet: BinanceConfig) {
    dotenv::dotenv().ok();
    init_logging();

    let account = live_account(binance_testnet).await.unwrap();
    assert!(account.positions.is_empty());
}
