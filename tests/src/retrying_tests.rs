//! `RetryingExchange` over a scripted adapter

use unitrade_exchanges::prelude::*;

use crate::support::{ScriptedExchange, fast_policy, network_error};

fn decorated(exchange: ScriptedExchange) -> RetryingExchange<ScriptedExchange> {
    RetryingExchange::new(exchange)
        .with_call_policy(fast_policy(3))
        .with_cancel_policy(fast_policy(5))
        .with_reconnect_policy(fast_policy(2))
}

fn order() -> NewOrder {
    NewOrder::limit("TEST-BTCUSD", OrderSide::Buy, Fixed::from_i64(30_000), Fixed::ONE, "RUN1-0a0b0c0d")
}

#[monoio::test(enable_timer = true)]
async fn test_placement_retries_with_reconciliation() {
    let exchange = decorated(ScriptedExchange::new().on_place(Err(network_error())).on_place(Ok("42".into())));

    let id = exchange.place_order(&CancellationToken::new(), false, &order()).await.unwrap();

    assert_eq!(id, "42");
    assert_eq!(*exchange.target().place_flags.borrow(), vec![false, true]);
}

#[monoio::test(enable_timer = true)]
async fn test_placement_gives_up_after_budget() {
    let exchange = decorated(ScriptedExchange::new());

    let err = exchange.place_order(&CancellationToken::new(), false, &order()).await.unwrap_err();

    assert!(matches!(err, ExchangeError::NetworkError(_)));
    assert_eq!(exchange.target().place_flags.borrow().len(), 3);
}

#[monoio::test(enable_timer = true)]
async fn test_placement_keeps_caller_retry_flag() {
    let exchange = decorated(ScriptedExchange::new().on_place(Ok("7".into())));

    exchange.place_order(&CancellationToken::new(), true, &order()).await.unwrap();

    assert_eq!(*exchange.target().place_flags.borrow(), vec![true]);
}

#[monoio::test(enable_timer = true)]
async fn test_cancel_stops_on_executed_order() {
    let exchange = decorated(
        ScriptedExchange::new()
            .on_cancel(Err(ExchangeError::OrderExecuted))
            .on_cancel(Ok(())),
    );

    let err = exchange.cancel_order(&CancellationToken::new(), "TEST-BTCUSD", "42").await.unwrap_err();

    assert!(err.is_order_executed());
    assert_eq!(exchange.target().cancel_calls.borrow().len(), 1);
}

#[monoio::test(enable_timer = true)]
async fn test_cancel_uses_longer_budget() {
    let exchange = decorated(
        ScriptedExchange::new()
            .on_cancel(Err(network_error()))
            .on_cancel(Err(network_error()))
            .on_cancel(Err(network_error()))
            .on_cancel(Ok(())),
    );

    exchange.cancel_order(&CancellationToken::new(), "TEST-BTCUSD", "42").await.unwrap();

    assert_eq!(exchange.target().cancel_calls.borrow().len(), 4);
}

#[monoio::test(enable_timer = true)]
async fn test_cancelled_context_skips_calls() {
    let exchange = decorated(ScriptedExchange::new().on_price(Ok(Fixed::ONE)));
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = exchange.get_price(&ctx, "TEST-BTCUSD").await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(exchange.target().price_results.borrow().len(), 1);
}

#[monoio::test(enable_timer = true)]
async fn test_passthrough_calls() {
    let exchange = decorated(ScriptedExchange::new());
    let ctx = CancellationToken::new();

    assert_eq!(exchange.prefix(), "TEST-");
    assert_eq!(exchange.name(), "Scripted");
    let price = Fixed::from_str_exact("101.239").unwrap();
    assert_eq!(exchange.round_price(&ctx, "TEST-BTCUSD", price, None).await.unwrap().to_string(), "101.23");
    assert!(exchange.generate_client_order_id("5").unwrap().starts_with("RUN5-"));
}

fn price_session(prices: &[i64], disconnect: bool) -> EventStream<Fixed> {
    let (tx, rx) = flume::bounded(16);
    for p in prices {
        tx.send(Event::Payload(Fixed::from_i64(*p))).unwrap();
    }
    if disconnect {
        tx.send(Event::Disconnected(network_error())).unwrap();
    }
    rx
}

#[monoio::test(enable_timer = true)]
async fn test_price_stream_reconnects_then_reports_exhaustion() {
    let exchange = decorated(
        ScriptedExchange::new()
            .on_price_stream(Ok(price_session(&[1], true)))
            .on_price_stream(Ok(price_session(&[2], false))),
    );

    let rx = exchange.watch_symbol_price(&CancellationToken::new(), "TEST-BTCUSD").await.unwrap();
    let mut events = Vec::new();
    while let Ok(ev) = rx.recv_async().await {
        events.push(ev);
    }

    assert_eq!(events.len(), 4, "{events:?}");
    assert_eq!(events[0], Event::Payload(Fixed::from_i64(1)));
    assert_eq!(events[1], Event::Reconnected);
    assert_eq!(events[2], Event::Payload(Fixed::from_i64(2)));
    assert!(events[3].is_disconnected());
    // first connect, one successful reconnect, two failed attempts
    assert_eq!(exchange.target().price_connects.get(), 4);
}

#[monoio::test(enable_timer = true)]
async fn test_price_stream_first_connect_error() {
    let exchange = decorated(ScriptedExchange::new().on_price_stream(Err(ExchangeError::Api {
        code: 10500,
        msg: "subscription refused".into(),
    })));

    let err = exchange.watch_symbol_price(&CancellationToken::new(), "TEST-BTCUSD").await.unwrap_err();

    assert_eq!(err.api_code(), Some(10500));
    assert_eq!(exchange.target().price_connects.get(), 1);
}
