use unitrade_exchanges::SequentialBulkCancel;
use unitrade_exchanges::prelude::*;

use crate::support::{ScriptedExchange, network_error};

#[monoio::test]
async fn test_bulk_cancel_reports_each_order() {
    let exchange = ScriptedExchange::new()
        .on_cancel(Ok(()))
        .on_cancel(Err(ExchangeError::OrderExecuted))
        .on_cancel(Err(network_error()));
    let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];

    let results = SequentialBulkCancel::new(&exchange)
        .bulk_cancel_orders(&CancellationToken::new(), "TEST-BTCUSD", &ids)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "a");
    assert!(results[0].error.is_none());

    let executed = results[1].error.as_ref().unwrap();
    assert!(executed.is_order_executed());
    assert!(executed.to_string().starts_with("can't cancel order (OrderID=b)"));

    assert!(results[2].error.is_some());
    assert_eq!(*exchange.cancel_calls.borrow(), ids);
}

#[monoio::test]
async fn test_bulk_cancel_through_trait_object() {
    let exchange: Box<dyn Exchange> = Box::new(ScriptedExchange::new().on_cancel(Ok(())));

    let results = SequentialBulkCancel::new(exchange.as_ref())
        .bulk_cancel_orders(&CancellationToken::new(), "TEST-BTCUSD", &["only".to_string()])
        .await
        .unwrap();

    assert_eq!(results, vec![BulkCancelResult { id: "only".into(), error: None }]);
}

#[monoio::test]
async fn test_bulk_cancel_empty() {
    let exchange = ScriptedExchange::new();
    let results = SequentialBulkCancel::new(&exchange)
        .bulk_cancel_orders(&CancellationToken::new(), "TEST-BTCUSD", &[])
        .await
        .unwrap();
    assert!(results.is_empty());
    assert!(exchange.cancel_calls.borrow().is_empty());
}
