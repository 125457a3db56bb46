//! Property-based checks on numeric handling, id generation and order tracking

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use unitrade_core::fixed::{numeric_eq, precision_from_tick_size};
use unitrade_core::id_gen::{BINANCE_FUTURES_LINK_PREFIX, generate_prefixed_client_order_id};
use unitrade_exchanges::orders::{CachedOrder, OrderTracker, SymbolClientOrderId, SymbolOrderId, TrackOutcome};
use unitrade_exchanges::prelude::*;

fn any_status() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::Unknown),
        Just(OrderStatus::New),
        Just(OrderStatus::PartiallyFilled),
        Just(OrderStatus::Filled),
        Just(OrderStatus::Canceled),
        Just(OrderStatus::Rejected),
        Just(OrderStatus::Expired),
    ]
}

proptest! {
    #[test]
    fn test_trailing_zeros_do_not_change_value(mantissa in -1_000_000_000i64..1_000_000_000, scale in 0u32..10, zeros in 1usize..6) {
        let value = Fixed::from_scaled(mantissa, scale)?;
        let text = value.to_flat_string();
        let padded = if text.contains('.') {
            format!("{text}{}", "0".repeat(zeros))
        } else {
            format!("{text}.{}", "0".repeat(zeros))
        };
        prop_assert!(numeric_eq(&text, &padded), "{} vs {}", text, padded);
    }

    #[test]
    fn test_numeric_eq_matches_value_equality(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        prop_assert_eq!(numeric_eq(&a.to_string(), &b.to_string()), a == b);
    }

    #[test]
    fn test_floor_never_rounds_up(mantissa in 0i64..10_000_000_000, scale in 0u32..12, dp in 0u32..8) {
        let value = Fixed::from_scaled(mantissa, scale)?;
        let floored = value.floor_dp(dp);
        prop_assert!(floored <= value);
        let step = Fixed::from_scaled(1, dp)?;
        prop_assert!(value - floored < step);
    }

    #[test]
    fn test_tick_precision_matches_scale(dp in 0u32..10, trailing in 0usize..4) {
        let tick = Fixed::from_scaled(1, dp)?.to_flat_string();
        let tick = if trailing > 0 && dp > 0 { format!("{tick}{}", "0".repeat(trailing)) } else { tick };
        prop_assert_eq!(precision_from_tick_size(&tick), Some(dp));
    }

    #[test]
    fn test_prefixed_client_ids_are_unique(identifier in "[0-9]{1,8}", count in 2usize..50) {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..count {
            let id = generate_prefixed_client_order_id(BINANCE_FUTURES_LINK_PREFIX, &identifier);
            let expected_prefix = format!("{BINANCE_FUTURES_LINK_PREFIX}RUN{identifier}-");
            prop_assert!(id.starts_with(&expected_prefix));
            prop_assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_final_status_is_never_overwritten(statuses in prop::collection::vec(any_status(), 1..20)) {
        let mut tracker: OrderTracker<()> = OrderTracker::new();
        let key = SymbolOrderId::new("PHEMEX-BTCUSD", "42");
        let client_key = SymbolClientOrderId::new("PHEMEX-BTCUSD", "RUN1-00000000");
        let mut first_final: Option<OrderStatus> = None;

        for (i, status) in statuses.into_iter().enumerate() {
            let order = CachedOrder {
                info: OrderInfo { id: "42".into(), client_order_id: Some("RUN1-00000000".into()), status },
                fields: (),
                seen_at: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
            };
            let outcome = tracker.apply(key.clone(), client_key.clone(), order);

            match first_final {
                Some(_) => prop_assert_eq!(outcome, TrackOutcome::IgnoredFinal),
                None if status.is_final() => {
                    prop_assert_eq!(outcome, TrackOutcome::RecordedFinal);
                    first_final = Some(status);
                }
                None => prop_assert_eq!(outcome, TrackOutcome::Recorded),
            }

            let current = tracker.all().get_by_order_id(&key).map(|o| o.status());
            if let Some(final_status) = first_final {
                prop_assert_eq!(current, Some(final_status));
                prop_assert_eq!(tracker.finals().get_by_order_id(&key).map(|o| o.status()), Some(final_status));
            } else {
                prop_assert_eq!(current, Some(status));
            }
        }
    }
}
