//! Client order id generation
//!
//! Client order ids are the idempotency key for order placement, so they must be unique
//! per attempt and stable across retries of the same attempt. Format:
//! `RUN{identifier}-{8 hex chars}`, optionally prefixed by an exchange link prefix.

use nanoid::nanoid;

const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Link prefix Binance spot expects on broker client order ids.
pub const BINANCE_SPOT_LINK_PREFIX: &str = "x-INHON5QW_";

/// Link prefix Binance futures expects on broker client order ids.
pub const BINANCE_FUTURES_LINK_PREFIX: &str = "x-9Oc4JrZL_";

/// Generate a unique ID using nanoid
pub fn generate_id() -> String {
    nanoid!(12)
}

/// `RUN{identifier}-{8 hex chars}`
pub fn generate_client_order_id(identifier: &str) -> String {
    format!("RUN{identifier}-{}", nanoid!(8, &HEX_ALPHABET))
}

/// Client order id carrying an exchange link prefix.
pub fn generate_prefixed_client_order_id(link_prefix: &str, identifier: &str) -> String {
    format!("{link_prefix}{}", generate_client_order_id(identifier))
}
