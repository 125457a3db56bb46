//! Cross-crate tests for Unitrade
//!
//! Exercise the public API of `unitrade-core` and `unitrade-exchanges` the way a
//! trading bot would: through `Exchange` trait objects, decorators and streams.

pub mod support;

#[cfg(test)]
mod bulk_cancel_tests;
#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod retrying_tests;
#[cfg(test)]
mod session_mock_tests;
