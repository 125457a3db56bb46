//! Stream events
//!
//! Every stream yields `Event<T>`: a payload, a marker that the underlying
//! connection was replaced, or a terminal disconnect carrying its cause.

use std::fmt;

use unitrade_core::Fixed;

use crate::errors::ExchangeError;
use crate::types::{OrderEventPayload, PositionPayload};

#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Disconnected(ExchangeError),
    Reconnected,
    Payload(T),
}

impl<T> Event<T> {
    pub fn payload(&self) -> Option<&T> {
        match self {
            Event::Payload(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Event::Disconnected(_))
    }
}

impl<T: fmt::Display> fmt::Display for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Disconnected(e) => write!(f, "{{DisconnectedWithError = ({e})}}"),
            Event::Reconnected => write!(f, "{{Reconnected}}"),
            Event::Payload(p) => write!(f, "{{Payload = {p}}}"),
        }
    }
}

pub type OrderEvent = Event<OrderEventPayload>;
pub type PriceEvent = Event<Fixed>;
pub type PositionEvent = Event<Vec<PositionPayload>>;

/// Receiving side of every event stream.
pub type EventStream<T> = flume::Receiver<Event<T>>;
