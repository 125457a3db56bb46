//! Stream-fed order caches
//!
//! `OrdersCache` indexes the last observed state per (symbol, order id) and keeps a
//! multimap from (symbol, client order id) to order ids. More than one order id for
//! a client order id is surfaced as `AmbiguousOrder`, never resolved by guessing.
//!
//! `OrderTracker` pairs two caches:
//! - `all`: every observed state, rebuilt from `finals` after each disconnect
//! - `finals`: terminal states only, never overwritten once recorded
//!
//! Terminal knowledge is the only thing that survives a gap in the stream.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::errors::{ExchangeError, Result};
use crate::types::{OrderInfo, OrderStatus};

/// Final entries older than this are dropped from memory.
pub const DEFAULT_FINAL_ORDER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Recorded updates between two eviction scans.
pub const DEFAULT_EVICTION_INTERVAL: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolOrderId {
    pub symbol: String,
    pub order_id: String,
}

impl SymbolOrderId {
    pub fn new(symbol: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), order_id: order_id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolClientOrderId {
    pub symbol: String,
    pub client_order_id: String,
}

impl SymbolClientOrderId {
    pub fn new(symbol: impl Into<String>, client_order_id: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), client_order_id: client_order_id.into() }
    }
}

/// Last known state of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOrder<F> {
    pub info: OrderInfo,
    pub fields: F,
    pub seen_at: DateTime<Utc>,
}

impl<F> CachedOrder<F> {
    pub fn status(&self) -> OrderStatus {
        self.info.status
    }
}

#[derive(Debug, Clone)]
pub struct OrdersCache<F> {
    client_index: HashMap<SymbolClientOrderId, BTreeSet<String>>,
    orders: HashMap<SymbolOrderId, CachedOrder<F>>,
}

impl<F> Default for OrdersCache<F> {
    fn default() -> Self {
        Self {
            client_index: HashMap::new(),
            orders: HashMap::new(),
        }
    }
}

impl<F: Clone> OrdersCache<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `order` and index it under its client order id. Index entries are never removed here.
    pub fn insert_order(&mut self, key: SymbolOrderId, client_key: SymbolClientOrderId, order: CachedOrder<F>) {
        self.client_index
            .entry(client_key)
            .or_default()
            .insert(key.order_id.clone());
        self.orders.insert(key, order);
    }

    pub fn get_by_order_id(&self, key: &SymbolOrderId) -> Option<&CachedOrder<F>> {
        self.orders.get(key)
    }

    pub fn order_ids_for_client(&self, key: &SymbolClientOrderId) -> Option<&BTreeSet<String>> {
        self.client_index.get(key)
    }

    /// The single order id indexed under `key`; `AmbiguousOrder` when there are several.
    pub fn single_order_id(&self, key: &SymbolClientOrderId) -> Result<Option<&str>> {
        match self.client_index.get(key) {
            None => Ok(None),
            Some(ids) if ids.len() > 1 => Err(ExchangeError::AmbiguousOrder),
            Some(ids) => Ok(ids.iter().next().map(String::as_str)),
        }
    }

    /// Cached state for the order placed under `key`.
    pub fn get_by_client_order_id(&self, key: &SymbolClientOrderId) -> Result<Option<&CachedOrder<F>>> {
        let Some(order_id) = self.single_order_id(key)? else {
            return Ok(None);
        };
        Ok(self.orders.get(&SymbolOrderId::new(key.symbol.clone(), order_id)))
    }

    /// Union the client index and overwrite order states from `other`.
    pub fn copy_from(&mut self, other: &OrdersCache<F>) {
        for (client_key, ids) in &other.client_index {
            self.client_index
                .entry(client_key.clone())
                .or_default()
                .extend(ids.iter().cloned());
        }
        for (key, order) in &other.orders {
            self.orders.insert(key.clone(), order.clone());
        }
    }

    pub fn clear(&mut self) {
        self.client_index.clear();
        self.orders.clear();
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Drop final orders last seen before `cutoff`. Returns how many were removed.
    pub fn evict_final_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<SymbolOrderId> = self
            .orders
            .iter()
            .filter(|(_, o)| o.info.status.is_final() && o.seen_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &stale {
            self.orders.remove(key);
        }
        if !stale.is_empty() {
            let stale_ids: HashSet<(&str, &str)> =
                stale.iter().map(|k| (k.symbol.as_str(), k.order_id.as_str())).collect();
            self.client_index.retain(|client_key, ids| {
                ids.retain(|id| !stale_ids.contains(&(client_key.symbol.as_str(), id.as_str())));
                !ids.is_empty()
            });
        }
        stale.len()
    }
}

/// Outcome of feeding one stream event to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Order already reached a final status; the event was dropped.
    IgnoredFinal,
    Recorded,
    RecordedFinal,
}

#[derive(Debug, Clone)]
pub struct OrderTracker<F> {
    all: OrdersCache<F>,
    finals: OrdersCache<F>,
    final_ttl: Duration,
    eviction_interval: usize,
    recorded_since_eviction: usize,
}

impl<F> Default for OrderTracker<F> {
    fn default() -> Self {
        Self {
            all: OrdersCache::default(),
            finals: OrdersCache::default(),
            final_ttl: DEFAULT_FINAL_ORDER_TTL,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            recorded_since_eviction: 0,
        }
    }
}

impl<F: Clone> OrderTracker<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_final_ttl(mut self, ttl: Duration) -> Self {
        self.final_ttl = ttl;
        self
    }

    /// Scan for expired finals once per `interval` recorded updates. Zero is treated as one.
    pub fn with_eviction_interval(mut self, interval: usize) -> Self {
        self.eviction_interval = interval.max(1);
        self
    }

    pub fn all(&self) -> &OrdersCache<F> {
        &self.all
    }

    pub fn finals(&self) -> &OrdersCache<F> {
        &self.finals
    }

    /// Apply one observed order state.
    pub fn apply(&mut self, key: SymbolOrderId, client_key: SymbolClientOrderId, order: CachedOrder<F>) -> TrackOutcome {
        if self
            .finals
            .get_by_order_id(&key)
            .is_some_and(|cached| cached.status().is_final())
        {
            return TrackOutcome::IgnoredFinal;
        }

        let is_final = order.status().is_final();
        if is_final {
            self.finals.insert_order(key.clone(), client_key.clone(), order.clone());
        }
        self.all.insert_order(key, client_key, order);
        self.recorded_since_eviction += 1;

        if is_final { TrackOutcome::RecordedFinal } else { TrackOutcome::Recorded }
    }

    /// Forget everything that is not final. Called whenever the stream had a gap.
    pub fn reset_to_finals(&mut self) {
        self.all.clear();
        self.all.copy_from(&self.finals);
    }

    /// `evict_expired` once enough updates were recorded since the last scan.
    pub fn evict_expired_if_due(&mut self, now: DateTime<Utc>) -> usize {
        if self.recorded_since_eviction < self.eviction_interval {
            return 0;
        }
        self.evict_expired(now)
    }

    /// Drop final orders older than the TTL from both caches.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.recorded_since_eviction = 0;
        let ttl = TimeDelta::from_std(self.final_ttl).unwrap_or(TimeDelta::days(1));
        let cutoff = now - ttl;
        let evicted = self.finals.evict_final_older_than(cutoff);
        self.all.evict_final_older_than(cutoff);
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn order(id: &str, cid: &str, status: OrderStatus, seen_at: DateTime<Utc>) -> CachedOrder<u32> {
        CachedOrder {
            info: OrderInfo { id: id.into(), client_order_id: Some(cid.into()), status },
            fields: 1,
            seen_at,
        }
    }

    fn keys(id: &str, cid: &str) -> (SymbolOrderId, SymbolClientOrderId) {
        (SymbolOrderId::new("BTCUSD", id), SymbolClientOrderId::new("BTCUSD", cid))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = OrdersCache::new();
        let (k, ck) = keys("1", "c1");
        cache.insert_order(k.clone(), ck.clone(), order("1", "c1", OrderStatus::New, at(0)));

        assert_eq!(cache.get_by_order_id(&k).unwrap().status(), OrderStatus::New);
        assert_eq!(cache.single_order_id(&ck).unwrap(), Some("1"));
        assert_eq!(cache.get_by_client_order_id(&ck).unwrap().unwrap().info.id, "1");
    }

    #[test]
    fn test_same_client_order_id_twice_is_ambiguous() {
        let mut cache = OrdersCache::new();
        let (k1, ck) = keys("1", "c1");
        let (k2, _) = keys("2", "c1");
        cache.insert_order(k1, ck.clone(), order("1", "c1", OrderStatus::New, at(0)));
        cache.insert_order(k2, ck.clone(), order("2", "c1", OrderStatus::New, at(0)));

        assert_eq!(cache.order_ids_for_client(&ck).unwrap().len(), 2);
        assert_eq!(cache.single_order_id(&ck), Err(ExchangeError::AmbiguousOrder));
        assert!(cache.get_by_client_order_id(&ck).is_err());
    }

    #[test]
    fn test_copy_from_unions_index() {
        let mut a = OrdersCache::new();
        let mut b = OrdersCache::new();
        let (k1, ck) = keys("1", "c1");
        let (k2, _) = keys("2", "c1");
        a.insert_order(k1, ck.clone(), order("1", "c1", OrderStatus::New, at(0)));
        b.insert_order(k2, ck.clone(), order("2", "c1", OrderStatus::Filled, at(0)));

        a.copy_from(&b);
        assert_eq!(a.order_ids_for_client(&ck).unwrap().len(), 2);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_tracker_ignores_events_after_final() {
        let mut tracker = OrderTracker::new();
        let (k, ck) = keys("1", "c1");

        assert_eq!(
            tracker.apply(k.clone(), ck.clone(), order("1", "c1", OrderStatus::Canceled, at(0))),
            TrackOutcome::RecordedFinal
        );
        assert_eq!(
            tracker.apply(k.clone(), ck.clone(), order("1", "c1", OrderStatus::Rejected, at(1))),
            TrackOutcome::IgnoredFinal
        );
        assert_eq!(tracker.all().get_by_order_id(&k).unwrap().status(), OrderStatus::Canceled);
        assert_eq!(tracker.finals().get_by_order_id(&k).unwrap().status(), OrderStatus::Canceled);
    }

    #[test]
    fn test_reset_keeps_only_final_orders() {
        let mut tracker = OrderTracker::new();
        let (k1, ck1) = keys("1", "c1");
        let (k2, ck2) = keys("2", "c2");
        tracker.apply(k1.clone(), ck1, order("1", "c1", OrderStatus::New, at(0)));
        tracker.apply(k2.clone(), ck2, order("2", "c2", OrderStatus::Filled, at(0)));

        tracker.reset_to_finals();
        assert!(tracker.all().get_by_order_id(&k1).is_none());
        assert_eq!(tracker.all().get_by_order_id(&k2).unwrap().status(), OrderStatus::Filled);
    }

    #[test]
    fn test_eviction_drops_old_final_orders_only() {
        let mut tracker = OrderTracker::new().with_final_ttl(Duration::from_secs(600));
        let (k1, ck1) = keys("1", "c1");
        let (k2, ck2) = keys("2", "c2");
        let (k3, ck3) = keys("3", "c3");
        tracker.apply(k1.clone(), ck1.clone(), order("1", "c1", OrderStatus::Filled, at(0)));
        tracker.apply(k2.clone(), ck2, order("2", "c2", OrderStatus::New, at(0)));
        tracker.apply(k3.clone(), ck3, order("3", "c3", OrderStatus::Canceled, at(20)));

        assert_eq!(tracker.evict_expired(at(25)), 1);
        assert!(tracker.finals().get_by_order_id(&k1).is_none());
        assert!(tracker.all().get_by_order_id(&k1).is_none());
        assert!(tracker.all().order_ids_for_client(&ck1).is_none());
        assert!(tracker.all().get_by_order_id(&k2).is_some());
        assert!(tracker.finals().get_by_order_id(&k3).is_some());
    }

    #[test]
    fn test_eviction_waits_for_interval() {
        let mut tracker = OrderTracker::new()
            .with_final_ttl(Duration::from_secs(600))
            .with_eviction_interval(3);
        let (k1, ck1) = keys("1", "c1");
        let (k2, ck2) = keys("2", "c2");
        tracker.apply(k1.clone(), ck1, order("1", "c1", OrderStatus::Filled, at(0)));
        tracker.apply(k2.clone(), ck2.clone(), order("2", "c2", OrderStatus::New, at(0)));

        assert_eq!(tracker.evict_expired_if_due(at(30)), 0);
        assert!(tracker.finals().get_by_order_id(&k1).is_some());

        tracker.apply(k2.clone(), ck2.clone(), order("2", "c2", OrderStatus::Canceled, at(29)));
        assert_eq!(tracker.evict_expired_if_due(at(30)), 1);
        assert!(tracker.finals().get_by_order_id(&k1).is_none());
        assert!(tracker.finals().get_by_order_id(&k2).is_some());

        // The counter restarts after each scan.
        assert_eq!(tracker.evict_expired_if_due(at(59)), 0);
    }

    #[test]
    fn test_eviction_keeps_sibling_ids_of_client_order() {
        let mut tracker = OrderTracker::new().with_final_ttl(Duration::from_secs(600));
        let (k1, ck) = keys("1", "dup");
        let (k2, _) = keys("2", "dup");
        tracker.apply(k1, ck.clone(), order("1", "dup", OrderStatus::Filled, at(0)));
        tracker.apply(k2.clone(), ck.clone(), order("2", "dup", OrderStatus::New, at(20)));

        assert_eq!(tracker.evict_expired(at(25)), 1);
        let ids = tracker.all().order_ids_for_client(&ck).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("2"));
        assert!(tracker.all().get_by_order_id(&k2).is_some());
    }
}
