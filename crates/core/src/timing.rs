//! Timestamps, wall clocks and minute-window arithmetic
//!
//! Rate limiting and reconnect bookkeeping both reason about wall-clock minutes,
//! so the clock is injectable:
//! - `SystemClock` for production
//! - `ManualClock` for deterministic tests
//! - `PerfTimer` for latency logging around network calls

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// High-precision timestamp type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    pub nanos: u64,
}

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn now() -> Self {
        Self { nanos: nanos() }
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.nanos / 1_000_000_000;
        let nsecs = (self.nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs as i64, nsecs).unwrap_or_else(Utc::now)
    }

    pub fn elapsed_nanos(&self) -> u64 {
        nanos().saturating_sub(self.nanos)
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.elapsed_nanos() / 1_000
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.elapsed_nanos() / 1_000_000
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        let nanos = dt.timestamp() as u64 * 1_000_000_000 + dt.timestamp_subsec_nanos() as u64;
        Self { nanos }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.9f UTC"))
    }
}

/// System time in nanoseconds since Unix epoch
#[inline]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Milliseconds since Unix epoch, as exchanges expect in signed requests
pub fn unix_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Truncate to the start of the containing minute.
pub fn floor_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}

/// Time left until the next minute boundary.
pub fn until_next_minute(at: DateTime<Utc>) -> Duration {
    let next = floor_to_minute(at) + TimeDelta::minutes(1);
    (next - at).to_std().unwrap_or_default()
}

/// Offset of `at` inside its minute.
pub fn since_minute_start(at: DateTime<Utc>) -> Duration {
    (at - floor_to_minute(at)).to_std().unwrap_or_default()
}

/// Performance measurement utilities
pub struct PerfTimer {
    start: Timestamp,
    name: String,
}

impl PerfTimer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Timestamp::now(),
            name: name.into(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed_micros()
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.start.elapsed_millis()
    }

    /// Log the elapsed time
    pub fn log_elapsed(&self) {
        let micros = self.elapsed_micros();
        if micros < 1000 {
            tracing::debug!("⏱️  {} took {}μs", self.name, micros);
        } else {
            tracing::debug!("⏱️  {} took {:.3}ms", self.name, micros as f64 / 1000.0);
        }
    }
}
