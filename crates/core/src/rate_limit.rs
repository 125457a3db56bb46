//! Per-minute request pacing
//!
//! Both limiters hand out slots inside wall-clock minutes. A caller that finds the
//! current minute full reserves a slot in the next one and sleeps until it starts.
//! Reservation happens under the lock, the sleep happens outside it, so concurrent
//! callers queue up in later minutes instead of piling onto one boundary.
//!
//! `ChangeableMinuteRateLimiter` additionally takes corrections from the server:
//! a remaining count for the current minute and a mandatory cooldown.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::timing::{Clock, SystemClock, floor_to_minute, since_minute_start};

/// Server counters may still describe the previous minute this close to a boundary.
const REMAINING_HINT_GRACE: Duration = Duration::from_secs(3);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or_default()
}

async fn sleep_for(d: Duration) {
    if !d.is_zero() {
        debug!("⏳ rate limiter sleeping {:?}", d);
        monoio::time::sleep(d).await;
    }
}

#[derive(Debug, Default)]
struct MinuteState {
    period: Option<DateTime<Utc>>,
    count: u32,
}

/// Fixed budget of requests per minute.
pub struct MinuteRateLimiter {
    max_per_minute: u32,
    state: Mutex<MinuteState>,
    clock: Arc<dyn Clock>,
}

impl MinuteRateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self::with_clock(max_per_minute, Arc::new(SystemClock))
    }

    pub fn with_clock(max_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            state: Mutex::new(MinuteState::default()),
            clock,
        }
    }

    pub fn max_per_minute(&self) -> u32 {
        self.max_per_minute
    }

    /// Take a slot and return how long the caller has to wait before using it.
    pub fn reserve(&self) -> Duration {
        let now = self.clock.now();
        let minute = floor_to_minute(now);
        let mut state = lock(&self.state);

        match state.period {
            Some(period) if period >= minute => {
                state.count += 1;
                if state.count > self.max_per_minute {
                    state.period = Some(period + TimeDelta::minutes(1));
                    state.count = 1;
                }
            }
            _ => {
                state.period = Some(minute);
                state.count = 1;
            }
        }

        state.period.map(|p| until(now, p)).unwrap_or_default()
    }

    /// Block until a slot in some minute is available.
    pub async fn wait(&self) {
        sleep_for(self.reserve()).await;
    }
}

#[derive(Debug, Default)]
struct ChangeableState {
    period: Option<DateTime<Utc>>,
    remaining: i64,
    hint: Option<RemainingHint>,
    cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct RemainingHint {
    minute: DateTime<Utc>,
    remaining: i64,
}

/// Minute limiter whose budget can be corrected from response headers.
pub struct ChangeableMinuteRateLimiter {
    max_per_minute: u32,
    state: Mutex<ChangeableState>,
    clock: Arc<dyn Clock>,
}

impl ChangeableMinuteRateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self::with_clock(max_per_minute, Arc::new(SystemClock))
    }

    pub fn with_clock(max_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            state: Mutex::new(ChangeableState {
                remaining: max_per_minute as i64,
                ..Default::default()
            }),
            clock,
        }
    }

    pub fn max_per_minute(&self) -> u32 {
        self.max_per_minute
    }

    /// Server-reported remaining budget observed at `at`. Ignored in the first seconds
    /// of a minute.
    pub fn set_remaining(&self, at: DateTime<Utc>, remaining: i64) {
        if since_minute_start(at) < REMAINING_HINT_GRACE {
            return;
        }
        lock(&self.state).hint = Some(RemainingHint {
            minute: floor_to_minute(at),
            remaining,
        });
    }

    /// Make the next `wait` sleep at least `d` from now.
    pub fn set_next_duration(&self, d: Duration) {
        let now = self.clock.now();
        let end = now + TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(365));
        let mut state = lock(&self.state);
        state.cooldown_until = Some(state.cooldown_until.map_or(end, |current| current.max(end)));
    }

    /// Take a slot and return how long the caller has to wait before using it.
    pub fn reserve(&self) -> Duration {
        let now = self.clock.now();
        let minute = floor_to_minute(now);
        let fresh = self.max_per_minute as i64 - 1;
        let mut state = lock(&self.state);

        match state.period {
            Some(period) if period >= minute => {
                let hinted = state
                    .hint
                    .filter(|h| h.minute == period)
                    .map_or(state.remaining, |h| state.remaining.min(h.remaining));
                state.remaining = hinted - 1;
                if state.remaining < 0 {
                    state.period = Some(period + TimeDelta::minutes(1));
                    state.remaining = fresh;
                }
            }
            _ => {
                state.period = Some(minute);
                state.remaining = fresh;
            }
        }

        let slot_wait = state.period.map(|p| until(now, p)).unwrap_or_default();
        let cooldown_wait = state.cooldown_until.map(|c| until(now, c)).unwrap_or_default();
        slot_wait.max(cooldown_wait)
    }

    pub async fn wait(&self) {
        sleep_for(self.reserve()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap()
    }

    #[test]
    fn test_minute_limiter_blocks_after_budget() {
        let clock = ManualClock::new(start());
        let limiter = MinuteRateLimiter::with_clock(3, Arc::new(clock.clone()));

        for _ in 0..3 {
            assert_eq!(limiter.reserve(), Duration::ZERO);
        }
        assert_eq!(limiter.reserve(), Duration::from_secs(50));
    }

    #[test]
    fn test_minute_limiter_resets_on_new_minute() {
        let clock = ManualClock::new(start());
        let limiter = MinuteRateLimiter::with_clock(2, Arc::new(clock.clone()));

        limiter.reserve();
        limiter.reserve();
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.reserve(), Duration::ZERO);
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[test]
    fn test_minute_limiter_queues_into_later_minutes() {
        let clock = ManualClock::new(start());
        let limiter = MinuteRateLimiter::with_clock(1, Arc::new(clock.clone()));

        assert_eq!(limiter.reserve(), Duration::ZERO);
        assert_eq!(limiter.reserve(), Duration::from_secs(50));
        assert_eq!(limiter.reserve(), Duration::from_secs(110));
    }

    #[test]
    fn test_changeable_uses_smaller_server_remaining() {
        let clock = ManualClock::new(start());
        let limiter = ChangeableMinuteRateLimiter::with_clock(100, Arc::new(clock.clone()));

        assert_eq!(limiter.reserve(), Duration::ZERO);
        limiter.set_remaining(start(), 1);
        assert_eq!(limiter.reserve(), Duration::ZERO);
        assert_eq!(limiter.reserve(), Duration::from_secs(50));
    }

    #[test]
    fn test_changeable_ignores_hint_near_minute_start() {
        let clock = ManualClock::new(start());
        let limiter = ChangeableMinuteRateLimiter::with_clock(100, Arc::new(clock.clone()));

        limiter.reserve();
        let near_boundary = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 2).unwrap();
        limiter.set_remaining(near_boundary, 0);
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[test]
    fn test_changeable_negative_remaining_still_progresses() {
        let clock = ManualClock::new(start());
        let limiter = ChangeableMinuteRateLimiter::with_clock(10, Arc::new(clock.clone()));

        limiter.reserve();
        limiter.set_remaining(start(), -5);
        assert_eq!(limiter.reserve(), Duration::from_secs(50));

        clock.advance(Duration::from_secs(50));
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[test]
    fn test_changeable_hint_for_old_minute_is_ignored() {
        let clock = ManualClock::new(start());
        let limiter = ChangeableMinuteRateLimiter::with_clock(10, Arc::new(clock.clone()));

        limiter.reserve();
        limiter.set_remaining(start(), 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.reserve(), Duration::ZERO);
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[test]
    fn test_changeable_next_duration() {
        let clock = ManualClock::new(start());
        let limiter = ChangeableMinuteRateLimiter::with_clock(10, Arc::new(clock.clone()));

        limiter.set_next_duration(Duration::from_secs(7));
        assert_eq!(limiter.reserve(), Duration::from_secs(7));

        clock.advance(Duration::from_secs(7));
        assert_eq!(limiter.reserve(), Duration::ZERO);
    }

    #[monoio::test(enable_timer = true)]
    async fn test_wait_sleeps_for_cooldown() {
        let limiter = ChangeableMinuteRateLimiter::new(10);
        limiter.set_next_duration(Duration::from_millis(30));

        let started = std::time::Instant::now();
        limiter.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
