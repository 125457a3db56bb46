//! Phemex rate-limit groups
//!
//! Phemex meters REST calls per group and reports the group's state in
//! `X-RateLimit-{Capacity,Remaining,Retry-After}-<GROUP>` response headers.
//! Order placement and cancellation draw from `CONTRACT`, lookups from `OTHERS`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use unitrade_core::{ChangeableMinuteRateLimiter, Clock, SystemClock};

use crate::errors::{ExchangeError, Result};
use crate::http::HttpResponse;

const CAPACITY_PREFIX: &str = "x-ratelimit-capacity-";
const REMAINING_PREFIX: &str = "x-ratelimit-remaining-";
const RETRY_AFTER_PREFIX: &str = "x-ratelimit-retry-after-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitGroup {
    Contract,
    Others,
}

impl RateLimitGroup {
    pub fn header_suffix(&self) -> &'static str {
        match self {
            RateLimitGroup::Contract => "CONTRACT",
            RateLimitGroup::Others => "OTHERS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CONTRACT" => Some(RateLimitGroup::Contract),
            "OTHERS" => Some(RateLimitGroup::Others),
            _ => None,
        }
    }
}

impl fmt::Display for RateLimitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_suffix())
    }
}

/// Rate-limit state reported by one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Group name as sent, upper-cased.
    pub group_name: String,
    pub capacity: Option<i64>,
    pub remaining: Option<i64>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// `Ok(None)` when the response carries no rate-limit headers. When several
    /// groups are present `CONTRACT` wins over `OTHERS`, which wins over anything else.
    pub fn parse(response: &HttpResponse) -> Result<Option<Self>> {
        let mut groups: Vec<String> = response
            .headers
            .iter()
            .filter_map(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                lower.strip_prefix(CAPACITY_PREFIX).map(|g| g.to_ascii_uppercase())
            })
            .collect();
        if groups.is_empty() {
            return Ok(None);
        }
        groups.sort_by_key(|g| match RateLimitGroup::from_name(g) {
            Some(RateLimitGroup::Contract) => 0,
            Some(RateLimitGroup::Others) => 1,
            None => 2,
        });
        let group_name = groups.swap_remove(0);
        let lookup = |prefix: &str| response.header(&format!("{prefix}{group_name}"));

        Ok(Some(Self {
            capacity: parse_int(lookup(CAPACITY_PREFIX), "capacity")?,
            remaining: parse_int(lookup(REMAINING_PREFIX), "remaining")?,
            retry_after: parse_int(lookup(RETRY_AFTER_PREFIX), "retry-after")?
                .map(|secs| Duration::from_secs(secs.max(0) as u64)),
            group_name,
        }))
    }
}

fn parse_int(value: Option<&str>, what: &str) -> Result<Option<i64>> {
    value
        .map(|v| {
            v.trim().parse::<i64>().map_err(|_| {
                ExchangeError::InvalidResponse(format!("invalid rate limit {what} header: {v}"))
            })
        })
        .transpose()
}

/// One minute budget per group, corrected from response headers.
pub struct PhemexRateLimiter {
    contract: ChangeableMinuteRateLimiter,
    others: ChangeableMinuteRateLimiter,
    clock: Arc<dyn Clock>,
}

impl PhemexRateLimiter {
    pub fn new(contract_per_minute: u32, others_per_minute: u32) -> Self {
        Self::with_clock(contract_per_minute, others_per_minute, Arc::new(SystemClock))
    }

    pub fn with_clock(contract_per_minute: u32, others_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            contract: ChangeableMinuteRateLimiter::with_clock(contract_per_minute, clock.clone()),
            others: ChangeableMinuteRateLimiter::with_clock(others_per_minute, clock.clone()),
            clock,
        }
    }

    pub fn group(&self, group: RateLimitGroup) -> &ChangeableMinuteRateLimiter {
        match group {
            RateLimitGroup::Contract => &self.contract,
            RateLimitGroup::Others => &self.others,
        }
    }

    pub async fn wait(&self, group: RateLimitGroup) {
        self.group(group).wait().await;
    }

    /// No-op for `None`.
    pub fn apply(&self, headers: Option<&RateLimitHeaders>) {
        let Some(headers) = headers else {
            return;
        };
        let Some(group) = RateLimitGroup::from_name(&headers.group_name) else {
            warn!("⚠️ rate limit headers with unknown group {}", headers.group_name);
            return;
        };

        let limiter = self.group(group);
        if let Some(retry_after) = headers.retry_after {
            limiter.set_next_duration(retry_after + Duration::from_secs(1));
        }
        if let Some(remaining) = headers.remaining {
            limiter.set_remaining(self.clock.now(), remaining);
        }
    }
}

impl Default for PhemexRateLimiter {
    fn default() -> Self {
        Self::new(500, 100)
    }
}
