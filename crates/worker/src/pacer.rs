/*
 * Capacity pacing.
 *
 * A token bucket refilled at the computed read or write rate. Callers
 * acquire the capacity units each request actually consumed, so the
 * average consumption converges on the budget.
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Lowest rate honored; anything below is raised to this to keep the
/// refill period representable.
const MIN_RATE: f64 = 0.001;

pub struct Pacer {
    limiter: Option<DirectLimiter>,
    rate: Option<f64>,
    burst: NonZeroU32,
}

impl Pacer {
    /// Creates a pacer for `rate` units per second; `None` disables pacing.
    pub fn new(rate: Option<f64>) -> Self {
        let Some(rate) = rate.filter(|r| r.is_finite() && *r > 0.0) else {
            return Self::unlimited();
        };
        let rate = rate.max(MIN_RATE);

        // One second worth of units may be spent at once.
        let burst = NonZeroU32::new(rate.ceil().min(u32::MAX as f64) as u32)
            .unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs_f64(1.0 / rate).max(Duration::from_nanos(1));
        let limiter = Quota::with_period(period)
            .map(|quota| RateLimiter::direct(quota.allow_burst(burst)));
        if limiter.is_none() {
            tracing::warn!(rate, "Cannot pace at {} units/s, running unpaced", rate);
        }

        Self {
            limiter,
            rate: Some(rate),
            burst,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            limiter: None,
            rate: None,
            burst: NonZeroU32::MIN,
        }
    }

    /// Units per second, or `None` when unpaced.
    pub fn rate(&self) -> Option<f64> {
        self.limiter.as_ref().and(self.rate)
    }

    /// Number of permits charged for `units` of consumed capacity.
    pub fn permits_for(&self, units: f64) -> u64 {
        if units.is_finite() && units > 0.0 {
            units.ceil().min(u64::MAX as f64) as u64
        } else {
            1
        }
    }

    /// Waits until `units` of capacity have been charged.
    ///
    /// Amounts above the burst are charged in burst-sized steps, so a large
    /// page waits as long as its consumed capacity requires.
    pub async fn acquire(&self, units: f64) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let mut remaining = self.permits_for(units);
        while remaining > 0 {
            let step = remaining.min(u64::from(self.burst.get()));
            let permits = NonZeroU32::new(step as u32).unwrap_or(NonZeroU32::MIN);
            if let Err(e) = limiter.until_n_ready(permits).await {
                // steps never exceed the burst, so this only fires on a misconfigured quota
                tracing::warn!("Pacer cannot grant {} units: {}", permits, e);
                return;
            }
            remaining -= step;
        }
    }
}
