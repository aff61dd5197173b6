//! AlarmLimiter - per (executor, notify kind) alert throttle
//!
//! Each key owns a governor direct limiter that admits `max_per_interval`
//! alerts per notify interval. Keys are created lazily with the default
//! interval and re-created when an executor's notify item is re-initialised.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tracing::debug;

use dtp_common::{NotifyItem, NotifyKind, DEFAULT_NOTIFY_INTERVAL_SECS};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct AlarmLimiter {
    /// `None` entries come from a zero interval and never throttle
    limiters: DashMap<(String, NotifyKind), Option<Arc<DirectLimiter>>>,
    max_per_interval: NonZeroU32,
}

impl Default for AlarmLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmLimiter {
    /// One alert per interval for every key
    pub fn new() -> Self {
        Self::with_max_per_interval(nonzero!(1u32))
    }

    pub fn with_max_per_interval(max_per_interval: NonZeroU32) -> Self {
        Self {
            limiters: DashMap::new(),
            max_per_interval,
        }
    }

    fn build(&self, interval: Duration) -> Option<Arc<DirectLimiter>> {
        Quota::with_period(interval)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(self.max_per_interval))))
    }

    /// (Re)create the entry for one executor's notify item, discarding any
    /// throttle state accumulated under the previous interval.
    pub fn init(&self, executor: &str, item: &NotifyItem) {
        let interval = item.interval();
        self.limiters
            .insert((executor.to_string(), item.kind), self.build(interval));
        debug!(
            executor = %executor,
            kind = %item.kind,
            interval_secs = interval.as_secs(),
            "Alarm limiter initialized"
        );
    }

    /// Consume one alert slot. Unknown keys start with the default interval,
    /// so the first alert for a key is always allowed.
    pub fn allow(&self, executor: &str, kind: NotifyKind) -> bool {
        let limiter = self
            .limiters
            .entry((executor.to_string(), kind))
            .or_insert_with(|| self.build(Duration::from_secs(DEFAULT_NOTIFY_INTERVAL_SECS)))
            .clone();

        match limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    pub fn contains(&self, executor: &str, kind: NotifyKind) -> bool {
        self.limiters.contains_key(&(executor.to_string(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: NotifyKind, interval: u64) -> NotifyItem {
        NotifyItem {
            interval: Some(interval),
            ..NotifyItem::new(kind, None)
        }
    }

    #[test]
    fn test_first_alert_allowed_then_throttled() {
        let limiter = AlarmLimiter::new();
        assert!(limiter.allow("io", NotifyKind::Change));
        for _ in 0..4 {
            assert!(!limiter.allow("io", NotifyKind::Change));
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = AlarmLimiter::new();
        assert!(limiter.allow("io", NotifyKind::Change));
        assert!(limiter.allow("io", NotifyKind::Capacity));
        assert!(limiter.allow("cpu", NotifyKind::Change));
    }

    #[test]
    fn test_burst_allows_configured_count() {
        let limiter = AlarmLimiter::with_max_per_interval(nonzero!(3u32));
        let allowed = (0..5).filter(|_| limiter.allow("io", NotifyKind::Reject)).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn test_init_resets_state() {
        let limiter = AlarmLimiter::new();
        assert!(limiter.allow("io", NotifyKind::Change));
        assert!(!limiter.allow("io", NotifyKind::Change));

        limiter.init("io", &item(NotifyKind::Change, 60));
        assert!(limiter.allow("io", NotifyKind::Change));
    }

    #[test]
    fn test_zero_interval_never_throttles() {
        let limiter = AlarmLimiter::new();
        limiter.init("io", &item(NotifyKind::Liveness, 0));
        assert!((0..5).all(|_| limiter.allow("io", NotifyKind::Liveness)));
    }

    #[test]
    fn test_interval_elapses() {
        let limiter = AlarmLimiter::new();
        limiter.init("io", &NotifyItem { interval: Some(1), ..NotifyItem::new(NotifyKind::Change, None) });
        assert!(limiter.allow("io", NotifyKind::Change));
        assert!(!limiter.allow("io", NotifyKind::Change));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.allow("io", NotifyKind::Change));
    }
}
