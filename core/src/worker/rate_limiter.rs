//! Fixed-interval pacing for producers

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Shortest interval a limiter will pace at
///
/// This caps a single limiter at 1000 fires per second. Higher aggregate
/// rates come from running more producers, not from a faster limiter.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Paces an action to a target frequency
///
/// Built on a governor GCRA limiter with a burst of one cell: fires are
/// spaced by `interval`, and a late caller is let through once without
/// banking the missed fires. A slow host therefore degrades the effective
/// rate instead of producing catch-up bursts.
pub struct RateLimiter {
    limiter: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    interval: Duration,
    max_fires: Option<u64>,
    fired: AtomicU64,
    stopped: AtomicBool,
}

impl RateLimiter {
    /// Create a limiter for `rate` events per second
    ///
    /// The interval is `max(1, floor(1000 / rate))` ms; a rate of 0 is
    /// treated as 1.
    ///
    /// # Examples
    /// ```
    /// use loadgen_core::worker::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(50);
    /// assert_eq!(limiter.interval(), Duration::from_millis(20));
    ///
    /// // Capped at one fire per millisecond
    /// let capped = RateLimiter::new(5000);
    /// assert_eq!(capped.interval(), Duration::from_millis(1));
    /// ```
    pub fn new(rate: u32) -> Self {
        let millis = (1000 / u64::from(rate.max(1))).max(1);
        Self::with_interval(Duration::from_millis(millis))
    }

    /// Create a limiter firing every `interval` (floored at [`MIN_INTERVAL`])
    pub fn with_interval(interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let quota = Quota::with_period(interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));

        Self {
            limiter: governor::RateLimiter::direct(quota),
            interval,
            max_fires: None,
            fired: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Stop automatically after `fires` fires
    pub fn with_max_fires(mut self, fires: u64) -> Self {
        self.max_fires = Some(fires);
        self
    }

    /// Wait for the next fire
    ///
    /// The first fire is immediate. Returns `false` without waiting once the
    /// limiter is stopped or its fire budget is spent.
    pub async fn tick(&self) -> bool {
        if self.is_exhausted() {
            return false;
        }

        self.limiter.until_ready().await;

        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.fired.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Stop the limiter; pending and future ticks return `false`
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether `stop` was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of fires so far
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Spacing between fires
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fires per second actually achievable with this interval
    pub fn effective_rate(&self) -> f64 {
        1.0 / self.interval.as_secs_f64()
    }

    fn is_exhausted(&self) -> bool {
        self.is_stopped() || self.max_fires.is_some_and(|max| self.fired() >= max)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .field("max_fires", &self.max_fires)
            .field("fired", &self.fired())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
