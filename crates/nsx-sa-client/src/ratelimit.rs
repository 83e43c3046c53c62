//! Per-endpoint token bucket.
//!
//! [`RateLimiter::acquire`] never fails: when the bucket is empty the caller
//! sleeps until a token is available. The bucket lock is never held across
//! the sleep.

use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ClientError;

/// Rate added per successful call in [`RateMode::Aimd`].
const AIMD_INCREASE: f64 = 1.0;

/// Factor applied to the rate on throttling in [`RateMode::Aimd`].
const AIMD_DECREASE: f64 = 0.5;

/// Lowest rate [`RateMode::Aimd`] backs off to.
const AIMD_MIN_RATE: f64 = 1.0;

/// How the refill rate reacts to Manager feedback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateMode {
    /// Constant refill rate.
    #[default]
    Fixed,
    /// Additive increase on success, multiplicative decrease on throttling.
    Aimd,
}

impl FromStr for RateMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" | "" => Ok(Self::Fixed),
            "aimd" | "adaptive" => Ok(Self::Aimd),
            other => Err(ClientError::Config(format!("unknown rate mode {other:?}"))),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last = now;
    }
}

/// Bounds the outbound request rate to one endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    mode: RateMode,
    max_rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` calls per second with a burst of the
    /// same size, but never less than one call. A non-positive rate disables
    /// limiting.
    #[must_use]
    pub fn new(rate: f64, mode: RateMode) -> Self {
        let capacity = if rate > 0.0 { rate.max(1.0) } else { 0.0 };
        Self {
            mode,
            max_rate: rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                rate,
                last: Instant::now(),
            }),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0.0, RateMode::Fixed)
    }

    /// Whether limiting is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_rate > 0.0
    }

    /// Take one token, waiting until one is available.
    pub async fn acquire(&self) {
        if !self.is_enabled() {
            return;
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill(self.capacity);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Report a successful call.
    pub fn on_success(&self) {
        if self.mode == RateMode::Aimd && self.is_enabled() {
            let mut bucket = self.bucket.lock();
            bucket.rate = (bucket.rate + AIMD_INCREASE).min(self.max_rate);
        }
    }

    /// Report that the Manager throttled a call.
    pub fn on_throttled(&self) {
        if self.mode == RateMode::Aimd && self.is_enabled() {
            let mut bucket = self.bucket.lock();
            bucket.rate = (bucket.rate * AIMD_DECREASE).max(AIMD_MIN_RATE.min(self.max_rate));
            tracing::debug!(rate = bucket.rate, "manager throttled, reducing request rate");
        }
    }

    /// The current refill rate in calls per second.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        self.bucket.lock().rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_wait() {
        let limiter = RateLimiter::new(2.0, RateMode::Fixed);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_rate_still_admits_calls() {
        let limiter = RateLimiter::new(0.5, RateMode::Fixed);
        let start = Instant::now();

        tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        tokio::time::timeout(Duration::from_secs(600), limiter.acquire())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn aimd_backs_off_and_recovers() {
        let limiter = RateLimiter::new(8.0, RateMode::Aimd);

        limiter.on_throttled();
        assert!((limiter.current_rate() - 4.0).abs() < f64::EPSILON);
        limiter.on_throttled();
        limiter.on_throttled();
        limiter.on_throttled();
        assert!((limiter.current_rate() - AIMD_MIN_RATE).abs() < f64::EPSILON);

        for _ in 0..20 {
            limiter.on_success();
        }
        assert!((limiter.current_rate() - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_ignores_feedback() {
        let limiter = RateLimiter::new(8.0, RateMode::Fixed);
        limiter.on_throttled();
        assert!((limiter.current_rate() - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_mode() {
        assert_eq!("AIMD".parse::<RateMode>().unwrap(), RateMode::Aimd);
        assert_eq!("fixed".parse::<RateMode>().unwrap(), RateMode::Fixed);
        assert!("burst".parse::<RateMode>().is_err());
    }
}
