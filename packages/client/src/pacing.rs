//! Pacing, backoff, and the rate-limit circuit breaker.
//!
//! Every external call is spaced by a per-service [`Pacer`] (the two
//! services have independently tuned minimum intervals — an external usage
//! constraint, not a tuning knob). Retries are driven by an injected
//! [`BackoffPolicy`], and a streak of throttling responses trips the
//! [`CooldownGate`] into a long global pause before a hard ban escalates.
//!
//! All waiting goes through the [`Sleeper`] trait so tests can observe
//! delays without real time passing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Abstraction over "wait this long" so backoff logic is testable.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test sleeper that records requested delays instead of waiting.
pub struct RecordingSleeper {
    /// Every delay requested so far, in request order.
    pub recorded: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a sleeper with an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Total time that would have been slept.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.recorded.lock().unwrap().iter().sum()
    }
}

impl Default for RecordingSleeper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().unwrap().push(duration);
    }
}

/// Exponential backoff schedule for retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, including the first (so `4` means 3 retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Factor applied per subsequent retry.
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    /// 4 attempts with 2s/4s/8s waits between them.
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * self.multiplier.saturating_pow(retry.saturating_sub(1))
    }
}

/// Enforces a minimum interval between calls to one service.
pub struct Pacer {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Pacer {
    /// Creates a pacer with the given minimum inter-call interval.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until at least the minimum interval has passed since the
    /// previous call, then stamps the current call.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn pace(&self, sleeper: &dyn Sleeper) {
        let wait = {
            let last = self.last_call.lock().unwrap();
            remaining_interval(*last, Instant::now(), self.min_interval)
        };
        if !wait.is_zero() {
            sleeper.sleep(wait).await;
        }
        *self.last_call.lock().unwrap() = Some(Instant::now());
    }
}

/// How much of `min_interval` is still outstanding at `now`.
fn remaining_interval(last: Option<Instant>, now: Instant, min_interval: Duration) -> Duration {
    last.map_or(Duration::ZERO, |prev| {
        min_interval.saturating_sub(now.duration_since(prev))
    })
}

/// Circuit breaker for sustained throttling.
///
/// Consecutive rate-limit responses increment a counter; when the counter
/// reaches the threshold the gate trips and demands one long global pause
/// (then the streak resets). Any success resets the streak. Owned by the
/// client — there is deliberately no process-global tally.
pub struct CooldownGate {
    threshold: u32,
    cooldown: Duration,
    consecutive: Mutex<u32>,
}

impl CooldownGate {
    /// Creates a gate that trips after `threshold` consecutive throttles.
    #[must_use]
    pub const fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive: Mutex::new(0),
        }
    }

    /// Default gate: 10 consecutive throttles trip a 60-second pause.
    #[must_use]
    pub const fn standard() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    /// Records one throttled response. Returns the cooldown to observe if
    /// this response tripped the gate.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn note_rate_limited(&self) -> Option<Duration> {
        let mut count = self.consecutive.lock().unwrap();
        *count += 1;
        if *count >= self.threshold {
            *count = 0;
            Some(self.cooldown)
        } else {
            None
        }
    }

    /// Records a successful response, resetting the streak.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn note_success(&self) {
        *self.consecutive.lock().unwrap() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn first_call_is_not_delayed() {
        let wait = remaining_interval(None, Instant::now(), Duration::from_secs(1));
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn back_to_back_calls_wait_out_the_interval() {
        let now = Instant::now();
        let wait = remaining_interval(Some(now), now, Duration::from_millis(1100));
        assert_eq!(wait, Duration::from_millis(1100));
    }

    #[test]
    fn elapsed_time_counts_against_the_interval() {
        let interval = Duration::from_millis(1000);
        let earlier = Instant::now();
        let now = earlier + Duration::from_millis(600);
        let wait = remaining_interval(Some(earlier), now, interval);
        assert_eq!(wait, Duration::from_millis(400));
    }

    #[tokio::test]
    async fn pacer_requests_sleep_on_rapid_calls() {
        let pacer = Pacer::new(Duration::from_secs(5));
        let sleeper = RecordingSleeper::new();
        pacer.pace(&sleeper).await;
        pacer.pace(&sleeper).await;
        let recorded = sleeper.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0] > Duration::from_secs(4));
    }

    #[test]
    fn gate_trips_after_threshold_consecutive_throttles() {
        let gate = CooldownGate::new(10, Duration::from_secs(60));
        for _ in 0..9 {
            assert!(gate.note_rate_limited().is_none());
        }
        assert_eq!(gate.note_rate_limited(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn success_resets_the_streak() {
        let gate = CooldownGate::new(3, Duration::from_secs(60));
        gate.note_rate_limited();
        gate.note_rate_limited();
        gate.note_success();
        assert!(gate.note_rate_limited().is_none());
        assert!(gate.note_rate_limited().is_none());
        assert!(gate.note_rate_limited().is_some());
    }

    #[test]
    fn gate_restarts_counting_after_tripping() {
        let gate = CooldownGate::new(2, Duration::from_secs(60));
        assert!(gate.note_rate_limited().is_none());
        assert!(gate.note_rate_limited().is_some());
        assert!(gate.note_rate_limited().is_none());
    }
}
