//! Reconnect backoff: `delay = min(initial * multiplier^attempt, max_delay)`.

use std::time::Duration;

use crate::providers::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max = self.policy.max_delay;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.policy.initial_delay.as_secs_f64() * self.policy.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Record a failed attempt. Returns the wait before the next one, or
    /// `None` once `max_attempts` consecutive failures have been seen.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.policy.max_attempts {
            None
        } else {
            Some(self.delay_for(self.attempt - 1))
        }
    }

    /// A streaming session ended after `streamed_for`; long enough sessions
    /// clear the failure streak.
    pub fn on_session_end(&mut self, streamed_for: Duration) {
        if streamed_for > self.policy.stable_after {
            self.attempt = 0;
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            max_attempts,
            stable_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let backoff = Backoff::new(policy(10));
        let delays: Vec<_> = (0..8).map(|a| backoff.delay_for(a)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[3], Duration::from_millis(800));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(1)));
        assert_eq!(delays[7], Duration::from_secs(1));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_exhaustion_after_max_attempts() {
        let mut backoff = Backoff::new(policy(3));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.on_failure(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_reset_only_after_stable_session() {
        let mut backoff = Backoff::new(policy(10));
        backoff.on_failure();
        backoff.on_failure();

        backoff.on_session_end(Duration::from_secs(30));
        assert_eq!(backoff.attempts(), 2);
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(400)));

        backoff.on_session_end(Duration::from_secs(61));
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.on_failure(), Some(Duration::from_millis(100)));
    }
}
