//! Exponential backoff with full jitter for append retries.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::StateStoreConfig;

/// Tracks the retry budget of one update.
///
/// The backoff ceiling starts at the minimum wait and doubles after every
/// conflict up to the maximum wait. Each wait is drawn uniformly between the
/// minimum and the current ceiling, so racing writers spread out.
#[derive(Debug)]
pub(crate) struct RetryBackoff {
    min_wait: Duration,
    max_wait: Duration,
    max_elapsed: Duration,
    max_attempts: u32,
    ceiling: Duration,
    attempts: u32,
    started: Instant,
}

impl RetryBackoff {
    pub(crate) fn new(config: &StateStoreConfig) -> Self {
        Self {
            min_wait: config.min_retry_wait(),
            max_wait: config.max_retry_wait(),
            max_elapsed: config.max_retry_elapsed(),
            max_attempts: config.max_add_attempts.max(1),
            ceiling: config.min_retry_wait(),
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Counts an append attempt.
    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns how long to wait before the next attempt, or `None` once the
    /// budget is spent.
    pub(crate) fn next_wait(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts || self.elapsed() >= self.max_elapsed {
            return None;
        }
        let ceiling = self.ceiling.min(self.max_wait);
        let wait = jitter(self.min_wait.min(ceiling), ceiling);
        self.ceiling = self.ceiling.saturating_mul(2);
        Some(wait)
    }
}

fn jitter(low: Duration, high: Duration) -> Duration {
    let low_ms = u64::try_from(low.as_millis()).unwrap_or(u64::MAX);
    let high_ms = u64::try_from(high.as_millis()).unwrap_or(u64::MAX);
    if high_ms <= low_ms {
        return low;
    }
    Duration::from_millis(rand::thread_rng().gen_range(low_ms..=high_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_add_attempts: u32) -> StateStoreConfig {
        StateStoreConfig {
            min_retry_wait_ms: 10,
            max_retry_wait_ms: 80,
            max_retry_elapsed_ms: 60_000,
            max_add_attempts,
            ..StateStoreConfig::default()
        }
    }

    #[test]
    fn waits_stay_within_bounds() {
        let mut backoff = RetryBackoff::new(&config(100));
        let mut ceilings = Vec::new();
        for _ in 0..10 {
            backoff.record_attempt();
            let wait = backoff.next_wait().unwrap();
            assert!(wait >= Duration::from_millis(10));
            assert!(wait <= Duration::from_millis(80));
            ceilings.push(backoff.ceiling);
        }
        // ceiling doubles past the max wait but waits stay capped
        assert!(ceilings.last().unwrap() > &Duration::from_millis(80));
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut backoff = RetryBackoff::new(&config(3));
        backoff.record_attempt();
        assert!(backoff.next_wait().is_some());
        backoff.record_attempt();
        assert!(backoff.next_wait().is_some());
        backoff.record_attempt();
        assert!(backoff.next_wait().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_elapsed() {
        let mut backoff = RetryBackoff::new(&StateStoreConfig {
            max_retry_elapsed_ms: 1_000,
            ..config(100)
        });
        backoff.record_attempt();
        assert!(backoff.next_wait().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        backoff.record_attempt();
        assert!(backoff.next_wait().is_none());
    }

    #[test]
    fn zero_width_jitter_returns_low() {
        let wait = jitter(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(wait, Duration::from_millis(5));
    }
}
