//! Poll-with-timeout utility.
//!
//! Long waits ("until these jobs finish") check a condition at a fixed
//! interval up to a fixed number of polls, then fail with
//! [`Error::Timeout`]. Abandoning a poll needs no compensating action; the
//! awaited work carries on independently.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    /// Wait between two checks.
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Maximum number of checks before giving up.
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_polls: 60,
        }
    }
}

impl PollConfig {
    /// Creates a polling budget.
    #[must_use]
    pub const fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Creates a budget that polls every `interval` until `timeout` has passed.
    #[must_use]
    pub fn interval_and_timeout(interval: Duration, timeout: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let polls = timeout.as_millis().div_ceil(interval_ms).max(1);
        Self {
            interval,
            max_polls: u32::try_from(polls).unwrap_or(u32::MAX),
        }
    }

    /// Polls `check` until it returns `true`.
    ///
    /// The first check happens immediately; later checks wait `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] once `max_polls` checks have returned
    /// `false`, or the first error returned by `check`.
    pub async fn poll_until<F, Fut>(&self, description: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();
        for poll in 1..=self.max_polls.max(1) {
            if check().await? {
                tracing::debug!(description, poll, "poll condition met");
                return Ok(());
            }
            if poll < self.max_polls {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(Error::Timeout {
            description: description.to_string(),
            waited: start.elapsed(),
        })
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn returns_once_condition_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let poll = PollConfig::new(Duration::from_secs(1), 10);

        let counter = calls.clone();
        poll.poll_until("third call", || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_polls() {
        let calls = Arc::new(AtomicU32::new(0));
        let poll = PollConfig::new(Duration::from_millis(100), 4);

        let counter = calls.clone();
        let err = poll
            .poll_until("never", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn check_errors_propagate() {
        let poll = PollConfig::new(Duration::from_millis(1), 3);
        let err = poll
            .poll_until("failing", || async { Err(Error::storage("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn interval_and_timeout_rounds_up() {
        let poll =
            PollConfig::interval_and_timeout(Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(poll.max_polls, 3);
    }

    #[test]
    fn serde_uses_millis() {
        let json = serde_json::to_string(&PollConfig::new(Duration::from_millis(250), 4)).unwrap();
        assert_eq!(json, r#"{"interval":250,"maxPolls":4}"#);
    }
}
