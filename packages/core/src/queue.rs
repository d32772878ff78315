//! Queue configuration and retry shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ceiling applied to exponential backoff.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delay strategy applied before a failed job becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay for every attempt.
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// `base * 2^(attempts - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "millis")]
        base: Duration,
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// Exponential backoff with the default cap.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential {
            base,
            max: DEFAULT_BACKOFF_CAP,
        }
    }

    /// Exponential backoff with an explicit cap.
    pub fn exponential_capped(base: Duration, max: Duration) -> Self {
        Backoff::Exponential { base, max }
    }

    /// Delay before the next attempt, given the number of attempts already made.
    pub fn delay(&self, attempts: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempts.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::exponential(Duration::from_secs(1))
    }
}

/// Configuration for a named queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, unique within the process.
    pub name: String,
    /// Default ceiling on attempts for jobs in this queue.
    pub max_attempts: u32,
    /// Retry delay strategy.
    pub backoff: Backoff,
    /// Default processor timeout (seconds).
    pub timeout_secs: u64,
    /// Number of concurrent workers for this queue.
    pub concurrency: u32,
}

impl QueueConfig {
    /// Create a queue config with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 3,
            backoff: Backoff::default(),
            timeout_secs: 300,
            concurrency: 1,
        }
    }

    /// Set the default max attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the default processor timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the number of workers.
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Job counts per state list for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    /// Total jobs in queue (pending + processing).
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }

    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(250));
        for attempts in 1..10 {
            assert_eq!(backoff.delay(attempts), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_exponential_backoff_doubles_until_cap() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(16));
        assert_eq!(backoff.delay(6), DEFAULT_BACKOFF_CAP);
        assert_eq!(backoff.delay(u32::MAX), DEFAULT_BACKOFF_CAP);
    }

    #[test]
    fn test_exponential_backoff_is_monotonic() {
        let backoff =
            Backoff::exponential_capped(Duration::from_millis(150), Duration::from_secs(60));
        let mut previous = Duration::ZERO;
        for attempts in 1..64 {
            let delay = backoff.delay(attempts);
            assert!(delay >= previous, "attempt {attempts} went backwards");
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_serde_shape() {
        let value = serde_json::to_value(Backoff::fixed(Duration::from_secs(2))).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "fixed", "delay": 2000}));
    }

    #[test]
    fn test_stats_success_rate() {
        let stats = QueueStats {
            completed: 3,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.processed(), 4);
        assert_eq!(stats.success_rate(), Some(75.0));
        assert_eq!(QueueStats::default().success_rate(), None);
    }
}
