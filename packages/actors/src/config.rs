//! Runtime tuning for workers, the monitor and the scheduler.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::registry::QueueRegistry;

/// Timing and persistence settings shared by every actor the supervisor starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    /// Sleep between polls of an empty pending list.
    pub poll_interval: Duration,
    /// Wait after a store error before the next store call.
    pub store_backoff: Duration,
    /// How long a claim stays valid before the monitor reclaims it.
    pub lease_window: Duration,
    /// Period of the stalled-job monitor.
    pub monitor_interval: Duration,
    /// Period of the scheduler evaluation.
    pub scheduler_tick: Duration,
    /// Directory for scheduler watermarks; `None` keeps them in memory only.
    pub state_dir: Option<PathBuf>,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            store_backoff: Duration::from_secs(5),
            lease_window: Duration::from_secs(600),
            monitor_interval: Duration::from_secs(30),
            scheduler_tick: Duration::from_secs(60),
            state_dir: None,
            event_capacity: 1024,
        }
    }
}

impl SystemConfig {
    /// Create configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")?
                .map_or(defaults.poll_interval, Duration::from_millis),
            store_backoff: env_parse("STORE_BACKOFF_MS")?
                .map_or(defaults.store_backoff, Duration::from_millis),
            lease_window: env_parse("LEASE_WINDOW_SECS")?
                .map_or(defaults.lease_window, Duration::from_secs),
            monitor_interval: env_parse("MONITOR_INTERVAL_SECS")?
                .map_or(defaults.monitor_interval, Duration::from_secs),
            scheduler_tick: env_parse("SCHEDULER_TICK_SECS")?
                .map_or(defaults.scheduler_tick, Duration::from_secs),
            state_dir: std::env::var_os("SCHEDULER_STATE_DIR").map(PathBuf::from),
            event_capacity: env_parse("EVENT_CAPACITY")?.unwrap_or(defaults.event_capacity),
        })
    }

    /// Check that every registered queue's timeout ends before its claims
    /// can be reclaimed. A processor still running when the lease expires
    /// would otherwise run a second time on another worker.
    pub fn validate(&self, registry: &QueueRegistry) -> QueueResult<()> {
        for queue in registry.queues() {
            if Duration::from_secs(queue.timeout_secs) >= self.lease_window {
                return Err(QueueError::Config(format!(
                    "queue '{}' timeout of {}s must be shorter than the {}s lease window",
                    queue.name,
                    queue.timeout_secs,
                    self.lease_window.as_secs()
                )));
            }
        }
        Ok(())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_store_backoff(mut self, store_backoff: Duration) -> Self {
        self.store_backoff = store_backoff;
        self
    }

    pub fn with_lease_window(mut self, lease_window: Duration) -> Self {
        self.lease_window = lease_window;
        self
    }

    pub fn with_monitor_interval(mut self, monitor_interval: Duration) -> Self {
        self.monitor_interval = monitor_interval;
        self
    }

    pub fn with_scheduler_tick(mut self, scheduler_tick: Duration) -> Self {
        self.scheduler_tick = scheduler_tick;
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }
}

fn env_parse<T>(key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| QueueError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(QueueError::Config(format!("{}: {}", key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_outlives_default_timeout() {
        let config = SystemConfig::default();
        let timeout = Duration::from_secs(queue_core::QueueConfig::new("q").timeout_secs);
        assert!(config.lease_window > timeout);
    }

    #[test]
    fn test_validate_rejects_timeout_at_lease() {
        let mut registry = QueueRegistry::new();
        registry
            .register_queue(queue_core::QueueConfig::new("slow").with_timeout(600))
            .unwrap();

        let err = SystemConfig::default().validate(&registry).unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));

        let config = SystemConfig::default().with_lease_window(Duration::from_secs(601));
        assert!(config.validate(&registry).is_ok());
    }

    #[test]
    fn test_env_parse_missing_key() {
        let value: Option<u64> = env_parse("QUEUE_TEST_UNSET_VARIABLE").unwrap();
        assert_eq!(value, None);
    }
}
