//! Process-wide registry of queues and their processors.

use std::collections::HashMap;
use std::sync::Arc;

use queue_core::QueueConfig;

use crate::error::{QueueError, QueueResult};
use crate::handler::Processor;

struct QueueEntry {
    config: QueueConfig,
    processors: HashMap<String, Arc<dyn Processor>>,
}

/// Registry of queues and their `type -> processor` bindings.
///
/// Built once at process start and then shared behind an `Arc`; workers,
/// the producer and the monitor all read from the same instance.
#[derive(Default)]
pub struct QueueRegistry {
    queues: HashMap<String, QueueEntry>,
}

impl QueueRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Register a queue. Queue names are unique.
    pub fn register_queue(&mut self, config: QueueConfig) -> QueueResult<()> {
        if config.name.trim().is_empty() {
            return Err(QueueError::validation("queue name must not be empty"));
        }
        if config.max_attempts == 0 {
            return Err(QueueError::validation(format!(
                "queue '{}' must allow at least one attempt",
                config.name
            )));
        }
        if config.timeout_secs == 0 {
            return Err(QueueError::validation(format!(
                "queue '{}' must have a non-zero timeout",
                config.name
            )));
        }
        if self.queues.contains_key(&config.name) {
            return Err(QueueError::validation(format!(
                "queue '{}' is already registered",
                config.name
            )));
        }

        tracing::debug!(queue = %config.name, "registered queue");
        self.queues.insert(
            config.name.clone(),
            QueueEntry {
                config,
                processors: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Bind a processor to `(queue, processor.job_type())`.
    ///
    /// Registering a second processor for the same pair is rejected; the
    /// first binding stays in place.
    pub fn register_processor<P: Processor>(&mut self, queue: &str, processor: P) -> QueueResult<()> {
        let entry = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::validation(format!("unknown queue '{}'", queue)))?;

        let job_type = processor.job_type().to_string();
        if job_type.trim().is_empty() {
            return Err(QueueError::validation("job type must not be empty"));
        }
        if entry.processors.contains_key(&job_type) {
            return Err(QueueError::validation(format!(
                "processor for '{}' on queue '{}' is already registered",
                job_type, queue
            )));
        }

        tracing::debug!(%queue, %job_type, "registered processor");
        entry.processors.insert(job_type, Arc::new(processor));
        Ok(())
    }

    /// Get a queue's configuration.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.get(name).map(|entry| &entry.config)
    }

    /// Get the processor bound to `(queue, job_type)`.
    pub fn processor(&self, queue: &str, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.queues.get(queue)?.processors.get(job_type).cloned()
    }

    /// Check if a processor exists for `(queue, job_type)`.
    pub fn has_processor(&self, queue: &str, job_type: &str) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|entry| entry.processors.contains_key(job_type))
    }

    /// All registered queue configurations.
    pub fn queues(&self) -> impl Iterator<Item = &QueueConfig> {
        self.queues.values().map(|entry| &entry.config)
    }

    /// List the job types registered on a queue.
    pub fn job_types(&self, queue: &str) -> Vec<&str> {
        self.queues
            .get(queue)
            .map(|entry| entry.processors.keys().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }
}
