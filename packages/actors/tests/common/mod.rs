#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{EventBus, Producer, QueueRegistry, Worker};
use chrono::{DateTime, Utc};
use db::{JobStore, MemoryStore, StoreError};
use queue_core::{Job, JobId, JobStatus, QueueStats};

/// Store wrapper that can simulate an outage, globally or for one queue's
/// inserts.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    failing_queue: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_inserts_for(&self, queue: Option<&str>) {
        *self.failing_queue.lock().unwrap() = queue.map(str::to_string);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

impl JobStore for FlakyStore {
    async fn create_job(&self, job: &Job) -> Result<JobId, StoreError> {
        self.check()?;
        let failing = self.failing_queue.lock().unwrap().clone();
        if failing.as_deref() == Some(job.queue.as_str()) {
            return Err(StoreError::Unavailable(format!("queue {} rejects writes", job.queue)));
        }
        self.inner.create_job(job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.check()?;
        self.inner.get_job(id).await
    }

    async fn update_job<F>(&self, id: JobId, mutate: F) -> Result<Option<Job>, StoreError>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        self.check()?;
        self.inner.update_job(id, mutate).await
    }

    async fn move_job<F>(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        mutate: F,
    ) -> Result<Option<Job>, StoreError>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        self.check()?;
        self.inner.move_job(id, from, to, mutate).await
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        self.check()?;
        self.inner.claim_next(queue, worker_id, now).await
    }

    async fn scan_list(&self, queue: &str, list: JobStatus) -> Result<Vec<JobId>, StoreError> {
        self.check()?;
        self.inner.scan_list(queue, list).await
    }

    async fn list_jobs(
        &self,
        queue: &str,
        list: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.check()?;
        self.inner.list_jobs(queue, list, limit).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_job(id).await
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats, StoreError> {
        self.check()?;
        self.inner.queue_stats(queue).await
    }
}

/// Store, registry, event bus and producer wired together.
pub struct Harness<S> {
    pub store: Arc<S>,
    pub registry: Arc<QueueRegistry>,
    pub events: EventBus,
    pub producer: Producer<S>,
}

impl<S: JobStore> Harness<S> {
    pub fn with_store(store: S, configure: impl FnOnce(&mut QueueRegistry)) -> Self {
        let mut registry = QueueRegistry::new();
        configure(&mut registry);

        let store = Arc::new(store);
        let registry = Arc::new(registry);
        let events = EventBus::new(256);
        let producer = Producer::new(store.clone(), registry.clone(), events.clone());
        Self {
            store,
            registry,
            events,
            producer,
        }
    }

    pub fn worker(&self, queue: &str) -> Worker<S> {
        let config = self
            .registry
            .queue(queue)
            .cloned()
            .expect("queue is registered");
        Worker::new(
            format!("{}-test-worker", queue),
            config,
            self.store.clone(),
            self.registry.clone(),
            self.events.clone(),
        )
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.store
            .get_job(id)
            .await
            .expect("store reachable")
            .expect("job exists")
    }
}

pub fn memory_harness(configure: impl FnOnce(&mut QueueRegistry)) -> Harness<MemoryStore> {
    Harness::with_store(MemoryStore::new(), configure)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
