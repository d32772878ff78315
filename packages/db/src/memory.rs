//! In-process store for development and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, QueueStats};
use tokio::sync::Mutex;

use crate::store::{JobStore, StoreError, add_count, apply_claim, check_transition};

/// In-memory [`JobStore`].
///
/// Records and lists live behind one mutex; every operation runs inside a
/// single critical section, so each list move is atomic. Not durable: all
/// jobs are lost when the store is dropped.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    lists: HashMap<(String, JobStatus), VecDeque<JobId>>,
}

impl MemoryState {
    fn list_mut(&mut self, queue: &str, list: JobStatus) -> &mut VecDeque<JobId> {
        self.lists.entry((queue.to_string(), list)).or_default()
    }

    fn list(&self, queue: &str, list: JobStatus) -> impl Iterator<Item = &JobId> {
        self.lists
            .get(&(queue.to_string(), list))
            .into_iter()
            .flatten()
    }

    fn transfer<F>(
        &mut self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        mutate: F,
    ) -> Option<Job>
    where
        F: Fn(&mut Job) -> bool,
    {
        let current = self.jobs.get(&id)?;
        if current.status != from {
            return None;
        }

        let mut job = current.clone();
        if !mutate(&mut job) {
            return None;
        }
        job.status = to;
        job.updated_at = Utc::now();

        let source = self.list_mut(&job.queue, from);
        if let Some(pos) = source.iter().position(|member| *member == id) {
            source.remove(pos);
        }
        self.list_mut(&job.queue, to).push_back(id);
        self.jobs.insert(id, job.clone());

        Some(job)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<JobId, StoreError> {
        let mut state = self.inner.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        state.jobs.insert(job.id, job.clone());
        state.list_mut(&job.queue, job.status).push_back(job.id);
        Ok(job.id)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn update_job<F>(&self, id: JobId, mutate: F) -> Result<Option<Job>, StoreError>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        let mut state = self.inner.lock().await;
        let Some(current) = state.jobs.get(&id) else {
            return Ok(None);
        };

        let mut job = current.clone();
        if !mutate(&mut job) {
            return Ok(None);
        }
        job.status = current.status;
        job.updated_at = Utc::now();
        state.jobs.insert(id, job.clone());

        Ok(Some(job))
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
        check_transition(id, from, to)?;
        Ok(self.inner.lock().await.transfer(id, from, to, mutate))
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut state = self.inner.lock().await;
        let candidate = state
            .list(queue, JobStatus::Pending)
            .copied()
            .find(|id| state.jobs.get(id).is_some_and(|job| job.is_due(now)));

        Ok(candidate.and_then(|id| {
            state.transfer(id, JobStatus::Pending, JobStatus::Processing, |job| {
                apply_claim(job, worker_id, now)
            })
        }))
    }

    async fn scan_list(&self, queue: &str, list: JobStatus) -> Result<Vec<JobId>, StoreError> {
        Ok(self.inner.lock().await.list(queue, list).copied().collect())
    }

    async fn list_jobs(
        &self,
        queue: &str,
        list: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .list(queue, list)
            .filter_map(|id| state.jobs.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().await;
        let Some(job) = state.jobs.remove(&id) else {
            return Ok(false);
        };

        let list = state.list_mut(&job.queue, job.status);
        if let Some(pos) = list.iter().position(|member| *member == id) {
            list.remove(pos);
        }
        Ok(true)
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats, StoreError> {
        let state = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for list in JobStatus::ALL {
            add_count(&mut stats, list, state.list(queue, list).count() as u64);
        }
        Ok(stats)
    }
}
