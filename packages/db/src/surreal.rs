//! SurrealDB-backed job store.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobStatus, QueueStats};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::Database;
use crate::store::{JobStore, StoreError, add_count, apply_claim, check_transition};

/// Optimistic writes retried before giving up with [`StoreError::Conflict`].
const MAX_WRITE_RETRIES: usize = 16;

/// Pending rows inspected per claim round.
const CLAIM_BATCH: i64 = 16;

/// Row shape read back from the `job` table.
#[derive(Debug, Deserialize)]
struct JobRow {
    state_list: String,
    seq: String,
    version: i64,
    data: String,
}

impl JobRow {
    fn job(&self) -> Result<Job, StoreError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Row content written on create.
#[derive(Debug, Serialize)]
struct NewJobRow {
    queue: String,
    state_list: String,
    seq: String,
    available_at: i64,
    version: i64,
    data: String,
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    #[allow(dead_code)]
    version: i64,
}

#[derive(Debug, Deserialize)]
struct ListCount {
    state_list: String,
    count: i64,
}

const SELECT_ROW: &str = "SELECT state_list, seq, version, data FROM type::thing('job', $id)";

const WRITE_ROW: &str = r#"
UPDATE type::thing('job', $id)
SET state_list = $to, seq = $seq, available_at = $available_at, data = $data, version = version + 1
WHERE state_list = $from AND version = $version
RETURN version
"#;

/// [`JobStore`] over a SurrealDB connection.
///
/// Each write is one conditional `UPDATE` on a single record, guarded by the
/// record's current list and version. A concurrent writer bumps the version,
/// so at most one of two racing moves can match.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
    seq: Arc<Mutex<Generator>>,
}

impl SurrealStore {
    /// Wrap an already connected database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            seq: Arc::new(Mutex::new(Generator::new())),
        }
    }

    /// Next list position. Monotonic within this process.
    fn next_seq(&self) -> String {
        let mut generator = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        generator
            .generate()
            .unwrap_or_else(|_| Ulid::new())
            .to_string()
    }

    async fn fetch_row(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        let mut response = self
            .db
            .query(SELECT_ROW)
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Conditionally write `job` into list `to`. Returns false when the row
    /// no longer matches `from`/`version`.
    async fn write_row(
        &self,
        job: &Job,
        from: JobStatus,
        to: JobStatus,
        seq: String,
        version: i64,
    ) -> Result<bool, StoreError> {
        let mut response = self
            .db
            .query(WRITE_ROW)
            .bind(("id", job.id.to_string()))
            .bind(("from", from.as_str().to_string()))
            .bind(("to", to.as_str().to_string()))
            .bind(("seq", seq))
            .bind(("available_at", job.available_at.timestamp_millis()))
            .bind(("data", serde_json::to_string(job)?))
            .bind(("version", version))
            .await?;
        let written: Vec<VersionRow> = response.take(0)?;
        Ok(!written.is_empty())
    }

    /// Read-modify-write loop shared by updates and moves.
    async fn transition<F>(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        mutate: F,
    ) -> Result<Option<Job>, StoreError>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        for _ in 0..MAX_WRITE_RETRIES {
            let Some(row) = self.fetch_row(id).await? else {
                return Ok(None);
            };
            if row.state_list != from.as_str() {
                return Ok(None);
            }

            let mut job = row.job()?;
            if !mutate(&mut job) {
                return Ok(None);
            }
            job.status = to;
            job.updated_at = Utc::now();

            let seq = if from == to { row.seq } else { self.next_seq() };
            if self.write_row(&job, from, to, seq, row.version).await? {
                return Ok(Some(job));
            }
            tracing::debug!(%id, "concurrent write on job, retrying");
        }

        Err(StoreError::Conflict(id))
    }

    async fn select_list(
        &self,
        queue: &str,
        list: JobStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, StoreError> {
        let limit_clause = limit.map(|l| format!("LIMIT {}", l)).unwrap_or_default();
        let query = format!(
            "SELECT state_list, seq, version, data FROM job \
             WHERE queue = $queue AND state_list = $list ORDER BY seq ASC {}",
            limit_clause
        );

        let mut response = self
            .db
            .query(query)
            .bind(("queue", queue.to_string()))
            .bind(("list", list.as_str().to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;

        rows.iter().map(JobRow::job).collect()
    }
}

impl JobStore for SurrealStore {
    async fn create_job(&self, job: &Job) -> Result<JobId, StoreError> {
        if self.fetch_row(job.id).await?.is_some() {
            return Err(StoreError::Duplicate(job.id));
        }

        let content = NewJobRow {
            queue: job.queue.clone(),
            state_list: job.status.as_str().to_string(),
            seq: self.next_seq(),
            available_at: job.available_at.timestamp_millis(),
            version: 0,
            data: serde_json::to_string(job)?,
        };

        self.db
            .query("CREATE type::thing('job', $id) CONTENT $content RETURN NONE")
            .bind(("id", job.id.to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Ok(job.id)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.fetch_row(id).await?.map(|row| row.job()).transpose()
    }

    async fn update_job<F>(&self, id: JobId, mutate: F) -> Result<Option<Job>, StoreError>
    where
        F: Fn(&mut Job) -> bool + Send + Sync,
    {
        let Some(row) = self.fetch_row(id).await? else {
            return Ok(None);
        };
        let Some(list) = JobStatus::parse(&row.state_list) else {
            return Ok(None);
        };

        self.transition(id, list, list, |job| {
            let status = job.status;
            let accepted = mutate(job);
            job.status = status;
            accepted
        })
        .await
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
        self.transition(id, from, to, mutate).await
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT state_list, seq, version, data FROM job
                WHERE queue = $queue AND state_list = "pending" AND available_at <= $now
                ORDER BY seq ASC
                LIMIT $limit
                "#,
            )
            .bind(("queue", queue.to_string()))
            .bind(("now", now.timestamp_millis()))
            .bind(("limit", CLAIM_BATCH))
            .await?;
        let candidates: Vec<JobRow> = response.take(0)?;

        for row in candidates {
            let id = row.job()?.id;
            let claimed = self
                .transition(id, JobStatus::Pending, JobStatus::Processing, |job| {
                    apply_claim(job, worker_id, now)
                })
                .await?;
            if claimed.is_some() {
                return Ok(claimed);
            }
        }

        Ok(None)
    }

    async fn scan_list(&self, queue: &str, list: JobStatus) -> Result<Vec<JobId>, StoreError> {
        Ok(self
            .select_list(queue, list, None)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect())
    }

    async fn list_jobs(
        &self,
        queue: &str,
        list: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.select_list(queue, list, Some(limit)).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        if self.fetch_row(id).await?.is_none() {
            return Ok(false);
        }

        self.db
            .query("DELETE type::thing('job', $id)")
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(true)
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats, StoreError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT state_list, count() AS count
                FROM job
                WHERE queue = $queue
                GROUP BY state_list
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;
        let counts: Vec<ListCount> = response.take(0)?;

        let mut stats = QueueStats::default();
        for count in counts {
            if let Some(list) = JobStatus::parse(&count.state_list) {
                add_count(&mut stats, list, count.count as u64);
            }
        }
        Ok(stats)
    }
}
