//! Recurring enqueue actions driven by cron expressions.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use db::JobStore;
use queue_core::{JobEvent, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;

use crate::error::{QueueError, QueueResult};
use crate::messages::SchedulerMessage;
use crate::persistence::StatePersistence;
use crate::producer::{EnqueueOptions, Producer};

/// State file name for last-fired watermarks.
const WATERMARKS: &str = "scheduler";

/// A recurring enqueue action.
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    id: String,
    queue: String,
    job_type: String,
    payload: Value,
    expression: String,
    schedule: Schedule,
    last_fired: DateTime<Utc>,
}

impl ScheduledEntry {
    /// Parse `expression` and create an entry that fires for occurrences
    /// strictly after `since`.
    ///
    /// Accepts the classic five-field form (`min hour dom month dow`) as well
    /// as the six- and seven-field forms with seconds and year.
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        expression: &str,
        since: DateTime<Utc>,
    ) -> QueueResult<Self> {
        let expression = expression.trim().to_string();
        let invalid = |reason: String| QueueError::InvalidSchedule {
            expression: expression.clone(),
            reason,
        };
        let normalized = match expression.split_whitespace().count() {
            5 => classic_to_cron(&expression).map_err(invalid)?,
            _ => expression.clone(),
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        let queue = queue.into();
        let job_type = job_type.into();
        Ok(Self {
            id: format!("{}:{}:{}", queue, job_type, expression),
            queue,
            job_type,
            payload,
            expression,
            schedule,
            last_fired: since,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn last_fired(&self) -> DateTime<Utc> {
        self.last_fired
    }

    /// The first occurrence after the last firing, if it is not in the future.
    pub fn due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&self.last_fired)
            .next()
            .filter(|occurrence| *occurrence <= now)
    }
}

/// Rewrite a classic `min hour dom month dow` expression into the
/// seconds-first form `cron` parses.
///
/// Classic day-of-week numbers run 0-7 with both 0 and 7 meaning Sunday,
/// while `cron` numbers them 1-7 starting at Sunday.
fn classic_to_cron(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields[..] else {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    };

    let weekday = weekday
        .split(',')
        .map(classic_weekday)
        .collect::<Result<Vec<_>, _>>()?
        .join(",");
    Ok(format!("0 {} {} {} {} {}", minute, hour, day, month, weekday))
}

/// Translate one comma-separated day-of-week item.
fn classic_weekday(item: &str) -> Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid day-of-week step '{}'", step))?;
            (base, Some(step))
        }
        None => (item, None),
    };

    // `*`, `?` and day names read the same in both dialects.
    if !base.chars().any(|c| c.is_ascii_digit()) {
        return Ok(item.to_string());
    }

    let day = |raw: &str| -> Result<u32, String> {
        raw.parse::<u32>()
            .ok()
            .filter(|n| *n <= 7)
            .ok_or_else(|| format!("invalid day of week '{}'", raw))
    };
    let shift = |n: u32| n % 7 + 1;
    let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

    let Some((start, end)) = base.split_once('-') else {
        return Ok(format!("{}{}", shift(day(base)?), suffix));
    };
    let (start, end) = (day(start)?, day(end)?);
    if start > end {
        return Err(format!("invalid day-of-week range '{}'", base));
    }

    if end < 7 || start == 0 {
        // With a start of 0, a trailing 7 names Sunday a second time.
        let end = end.min(6);
        return Ok(format!("{}-{}{}", shift(start), shift(end), suffix));
    }

    // start..=7 wraps: start..=6 stays contiguous, 7 becomes Sunday (1).
    let mut parts = Vec::new();
    if start <= 6 {
        parts.push(format!("{}-7{}", shift(start), suffix));
    }
    if (7 - start) % step.unwrap_or(1) == 0 {
        parts.push("1".to_string());
    }
    Ok(parts.join(","))
}

/// Evaluates scheduled entries and enqueues through the [`Producer`].
///
/// Missed occurrences collapse into one firing: after a fire the watermark
/// moves to `now`, not to the occurrence. The watermark only advances when
/// the enqueue succeeds, so a failed entry fires again on the next tick.
pub struct Scheduler<S> {
    producer: Producer<S>,
    entries: Vec<ScheduledEntry>,
    persistence: Option<StatePersistence>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            entries: self.entries.clone(),
            persistence: self.persistence.clone(),
        }
    }
}

impl<S: JobStore> Scheduler<S> {
    pub fn new(producer: Producer<S>) -> Self {
        Self {
            producer,
            entries: Vec::new(),
            persistence: None,
        }
    }

    /// Persist watermarks under `persistence` so restarts do not refire.
    pub fn with_persistence(mut self, persistence: StatePersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn entries(&self) -> &[ScheduledEntry] {
        &self.entries
    }

    /// Move every watermark forward to at least `now`, so occurrences up to
    /// `now` are treated as fired. Persisted watermarks loaded afterwards
    /// take precedence.
    pub fn resume_at(&mut self, now: DateTime<Utc>) {
        for entry in &mut self.entries {
            entry.last_fired = entry.last_fired.max(now);
        }
    }

    /// Register a recurring enqueue of `(queue, job_type, payload)`.
    ///
    /// The first firing is the first occurrence after now. Returns the entry id.
    pub fn schedule(
        &mut self,
        queue: &str,
        job_type: &str,
        payload: Value,
        expression: &str,
    ) -> QueueResult<String> {
        let entry = ScheduledEntry::new(queue, job_type, payload, expression, Utc::now())?;
        let id = entry.id.clone();
        self.add_entry(entry)?;
        Ok(id)
    }

    /// Add a prepared entry. The target queue and processor must be registered.
    pub fn add_entry(&mut self, entry: ScheduledEntry) -> QueueResult<()> {
        let registry = self.producer.registry();
        if registry.queue(&entry.queue).is_none() {
            return Err(QueueError::validation(format!(
                "unknown queue '{}'",
                entry.queue
            )));
        }
        if !registry.has_processor(&entry.queue, &entry.job_type) {
            return Err(QueueError::validation(format!(
                "no processor registered for '{}' on queue '{}'",
                entry.job_type, entry.queue
            )));
        }
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(QueueError::validation(format!(
                "schedule '{}' is already registered",
                entry.id
            )));
        }

        tracing::info!(entry = %entry.id, expression = %entry.expression, "scheduled recurring job");
        self.entries.push(entry);
        Ok(())
    }

    /// Restore persisted watermarks onto matching entries. Returns how many
    /// entries were restored.
    pub async fn load_watermarks(&mut self) -> QueueResult<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        persistence.init().await?;
        let Some(marks) = persistence
            .load::<BTreeMap<String, DateTime<Utc>>>(WATERMARKS)
            .await?
        else {
            return Ok(0);
        };

        let mut restored = 0;
        for entry in &mut self.entries {
            if let Some(mark) = marks.get(&entry.id) {
                entry.last_fired = *mark;
                restored += 1;
            }
        }
        tracing::debug!(restored, "restored scheduler watermarks");
        Ok(restored)
    }

    /// Fire every due entry once. Returns the ids of the jobs enqueued.
    ///
    /// An entry whose enqueue fails is logged and skipped; the rest of the
    /// tick proceeds.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut fired = Vec::new();

        for entry in &mut self.entries {
            let Some(occurrence) = entry.due(now) else {
                continue;
            };

            match self
                .producer
                .enqueue(
                    &entry.queue,
                    &entry.job_type,
                    entry.payload.clone(),
                    EnqueueOptions::default(),
                )
                .await
            {
                Ok(job_id) => {
                    entry.last_fired = now;
                    tracing::debug!(entry = %entry.id, %occurrence, %job_id, "schedule fired");
                    self.producer.events().emit(JobEvent::ScheduleFired {
                        entry: entry.id.clone(),
                        job_id,
                        queue: entry.queue.clone(),
                        timestamp: now,
                    });
                    fired.push(job_id);
                }
                Err(e) => {
                    tracing::error!(entry = %entry.id, %occurrence, error = %e, "scheduled enqueue failed");
                }
            }
        }

        if !fired.is_empty() {
            self.save_watermarks().await;
        }
        fired
    }

    async fn save_watermarks(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let marks: BTreeMap<&str, DateTime<Utc>> = self
            .entries
            .iter()
            .map(|e| (e.id.as_str(), e.last_fired))
            .collect();
        if let Err(e) = persistence.save(WATERMARKS, &marks).await {
            tracing::warn!(error = %e, "failed to persist scheduler watermarks");
        }
    }
}

/// Scheduler actor arguments.
pub struct SchedulerArgs<S> {
    pub scheduler: Scheduler<S>,
    pub tick: Duration,
}

/// Actor evaluating a [`Scheduler`] on a fixed tick.
pub struct SchedulerActor<S>(std::marker::PhantomData<fn() -> S>);

impl<S> SchedulerActor<S> {
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<S> Default for SchedulerActor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> Actor for SchedulerActor<S> {
    type Msg = SchedulerMessage;
    type State = Scheduler<S>;
    type Arguments = SchedulerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut scheduler = args.scheduler;
        if let Err(e) = scheduler.load_watermarks().await {
            tracing::warn!(error = %e, "could not restore scheduler watermarks");
        }
        tracing::info!(
            entries = scheduler.entries().len(),
            tick_secs = args.tick.as_secs(),
            "starting scheduler"
        );

        let myself_clone = myself.clone();
        let period = args.tick.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SchedulerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(scheduler)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::Tick => {
                state.tick(Utc::now()).await;
            }

            SchedulerMessage::EntryCount { reply } => {
                let _ = reply.send(state.entries().len());
            }

            SchedulerMessage::Shutdown => {
                tracing::info!("shutting down scheduler");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
