mod common;

use std::time::Duration;

use actors::{EnqueueOptions, FnProcessor, ProcessorFuture, StalledJobMonitor, TickOutcome, processor};
use chrono::Utc;
use db::JobStore;
use queue_core::{Backoff, Job, JobErrorKind, JobEvent, JobStatus, QueueConfig};
use serde_json::{Value, json};

use common::memory_harness;

#[tokio::test]
async fn test_echo_job_completes() {
    let harness = memory_harness(|registry| {
        registry.register_queue(QueueConfig::new("echo")).unwrap();
        registry
            .register_processor("echo", processor!("echo", |payload| Ok(payload)))
            .unwrap();
    });
    let mut events = harness.events.subscribe();

    let id = harness
        .producer
        .enqueue("echo", "echo", json!({"x": 1}), EnqueueOptions::default())
        .await
        .unwrap();

    let worker = harness.worker("echo");
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Completed(id)));
    assert_eq!(worker.tick().await.unwrap(), None);

    let job = harness.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"x": 1})));
    assert_eq!(job.attempts, 1);
    assert!(job.claimed_at.is_none());

    let stats = harness.producer.queue_stats("echo").await.unwrap();
    assert_eq!((stats.pending, stats.processing, stats.completed), (0, 0, 1));

    assert!(matches!(events.recv().await.unwrap(), JobEvent::JobEnqueued { .. }));
    assert!(matches!(events.recv().await.unwrap(), JobEvent::JobClaimed { attempt: 1, .. }));
    assert!(matches!(events.recv().await.unwrap(), JobEvent::JobCompleted { attempts: 1, .. }));
}

#[tokio::test]
async fn test_always_failing_job_exhausts_attempts() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(
                QueueConfig::new("flaky")
                    .with_max_attempts(3)
                    .with_backoff(Backoff::fixed(Duration::ZERO)),
            )
            .unwrap();
        registry
            .register_processor("flaky", processor!("fail", |_payload| Err("boom".to_string())))
            .unwrap();
    });
    let id = harness
        .producer
        .enqueue("flaky", "fail", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let worker = harness.worker("flaky");
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Retrying(id)));
    assert_eq!(harness.job(id).await.attempts, 1);
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Retrying(id)));
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Failed(id)));
    assert_eq!(worker.tick().await.unwrap(), None);

    let job = harness.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::ProcessorError);
    assert_eq!(error.message, "boom");

    let stats = harness.producer.queue_stats("flaky").await.unwrap();
    assert_eq!((stats.pending, stats.failed), (0, 1));
}

#[tokio::test]
async fn test_unregistered_type_fails_without_retry() {
    let harness = memory_harness(|registry| {
        registry.register_queue(QueueConfig::new("q").with_max_attempts(5)).unwrap();
    });
    // The producer refuses unknown types; write the record directly.
    let job = Job::new("q", "mystery", json!({})).with_max_attempts(5);
    let id = harness.store.create_job(&job).await.unwrap();

    let worker = harness.worker("q");
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Failed(id)));

    let job = harness.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::UnregisteredType);
}

#[tokio::test]
async fn test_panicking_processor_is_a_failure() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(QueueConfig::new("q").with_backoff(Backoff::fixed(Duration::ZERO)))
            .unwrap();
        registry
            .register_processor(
                "q",
                FnProcessor::new("panic", |_payload: Value| -> ProcessorFuture {
                    Box::pin(async move {
                        if true {
                            panic!("processor exploded");
                        }
                        Ok(Value::Null)
                    })
                }),
            )
            .unwrap();
    });
    let id = harness
        .producer
        .enqueue("q", "panic", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let worker = harness.worker("q");
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Retrying(id)));

    let job = harness.job(id).await;
    assert_eq!(job.status, JobStatus::Pending);
    let error = job.error.unwrap();
    assert_eq!(error.kind, JobErrorKind::ProcessorError);
    assert!(error.message.contains("processor exploded"));
}

#[tokio::test]
async fn test_slow_processor_times_out() {
    let harness = memory_harness(|registry| {
        registry.register_queue(QueueConfig::new("q").with_max_attempts(1)).unwrap();
        registry
            .register_processor(
                "q",
                FnProcessor::new("slow", |_payload: Value| -> ProcessorFuture {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(Value::Null)
                    })
                }),
            )
            .unwrap();
    });
    let options = EnqueueOptions::default().timeout(Duration::from_secs(1));
    let id = harness.producer.enqueue("q", "slow", json!({}), options).await.unwrap();

    let worker = harness.worker("q");
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Failed(id)));

    let job = harness.job(id).await;
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Timeout);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_exponential_backoff_delays_retries() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(
                QueueConfig::new("q")
                    .with_max_attempts(5)
                    .with_backoff(Backoff::exponential(Duration::from_secs(10))),
            )
            .unwrap();
        registry
            .register_processor("q", processor!("fail", |_payload| Err("nope".to_string())))
            .unwrap();
    });
    let id = harness
        .producer
        .enqueue("q", "fail", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let worker = harness.worker("q");

    let before = Utc::now();
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Retrying(id)));
    let first = harness.job(id).await.available_at - before;
    assert!(first >= chrono::Duration::seconds(10) && first < chrono::Duration::seconds(11));

    // Not eligible until the delay has passed.
    assert_eq!(worker.tick().await.unwrap(), None);

    harness
        .producer
        .reschedule(id, Utc::now())
        .await
        .unwrap();
    let before = Utc::now();
    assert_eq!(worker.tick().await.unwrap(), Some(TickOutcome::Retrying(id)));
    let second = harness.job(id).await.available_at - before;
    assert!(second >= chrono::Duration::seconds(20) && second < chrono::Duration::seconds(21));
    assert!(second > first);
}

#[tokio::test]
async fn test_late_result_after_reclaim_is_dropped() {
    let harness = memory_harness(|registry| {
        registry
            .register_queue(QueueConfig::new("q").with_backoff(Backoff::fixed(Duration::ZERO)))
            .unwrap();
        registry
            .register_processor(
                "q",
                FnProcessor::new("slow", |payload: Value| -> ProcessorFuture {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(payload)
                    })
                }),
            )
            .unwrap();
    });
    let id = harness
        .producer
        .enqueue("q", "slow", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let worker = harness.worker("q");
    let running = tokio::spawn(async move { worker.tick().await });

    // Wait for the claim, then treat it as expired.
    let store = harness.store.clone();
    assert!(
        common::wait_until(Duration::from_secs(2), || {
            let store = store.clone();
            async move {
                store
                    .get_job(id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|job| job.status == JobStatus::Processing)
            }
        })
        .await
    );
    let monitor = StalledJobMonitor::new(
        harness.store.clone(),
        harness.registry.clone(),
        harness.events.clone(),
        Duration::ZERO,
    );
    let reclaimed = monitor.reclaim(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
    assert_eq!(reclaimed, vec![id]);

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome, Some(TickOutcome::Lost(id)));

    let job = harness.job(id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.result, None);
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Stalled);
}
