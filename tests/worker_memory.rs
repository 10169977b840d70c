use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use jobmill::prelude::*;

/// Poll until `condition` holds or the deadline passes.
async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn fast_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        concurrency,
        poll_interval: Duration::from_millis(10),
        error_backoff: Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

/// Retries disabled: every failure dead-letters on the first attempt.
fn no_retries() -> ExponentialBackoff {
    ExponentialBackoff::new().with_max_retries(0)
}

/// Retries with near-immediate redelivery, for retry-path tests.
fn immediate_retries() -> ExponentialBackoff {
    ExponentialBackoff::new()
        .with_base(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .without_jitter()
}

struct FnHandler<F> {
    job_type: &'static str,
    behavior: F,
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> Result<(), JobError> + Send + Sync,
{
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (self.behavior)(job)
    }
}

struct SleepingHandler {
    job_type: &'static str,
    duration: Duration,
}

#[async_trait]
impl JobHandler for SleepingHandler {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

struct RecordingMiddleware {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_before: bool,
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    async fn before(&self, _job: &Job) -> Result<(), JobError> {
        self.log.lock().push(format!("before:{}", self.name));
        if self.fail_before {
            return Err(JobError::permanent("rejected by middleware"));
        }
        Ok(())
    }

    async fn after(&self, _job: &Job, outcome: Option<&JobError>) -> Result<(), JobError> {
        self.log.lock().push(format!(
            "after:{}:{}",
            self.name,
            outcome.map_or("ok", |_| "err")
        ));
        Ok(())
    }
}

/// Scenario: 10 always-succeeding jobs, concurrency 3. Everything is
/// processed and acked, and the pool never owns more than 3 jobs at once.
#[tokio::test]
async fn processes_all_jobs_within_concurrency_limit() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(3));
    worker.register_handler(SleepingHandler {
        job_type: "send_email",
        duration: Duration::from_millis(20),
    });

    for _ in 0..10 {
        worker
            .enqueue(&Job::new("send_email", b"hello".to_vec()))
            .await
            .unwrap();
    }

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            worker.stats().jobs_succeeded == 10
        })
        .await,
        "jobs did not finish: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let stats = worker.stats();
    assert_eq!(stats.jobs_processed, 10);
    assert_eq!(stats.jobs_succeeded, 10);
    assert_eq!(stats.jobs_failed, 0);
    assert!(stats.processing_time >= Duration::from_millis(20));
    assert!(queue.is_drained());
    // Bounded concurrency: never more owned jobs than slots.
    assert!(queue.max_in_flight() <= 3, "max in flight {}", queue.max_in_flight());
}

/// Scenario: handler fails twice, succeeds on the third attempt.
#[tokio::test]
async fn flaky_job_retries_until_success() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(immediate_retries());

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    worker.register_handler(FnHandler {
        job_type: "flaky",
        behavior: move |_job: &Job| {
            let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Err(JobError::retryable("not yet"))
            } else {
                Ok(())
            }
        },
    });

    worker
        .enqueue(&Job::new("flaky", vec![]).with_max_retries(3))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            worker.stats().jobs_succeeded == 1
        })
        .await,
        "job never succeeded: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let stats = worker.stats();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(stats.jobs_processed, 3);
    assert_eq!(stats.jobs_failed, 2);
    assert_eq!(stats.jobs_succeeded, 1);
    assert!(queue.is_drained());
}

/// Retry ceiling: the job is attempted 1 + max_retries times, then
/// dead-lettered.
#[tokio::test]
async fn exhausted_retries_dead_letter_the_job() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(immediate_retries());

    worker.register_handler(FnHandler {
        job_type: "doomed",
        behavior: |_job: &Job| Err(JobError::retryable("always fails")),
    });

    worker
        .enqueue(&Job::new("doomed", vec![]).with_max_retries(2))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !queue.dead_letters().is_empty()).await,
        "job never dead-lettered: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let stats = worker.stats();
    assert_eq!(stats.jobs_processed, 3); // initial attempt + 2 retries
    assert_eq!(stats.jobs_failed, 3);
    assert_eq!(stats.jobs_succeeded, 0);

    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, 2);
    assert_eq!(dead[0].last_error.as_deref(), Some("always fails"));
}

/// Scenario: no handler registered. The job is nacked with a descriptive
/// error and neither middleware nor any handler ever runs.
#[tokio::test]
async fn missing_handler_nacks_without_middleware() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(no_retries());

    let log = Arc::new(Mutex::new(Vec::new()));
    worker.register_middleware(RecordingMiddleware {
        name: "trace",
        log: log.clone(),
        fail_before: false,
    });

    worker
        .enqueue(&Job::new("unregistered_type", vec![]))
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !queue.dead_letters().is_empty()).await,
        "job never dead-lettered: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    let error = dead[0].last_error.clone().unwrap();
    assert!(
        error.contains("no handler registered"),
        "unexpected error: {error}"
    );
    assert!(log.lock().is_empty(), "middleware ran: {:?}", log.lock());
    assert_eq!(worker.stats().jobs_failed, 1);
}

/// Scenario: handler sleeps past its 50ms deadline. The attempt is cut off
/// by the per-job timeout and recorded as a failure, not hung forever.
#[tokio::test]
async fn per_job_timeout_fails_slow_handler() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(no_retries());
    worker.register_handler(SleepingHandler {
        job_type: "sleepy",
        duration: Duration::from_secs(3600),
    });

    worker
        .enqueue(
            &Job::new("sleepy", vec![]).with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !queue.dead_letters().is_empty()).await,
        "timeout never fired: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let dead = queue.dead_letters();
    let error = dead[0].last_error.clone().unwrap();
    assert!(error.contains("timed out"), "unexpected error: {error}");
    assert_eq!(worker.stats().jobs_failed, 1);
}

/// Panic containment: a panicking handler is a recorded failure and the
/// slot keeps processing subsequent jobs.
#[tokio::test]
async fn handler_panic_is_contained() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(no_retries());

    worker.register_handler(FnHandler {
        job_type: "panics",
        behavior: |_job: &Job| panic!("handler bug"),
    });
    worker.register_handler(FnHandler {
        job_type: "fine",
        behavior: |_job: &Job| Ok(()),
    });

    worker.enqueue(&Job::new("panics", vec![])).await.unwrap();
    worker.enqueue(&Job::new("fine", vec![])).await.unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let stats = worker.stats();
            stats.jobs_failed == 1 && stats.jobs_succeeded == 1
        })
        .await,
        "worker did not survive the panic: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    let error = dead[0].last_error.clone().unwrap();
    assert!(error.contains("panicked"), "unexpected error: {error}");
}

/// Graceful stop: with a slot mid-handler, stop returns only after the
/// handler completes, and the worker ends up stopped.
#[tokio::test]
async fn stop_waits_for_in_flight_handler() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.register_handler(SleepingHandler {
        job_type: "slow",
        duration: Duration::from_millis(300),
    });

    worker.enqueue(&Job::new("slow", vec![])).await.unwrap();
    worker.start().await.unwrap();

    // Wait until the slot owns the job.
    assert!(
        wait_until(Duration::from_secs(5), || queue.in_flight() == 1).await,
        "job never started"
    );

    worker.stop_timeout(Duration::from_secs(10)).await.unwrap();

    let stats = worker.stats();
    assert_eq!(stats.status, WorkerStatus::Stopped);
    assert_eq!(stats.jobs_succeeded, 1, "in-flight job was abandoned");
    assert!(stats.current_jobs.iter().all(Option::is_none));
    assert!(queue.is_drained());
}

/// A stop deadline that elapses mid-handler reports the timeout but never
/// kills the slot: draining continues in the background and the worker
/// still ends up stopped with the job completed.
#[tokio::test]
async fn stop_timeout_reports_deadline_but_keeps_draining() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.register_handler(SleepingHandler {
        job_type: "slow",
        duration: Duration::from_millis(400),
    });

    worker.enqueue(&Job::new("slow", vec![])).await.unwrap();
    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || queue.in_flight() == 1).await,
        "job never started"
    );

    let result = worker.stop_timeout(Duration::from_millis(50)).await;
    assert!(
        matches!(result, Err(EngineError::ShutdownTimeout(_))),
        "expected shutdown timeout, got {result:?}"
    );
    assert_eq!(worker.stats().status, WorkerStatus::Stopping);

    // The slot was signalled, not aborted; the last one to exit flips the
    // status once its in-flight handler returns.
    assert!(
        wait_until(Duration::from_secs(5), || {
            worker.stats().status == WorkerStatus::Stopped
        })
        .await,
        "worker never drained: {:?}",
        worker.stats()
    );
    let stats = worker.stats();
    assert_eq!(stats.jobs_succeeded, 1, "in-flight job was abandoned");
    assert!(queue.is_drained());
}

/// Middleware ordering: before hooks in registration order, after hooks in
/// reverse, each observing the final outcome.
#[tokio::test]
async fn middleware_runs_in_nested_order() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));

    let log = Arc::new(Mutex::new(Vec::new()));
    worker.register_middleware(RecordingMiddleware {
        name: "outer",
        log: log.clone(),
        fail_before: false,
    });
    worker.register_middleware(RecordingMiddleware {
        name: "inner",
        log: log.clone(),
        fail_before: false,
    });
    worker.register_handler(FnHandler {
        job_type: "noop",
        behavior: |_job: &Job| Ok(()),
    });

    worker.enqueue(&Job::new("noop", vec![])).await.unwrap();
    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            worker.stats().jobs_succeeded == 1
        })
        .await
    );
    worker.stop().await.unwrap();

    assert_eq!(
        log.lock().clone(),
        vec![
            "before:outer",
            "before:inner",
            "after:inner:ok",
            "after:outer:ok"
        ]
    );
}

/// A failing before hook aborts the handler but after hooks still run with
/// the error, and the job fails.
#[tokio::test]
async fn before_failure_skips_handler_but_runs_after_hooks() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(no_retries());

    let log = Arc::new(Mutex::new(Vec::new()));
    worker.register_middleware(RecordingMiddleware {
        name: "gate",
        log: log.clone(),
        fail_before: true,
    });

    let handled = Arc::new(AtomicU32::new(0));
    let seen = handled.clone();
    worker.register_handler(FnHandler {
        job_type: "guarded",
        behavior: move |_job: &Job| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    });

    worker.enqueue(&Job::new("guarded", vec![])).await.unwrap();
    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || worker.stats().jobs_failed == 1).await,
        "job never failed: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 0, "handler ran despite gate");
    assert_eq!(log.lock().clone(), vec!["before:gate", "after:gate:err"]);
    assert_eq!(queue.dead_letters().len(), 1);
}

/// A failing after hook is a secondary signal: the job's handler outcome
/// stands and the job is still acked and counted as succeeded.
#[tokio::test]
async fn failing_after_hook_does_not_override_success() {
    struct NoisyAfter;

    #[async_trait]
    impl Middleware for NoisyAfter {
        async fn before(&self, _job: &Job) -> Result<(), JobError> {
            Ok(())
        }

        async fn after(&self, _job: &Job, _outcome: Option<&JobError>) -> Result<(), JobError> {
            Err(JobError::retryable("after hook hiccup"))
        }
    }

    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.register_middleware(NoisyAfter);
    worker.register_handler(FnHandler {
        job_type: "noop",
        behavior: |_job: &Job| Ok(()),
    });

    worker.enqueue(&Job::new("noop", vec![])).await.unwrap();
    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            worker.stats().jobs_succeeded == 1
        })
        .await,
        "job never succeeded: {:?}",
        worker.stats()
    );
    worker.stop().await.unwrap();

    let stats = worker.stats();
    assert_eq!(stats.jobs_succeeded, 1);
    assert_eq!(stats.jobs_failed, 0);
    assert!(queue.is_drained());
    assert!(queue.dead_letters().is_empty());
}

/// Lifecycle events arrive in order on the broadcast stream.
#[tokio::test]
async fn lifecycle_events_are_emitted() {
    use tokio_stream::StreamExt;

    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.register_handler(FnHandler {
        job_type: "noop",
        behavior: |_job: &Job| Ok(()),
    });

    let mut stream = worker.event_stream();

    let job = Job::new("noop", vec![]);
    worker.enqueue(&job).await.unwrap();
    worker.start().await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended");
        assert_eq!(event.job.id, job.id);
        kinds.push(event.kind);
    }
    worker.stop().await.unwrap();

    assert_eq!(
        kinds,
        vec![
            JobEventKind::Enqueued,
            JobEventKind::Started,
            JobEventKind::Succeeded
        ]
    );
}

/// Listeners only see the kinds they asked for, and failed attempts carry
/// the error.
#[tokio::test]
async fn listeners_receive_filtered_events() {
    struct FailureListener {
        seen: Arc<Mutex<Vec<JobEvent>>>,
    }

    #[async_trait]
    impl EventListener for FailureListener {
        fn kinds(&self) -> &[JobEventKind] {
            &[JobEventKind::Failed]
        }

        async fn on_event(
            &self,
            event: &JobEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.seen.lock().push(event.clone());
            Ok(())
        }
    }

    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(1));
    worker.set_retry_strategy(no_retries());

    let seen = Arc::new(Mutex::new(Vec::new()));
    worker.register_listener(Arc::new(FailureListener { seen: seen.clone() }));

    worker.register_handler(FnHandler {
        job_type: "bad",
        behavior: |_job: &Job| Err(JobError::permanent("unprocessable")),
    });
    worker.register_handler(FnHandler {
        job_type: "good",
        behavior: |_job: &Job| Ok(()),
    });

    worker.enqueue(&Job::new("bad", vec![])).await.unwrap();
    worker.enqueue(&Job::new("good", vec![])).await.unwrap();

    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let stats = worker.stats();
            stats.jobs_failed == 1 && stats.jobs_succeeded == 1
        })
        .await
    );
    worker.stop().await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, JobEventKind::Failed);
    assert_eq!(seen[0].job.job_type, "bad");
    assert_eq!(seen[0].error.as_deref(), Some("unprocessable"));
}

/// `processed_by` marks which slot attempted the job; purely observational.
#[tokio::test]
async fn processed_by_is_stamped_on_attempts() {
    let queue = MemoryQueue::new();
    let worker = Worker::new(queue.clone(), fast_config(2));
    worker.set_retry_strategy(no_retries());
    worker.register_handler(FnHandler {
        job_type: "bad",
        behavior: |_job: &Job| Err(JobError::retryable("nope")),
    });

    worker.enqueue(&Job::new("bad", vec![])).await.unwrap();
    worker.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !queue.dead_letters().is_empty()).await
    );
    worker.stop().await.unwrap();

    let dead = queue.dead_letters();
    let processed_by = dead[0].processed_by.clone().unwrap();
    assert!(
        processed_by.starts_with(worker.id()),
        "unexpected slot name: {processed_by}"
    );
}
