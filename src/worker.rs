use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, JobError};
use crate::events::{BoxStream, EventBus, EventListener};
use crate::handler::{HandlerRegistry, JobHandler};
use crate::middleware::Middleware;
use crate::queue::Queue;
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::stats::{CurrentJob, WorkerStats, WorkerStatus};
use crate::types::{Job, JobEvent, JobEventKind};

/// Configuration for a worker pool
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of parallel execution slots
    pub concurrency: usize,
    /// Queue names to poll, in polling order
    pub queues: Vec<String>,
    /// Sleep between polls when no job is available
    pub poll_interval: Duration,
    /// Sleep after a dequeue infrastructure error
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queues: vec![crate::types::DEFAULT_QUEUE.to_string()],
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Mutable worker state, guarded by a single mutex.
struct State {
    status: WorkerStatus,
    started_at: Option<chrono::DateTime<Utc>>,
    jobs_processed: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    processing_time: Duration,
    last_activity: Option<chrono::DateTime<Utc>>,
    current_jobs: Vec<Option<CurrentJob>>,
}

struct Inner {
    id: String,
    config: WorkerConfig,
    queue: Arc<dyn Queue>,
    handlers: RwLock<HandlerRegistry>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    retry: RwLock<Arc<dyn RetryStrategy>>,
    events: EventBus,
    state: Mutex<State>,
    shutdown: Mutex<CancellationToken>,
    /// Slots still running; the last one to exit flips `stopping -> stopped`
    active_slots: AtomicUsize,
}

/// Pool of concurrent execution slots pulling jobs from a `Queue`.
///
/// Lifecycle is `stopped -> running -> stopping -> stopped`; `start` fails
/// while running and `stop` fails while not running. Handlers, middleware,
/// retry strategy and listeners are registered through `&self` and are
/// expected to be in place before `start`.
pub struct Worker {
    inner: Arc<Inner>,
    /// Join handles of the current run's slot tasks. Dropping a handle
    /// detaches the task instead of aborting it, which keeps shutdown
    /// cooperative even when a stop deadline fires mid-drain.
    slots: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Create a worker over the given queue with the default
    /// `ExponentialBackoff` retry strategy
    pub fn new(queue: impl Queue + 'static, config: WorkerConfig) -> Self {
        Self::with_queue_arc(Arc::new(queue), config)
    }

    /// Create a worker over an already-shared queue
    pub fn with_queue_arc(queue: Arc<dyn Queue>, config: WorkerConfig) -> Self {
        let id = format!("worker-{}", &Uuid::new_v4().to_string()[..8]);
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                queue,
                handlers: RwLock::new(HandlerRegistry::new()),
                middleware: RwLock::new(Vec::new()),
                retry: RwLock::new(Arc::new(ExponentialBackoff::default())),
                events: EventBus::new(),
                state: Mutex::new(State {
                    status: WorkerStatus::Stopped,
                    started_at: None,
                    jobs_processed: 0,
                    jobs_succeeded: 0,
                    jobs_failed: 0,
                    processing_time: Duration::ZERO,
                    last_activity: None,
                    current_jobs: Vec::new(),
                }),
                shutdown: Mutex::new(CancellationToken::new()),
                active_slots: AtomicUsize::new(0),
            }),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Worker identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Associate a handler with its job type. Registering a second handler
    /// for the same type replaces the first: last registration wins.
    pub fn register_handler(&self, handler: impl JobHandler + 'static) {
        let mut registry = self.inner.handlers.write();
        if registry.register(Arc::new(handler)).is_some() {
            debug!(worker_id = %self.inner.id, "handler replaced (last registration wins)");
        }
    }

    /// Append a middleware. Registration order is `before` order and the
    /// reverse of `after` order.
    pub fn register_middleware(&self, middleware: impl Middleware + 'static) {
        self.inner.middleware.write().push(Arc::new(middleware));
    }

    /// Replace the retry strategy (defaults to `ExponentialBackoff`)
    pub fn set_retry_strategy(&self, strategy: impl RetryStrategy + 'static) {
        *self.inner.retry.write() = Arc::new(strategy);
    }

    /// Register a lifecycle event listener
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.events.register(listener);
    }

    /// Subscribe to the raw broadcast stream of lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Lifecycle event stream for observability consumers
    pub fn event_stream(&self) -> BoxStream<JobEvent> {
        self.inner.events.stream()
    }

    /// Enqueue a job and emit the `Enqueued` event. Producer convenience;
    /// the worker does not have to be running.
    #[instrument(skip(self, job), fields(worker_id = %self.inner.id, job_id = %job.id, job_type = %job.job_type))]
    pub async fn enqueue(&self, job: &Job) -> EngineResult<()> {
        if job.job_type.is_empty() {
            return Err(EngineError::InvalidJob("job type must be non-empty".into()));
        }
        self.inner.queue.enqueue(job).await?;
        self.inner
            .events
            .emit(JobEvent::new(JobEventKind::Enqueued, job.clone(), None))
            .await;
        debug!("job enqueued");
        Ok(())
    }

    /// Spawn the execution slots and flip to `running`.
    ///
    /// Fails with `EngineError::AlreadyRunning` unless the worker is
    /// currently `stopped`.
    pub async fn start(&self) -> EngineResult<()> {
        let token = {
            let mut state = self.inner.state.lock();
            if state.status != WorkerStatus::Stopped {
                return Err(EngineError::AlreadyRunning);
            }
            state.status = WorkerStatus::Running;
            state.started_at = Some(Utc::now());
            state.current_jobs = vec![None; self.inner.config.concurrency];

            let token = CancellationToken::new();
            *self.inner.shutdown.lock() = token.clone();
            token
        };

        self.inner
            .active_slots
            .store(self.inner.config.concurrency, Ordering::SeqCst);

        let mut handles = Vec::with_capacity(self.inner.config.concurrency);
        for slot in 0..self.inner.config.concurrency {
            let inner = self.inner.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                inner.run_slot(slot, token).await;
            }));
        }
        *self.slots.lock() = handles;

        info!(
            worker_id = %self.inner.id,
            concurrency = self.inner.config.concurrency,
            queues = ?self.inner.config.queues,
            "worker started"
        );
        Ok(())
    }

    /// Cooperative shutdown: signal the slots, then wait for every slot to
    /// finish its in-flight job and exit.
    ///
    /// Fails with `EngineError::NotRunning` unless the worker is currently
    /// `running`. In-flight handlers are never forcibly terminated.
    pub async fn stop(&self) -> EngineResult<()> {
        let token = {
            let mut state = self.inner.state.lock();
            if state.status != WorkerStatus::Running {
                return Err(EngineError::NotRunning);
            }
            state.status = WorkerStatus::Stopping;
            self.inner.shutdown.lock().clone()
        };

        info!(worker_id = %self.inner.id, "worker stopping");
        token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.slots.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(worker_id = %self.inner.id, error = %e, "slot task failed");
            }
        }

        info!(worker_id = %self.inner.id, "worker stopped");
        Ok(())
    }

    /// Like `stop`, but give up waiting after `timeout`.
    ///
    /// On timeout returns `EngineError::ShutdownTimeout`; slots are still
    /// signalled and keep draining in the background (the last one to exit
    /// flips the status to `stopped`), but the caller stops waiting.
    pub async fn stop_timeout(&self, timeout: Duration) -> EngineResult<()> {
        match tokio::time::timeout(timeout, self.stop()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::ShutdownTimeout(timeout)),
        }
    }

    /// Deep, race-free snapshot of the worker's runtime counters
    pub fn stats(&self) -> WorkerStats {
        let state = self.inner.state.lock();
        WorkerStats {
            id: self.inner.id.clone(),
            status: state.status,
            queues: self.inner.config.queues.clone(),
            started_at: state.started_at,
            jobs_processed: state.jobs_processed,
            jobs_succeeded: state.jobs_succeeded,
            jobs_failed: state.jobs_failed,
            processing_time: state.processing_time,
            last_activity: state.last_activity,
            handler_types: self.inner.handlers.read().registered_types(),
            current_jobs: state.current_jobs.clone(),
        }
    }
}

impl Inner {
    /// One execution slot: poll, process, repeat until shutdown.
    async fn run_slot(self: Arc<Self>, slot: usize, token: CancellationToken) {
        let slot_name = format!("{}/{}", self.id, slot);
        debug!(slot = %slot_name, "slot started");

        let queue_names: Vec<&str> = self.config.queues.iter().map(|s| s.as_str()).collect();

        loop {
            if token.is_cancelled() {
                break;
            }

            let dequeued = tokio::select! {
                _ = token.cancelled() => break,
                dequeued = self.queue.dequeue(&queue_names) => dequeued,
            };

            match dequeued {
                Ok(Some(job)) => {
                    // One job at a time per slot; shutdown is observed only
                    // between jobs, never by abandoning one mid-pipeline.
                    self.process(slot, &slot_name, job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(slot = %slot_name, error = %e, "dequeue failed, backing off");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        debug!(slot = %slot_name, "slot stopped");
        if self.active_slots.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut state = self.state.lock();
            if state.status == WorkerStatus::Stopping {
                state.status = WorkerStatus::Stopped;
                state.current_jobs.iter_mut().for_each(|c| *c = None);
            }
        }
    }

    /// Single-job execution pipeline: bookkeeping, middleware, handler,
    /// outcome handling.
    #[instrument(skip_all, fields(slot = %slot_name, job_id = %job.id, job_type = %job.job_type))]
    async fn process(&self, slot: usize, slot_name: &str, mut job: Job) {
        let started = Instant::now();
        job.processed_by = Some(slot_name.to_string());

        {
            let mut state = self.state.lock();
            state.jobs_processed += 1;
            state.last_activity = Some(Utc::now());
            state.current_jobs[slot] = Some(CurrentJob {
                job_id: job.id.clone(),
                job_type: job.job_type.clone(),
                started_at: Utc::now(),
            });
        }
        self.events
            .emit(JobEvent::new(JobEventKind::Started, job.clone(), None))
            .await;

        let handler = self.handlers.read().get(&job.job_type);
        let outcome = match handler {
            // No handler: fail the attempt without touching middleware;
            // there is nothing to wrap.
            None => Err(JobError::retryable(format!(
                "no handler registered for job type: {}",
                job.job_type
            ))),
            Some(handler) => self.run_pipeline(handler, &job).await,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&job).await {
                    // The job already logically succeeded; it is counted as
                    // such and never re-attempted locally. Redelivery safety
                    // is the queue's concern (at-least-once).
                    error!(job_id = %job.id, error = %e, "ack failed");
                }
                self.state.lock().jobs_succeeded += 1;
                self.events
                    .emit(JobEvent::new(JobEventKind::Succeeded, job.clone(), None))
                    .await;
                debug!("job succeeded");
            }
            Err(err) => {
                job.last_error = Some(err.message().to_string());
                let strategy = self.retry.read().clone();

                if strategy.should_retry(&job, &err) {
                    let delay = strategy.next_delay(&job);
                    job.retry_count += 1;
                    let retry_at = Utc::now()
                        + chrono::Duration::milliseconds(
                            delay.as_millis().min(i64::MAX as u128) as i64
                        );
                    if let Err(e) = self.queue.nack(&job, err.message(), Some(retry_at)).await {
                        error!(job_id = %job.id, error = %e, "nack failed");
                    }
                    self.events
                        .emit(JobEvent::new(
                            JobEventKind::Retried,
                            job.clone(),
                            Some(err.message().to_string()),
                        ))
                        .await;
                    warn!(
                        retry_count = job.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job failed, retry scheduled"
                    );
                } else {
                    if let Err(e) = self.queue.nack(&job, err.message(), None).await {
                        error!(job_id = %job.id, error = %e, "nack failed");
                    }
                    self.events
                        .emit(JobEvent::new(
                            JobEventKind::Failed,
                            job.clone(),
                            Some(err.message().to_string()),
                        ))
                        .await;
                    error!(error = %err, "job failed permanently");
                }
                self.state.lock().jobs_failed += 1;
            }
        }

        let mut state = self.state.lock();
        state.processing_time += started.elapsed();
        state.last_activity = Some(Utc::now());
        state.current_jobs[slot] = None;
    }

    /// Middleware chain around one handler execution. `before` hooks run in
    /// registration order; the first failure skips the handler. `after`
    /// hooks always run, in reverse order, receiving the final outcome;
    /// their own errors are logged and never override it.
    async fn run_pipeline(&self, handler: Arc<dyn JobHandler>, job: &Job) -> Result<(), JobError> {
        let middleware: Vec<Arc<dyn Middleware>> = self.middleware.read().clone();

        let mut before_error: Option<JobError> = None;
        for mw in &middleware {
            if let Err(e) = mw.before(job).await {
                before_error = Some(e);
                break;
            }
        }

        let outcome = match before_error {
            Some(e) => Err(e),
            None => self.execute_handler(handler, job).await,
        };

        for mw in middleware.iter().rev() {
            if let Err(e) = mw.after(job, outcome.as_ref().err()).await {
                warn!(job_id = %job.id, error = %e, "middleware after hook failed");
            }
        }

        outcome
    }

    /// Run the handler under the job's deadline with panic containment.
    async fn execute_handler(
        &self,
        handler: Arc<dyn JobHandler>,
        job: &Job,
    ) -> Result<(), JobError> {
        let guarded = std::panic::AssertUnwindSafe(handler.handle(job)).catch_unwind();

        let result = match job.timeout {
            Some(deadline) if !deadline.is_zero() => {
                match tokio::time::timeout(deadline, guarded).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(JobError::retryable(format!(
                            "job timed out after {deadline:?}"
                        )))
                    }
                }
            }
            _ => guarded.await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(panic) => Err(JobError::retryable(format!(
                "handler panicked: {}",
                panic_message(&panic)
            ))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
