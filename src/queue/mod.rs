pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::types::Job;

/// Contract the engine requires of the durable job store.
///
/// A conforming implementation may be backed by a relational table with
/// row-locking, a Redis list with a processing set, or any broker offering
/// at-least-once delivery with ownership transfer. Delivery is
/// at-least-once, never exactly-once: a dequeued job is owned exclusively
/// by the caller until `ack`/`nack` or a lease expiry internal to the
/// implementation.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Durably store `job` under `job.queue`. Safe to call concurrently.
    async fn enqueue(&self, job: &Job) -> EngineResult<()>;

    /// Return the next available job from any of the given queue names, or
    /// `Ok(None)` when nothing is currently eligible (non-blocking poll).
    /// The returned job is owned exclusively by the caller.
    async fn dequeue(&self, queues: &[&str]) -> EngineResult<Option<Job>>;

    /// Permanently remove the job. Idempotent: acking an already-acked job
    /// is a no-op, not an error.
    async fn ack(&self, job: &Job) -> EngineResult<()>;

    /// Release ownership of a failed job. `retry_at = Some(t)` re-enqueues
    /// the job, eligible again at `t`; `None` discards it (dead-letter
    /// handling is the implementation's choice). The retry decision is
    /// computed by the worker before this call; `error` is recorded for
    /// observability.
    async fn nack(
        &self,
        job: &Job,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;
}
