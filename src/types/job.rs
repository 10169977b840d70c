use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::JobId;

/// One unit of background work with type, payload, and retry metadata.
///
/// The engine never inspects `payload`; handlers interpret it. Retry
/// bookkeeping (`retry_count`, `max_retries`, `last_error`) is mutated by
/// the worker between attempts and must never be touched by handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier, assigned at creation
    pub id: JobId,

    /// Job type identifier for handler dispatch (non-empty)
    pub job_type: String,

    /// Target queue name
    pub queue: String,

    /// Serialized job payload (opaque bytes)
    pub payload: Vec<u8>,

    /// Number of attempts already failed and retried (starts at 0)
    pub retry_count: u32,

    /// Maximum retry attempts for this job
    pub max_retries: u32,

    /// Per-attempt execution deadline; `None` means unbounded
    pub timeout: Option<Duration>,

    /// Identifier of the worker slot that last attempted the job.
    /// Observability only, never used for correctness.
    pub processed_by: Option<String>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// Last error message (if any)
    pub last_error: Option<String>,
}

/// Default queue name used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Default retry ceiling for new jobs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Job {
    /// Create a new job of the given type on the default queue
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            queue: DEFAULT_QUEUE.to_string(),
            payload,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
            processed_by: None,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// Set the target queue name
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the maximum retry attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt execution deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check whether the per-job retry ceiling still allows a retry
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Get the payload size in bytes
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
