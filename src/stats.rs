use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::types::JobId;

/// Worker lifecycle state: stopped -> running -> stopping -> stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Stopped,
    Running,
    Stopping,
}

impl WorkerStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The job an execution slot is currently processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentJob {
    pub job_id: JobId,
    pub job_type: String,
    pub started_at: DateTime<Utc>,
}

/// Snapshot of one worker's runtime counters.
///
/// Returned by `Worker::stats()` as a deep copy; callers never observe or
/// mutate the worker's internal state through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Worker identifier
    pub id: String,

    /// Lifecycle state at snapshot time
    pub status: WorkerStatus,

    /// Queue names the worker listens to
    pub queues: Vec<String>,

    /// When the current run started (None while stopped before first start)
    pub started_at: Option<DateTime<Utc>>,

    /// Attempts dequeued and started
    pub jobs_processed: u64,

    /// Attempts that succeeded
    pub jobs_succeeded: u64,

    /// Attempts that failed (each failed attempt counts, including ones
    /// later retried)
    pub jobs_failed: u64,

    /// Cumulative wall-clock time spent inside the execution pipeline
    pub processing_time: Duration,

    /// Last time any slot dequeued or finished a job
    pub last_activity: Option<DateTime<Utc>>,

    /// Job types with a registered handler
    pub handler_types: Vec<String>,

    /// Per-slot in-flight job, indexed by slot
    pub current_jobs: Vec<Option<CurrentJob>>,
}
