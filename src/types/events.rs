use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Job;

/// Lifecycle transitions observable through the event surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEventKind {
    /// Job was enqueued by a producer
    Enqueued,
    /// A worker slot started an attempt
    Started,
    /// Attempt succeeded and the job was acked
    Succeeded,
    /// Attempt failed and the job was discarded
    Failed,
    /// Attempt failed and a retry was scheduled
    Retried,
}

impl JobEventKind {
    /// Get the event kind name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retried => "retried",
        }
    }
}

/// Immutable record of one job lifecycle transition.
///
/// Carries a snapshot of the job as it was at the transition; it has no
/// identity of its own beyond the job it references plus the kind tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Which transition occurred
    pub kind: JobEventKind,

    /// Snapshot of the job at the time of the transition
    pub job: Job,

    /// Error message for failed/retried transitions
    pub error: Option<String>,

    /// When the transition occurred
    pub at: DateTime<Utc>,
}

impl JobEvent {
    /// Create an event for the given transition
    pub fn new(kind: JobEventKind, job: Job, error: Option<String>) -> Self {
        Self {
            kind,
            job,
            error,
            at: Utc::now(),
        }
    }
}
