//! # jobmill: background job-processing engine
//!
//! A queue-backed worker pool: jobs are dequeued from one or more named
//! queues, dispatched to type-specific handlers under a configurable
//! concurrency limit, retried with exponential backoff on failure, and
//! observable through lifecycle events and runtime stats.
//!
//! The engine is a library-level component: producers enqueue through the
//! [`Queue`] contract (or the [`Worker::enqueue`] convenience) and the host
//! process drives [`Worker::start`]/[`Worker::stop`] from its own
//! startup/shutdown hooks. Delivery is at-least-once; exclusive ownership
//! of a dequeued job is the queue implementation's responsibility.
//!
//! ## Quick start
//!
//! ```rust
//! use jobmill::prelude::*;
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendEmail {
//!     fn job_type(&self) -> &str {
//!         "send_email"
//!     }
//!
//!     async fn handle(&self, job: &Job) -> Result<(), JobError> {
//!         // interpret job.payload and do the work
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MemoryQueue::new();
//! let worker = Worker::new(queue.clone(), WorkerConfig::default());
//! worker.register_handler(SendEmail);
//!
//! worker.enqueue(&Job::new("send_email", b"to: someone".to_vec())).await?;
//! worker.start().await?;
//! // ... host process runs ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees and limits
//!
//! - At most `concurrency` jobs are owned by one worker at any instant;
//!   each slot processes strictly one job at a time.
//! - Handler panics are contained at the execution boundary and recorded
//!   as failures; they never take the worker down.
//! - Shutdown is cooperative: in-flight handlers run to completion. A
//!   handler that blocks without yielding cannot be cancelled and will
//!   delay both its per-job deadline and shutdown.
//! - No ordering is guaranteed between jobs across slots, nor between
//!   queue names.

pub mod error;
pub mod events;
pub mod handler;
pub mod middleware;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod types;
pub mod worker;

pub use error::{EngineError, EngineResult, JobError};
pub use events::{BoxStream, EventBus, EventListener};
pub use handler::{HandlerRegistry, JobHandler};
pub use middleware::Middleware;
pub use queue::memory::MemoryQueue;
pub use queue::Queue;
pub use retry::{ExponentialBackoff, RetryStrategy};
pub use stats::{CurrentJob, WorkerStats, WorkerStatus};
pub use types::{Job, JobEvent, JobEventKind, JobId, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE};
pub use worker::{Worker, WorkerConfig};

/// Everything needed to define handlers and run a worker
pub mod prelude {
    pub use crate::{
        EngineError, EngineResult, EventListener, ExponentialBackoff, Job, JobError, JobEvent,
        JobEventKind, JobHandler, JobId, MemoryQueue, Middleware, Queue, RetryStrategy, Worker,
        WorkerConfig, WorkerStats, WorkerStatus,
    };

    pub use async_trait::async_trait;
}
