use async_trait::async_trait;

use crate::error::JobError;
use crate::types::Job;

/// Ordered before/after interceptor wrapping every job execution.
///
/// `before` hooks run in registration order; `after` hooks run in reverse
/// registration order (innermost-last symmetry, like nested scopes). A
/// `before` error aborts the handler but `after` hooks still run with that
/// error. `after` receives the final outcome (`None` on success) and its
/// own errors are logged, never overriding the outcome. Middleware has no
/// authority over retry decisions; that belongs to the `RetryStrategy`.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Runs before the handler; an error fails the job attempt
    async fn before(&self, job: &Job) -> Result<(), JobError>;

    /// Runs after the handler (or after a `before` failure), receiving the
    /// attempt's final error, if any
    async fn after(&self, job: &Job, outcome: Option<&JobError>) -> Result<(), JobError>;
}
