use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Infrastructure and lifecycle errors
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("worker is already running")]
    AlreadyRunning,

    #[error("worker is not running")]
    NotRunning,

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}
