use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::JobError;
use crate::types::Job;

/// Executor bound to a job type.
///
/// The worker applies the job's `timeout` (if any) around `handle`, so a
/// handler that awaits is cancelled at the deadline; a handler that blocks
/// without yielding cannot be cancelled and will also delay shutdown.
/// Panics inside `handle` are contained at the execution boundary and
/// converted into a retryable failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes
    fn job_type(&self) -> &str;

    /// Execute one attempt of the job
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Registry mapping job type strings to their handlers.
///
/// Registering a second handler for the same type replaces the first:
/// last registration wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own `job_type()`. Last registration
    /// wins; the replaced handler (if any) is returned.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Option<Arc<dyn JobHandler>> {
        self.handlers.insert(handler.job_type().to_string(), handler)
    }

    /// Look up the handler for a job type
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// All registered job types, sorted for stable output
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
