mod events;
mod ids;
mod job;

pub use events::{JobEvent, JobEventKind};
pub use ids::JobId;
pub use job::{Job, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE};
