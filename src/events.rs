use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, Stream};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::types::{JobEvent, JobEventKind};

/// Type alias for boxed event streams
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Observer of job lifecycle events, decoupled from the worker's core loop.
///
/// Listener failures are isolated: errors and panics raised in `on_event`
/// are logged and never affect the job's outcome.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Event kinds this listener cares about; an empty slice means all
    fn kinds(&self) -> &[JobEventKind];

    /// Receive one event
    async fn on_event(
        &self,
        event: &JobEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Fan-out point for job lifecycle events.
///
/// Delivers each event to registered listeners (filtered by kind) and to a
/// broadcast channel for stream consumers. Dropped broadcast receivers and
/// lagging subscribers never block emission.
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    broadcaster: broadcast::Sender<JobEvent>,
}

/// Buffered events per broadcast subscriber before lag drops old ones.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new() -> Self {
        let (broadcaster, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: RwLock::new(Vec::new()),
            broadcaster,
        }
    }

    /// Register a listener
    pub fn register(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribe to the raw broadcast stream of all events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.broadcaster.subscribe()
    }

    /// Event stream for observability consumers
    pub fn stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.broadcaster.subscribe()).filter_map(|r| r.ok());
        Box::pin(stream)
    }

    /// Deliver an event to all interested listeners and stream subscribers
    pub async fn emit(&self, event: JobEvent) {
        let _ = self.broadcaster.send(event.clone());

        let listeners: Vec<Arc<dyn EventListener>> = self.listeners.read().clone();
        for listener in listeners {
            let kinds = listener.kinds();
            if !kinds.is_empty() && !kinds.contains(&event.kind) {
                continue;
            }
            let delivery = std::panic::AssertUnwindSafe(listener.on_event(&event)).catch_unwind();
            match delivery.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(kind = event.kind.name(), job_id = %event.job.id, error = %e, "event listener failed");
                }
                Err(_) => {
                    warn!(kind = event.kind.name(), job_id = %event.job.id, "event listener panicked");
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
