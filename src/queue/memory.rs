use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::queue::Queue;
use crate::types::{Job, JobId};

/// Where a stored job currently sits in its delivery lifecycle
#[derive(Debug, Clone, PartialEq)]
enum StoredState {
    /// Waiting in its queue; eligible once `visible_at` (if any) has passed
    Ready { visible_at: Option<DateTime<Utc>> },
    /// Owned by a dequeuer until ack/nack
    InFlight,
}

#[derive(Debug, Clone)]
struct Stored {
    job: Job,
    state: StoredState,
}

#[derive(Default)]
struct Inner {
    /// Job records indexed by job id
    jobs: HashMap<JobId, Stored>,
    /// Queue storage: queue name -> job ids in FIFO order
    queues: HashMap<String, VecDeque<JobId>>,
    /// Jobs discarded via nack without a retry
    dead: Vec<Job>,
    /// Currently owned (dequeued, not yet acked/nacked) job count
    in_flight: usize,
    /// High-water mark of `in_flight`, for tests and diagnostics
    max_in_flight: usize,
}

/// In-memory queue for testing and development.
///
/// Conforms to the `Queue` contract: FIFO per queue name, exclusive
/// ownership of dequeued jobs, idempotent ack, and nack-driven re-enqueue
/// with delayed visibility or discard to an inspectable dead-letter list.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting (ready or delayed) on the given queue
    pub fn depth(&self, queue: &str) -> usize {
        let inner = self.inner.read();
        inner.queues.get(queue).map_or(0, |q| q.len())
    }

    /// Number of jobs currently owned by dequeuers
    pub fn in_flight(&self) -> usize {
        self.inner.read().in_flight
    }

    /// Highest number of jobs simultaneously owned since creation
    pub fn max_in_flight(&self) -> usize {
        self.inner.read().max_in_flight
    }

    /// Jobs discarded without retry, in discard order
    pub fn dead_letters(&self) -> Vec<Job> {
        self.inner.read().dead.clone()
    }

    /// True when no job is waiting or owned (dead letters are kept)
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.read();
        inner.jobs.is_empty() && inner.in_flight == 0
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> EngineResult<()> {
        if job.job_type.is_empty() {
            return Err(EngineError::InvalidJob("job type must be non-empty".into()));
        }
        let mut inner = self.inner.write();
        inner.jobs.insert(
            job.id.clone(),
            Stored {
                job: job.clone(),
                state: StoredState::Ready { visible_at: None },
            },
        );
        inner
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(job.id.clone());
        Ok(())
    }

    async fn dequeue(&self, queues: &[&str]) -> EngineResult<Option<Job>> {
        let now = Utc::now();
        let mut inner = self.inner.write();

        for queue_name in queues {
            // Rescan after dropping stale ids (records removed by an ack
            // that raced the queue entry; ack tolerates duplicates).
            loop {
                let candidate = {
                    let Some(queue) = inner.queues.get(*queue_name) else {
                        break;
                    };
                    let mut found: Option<(usize, JobId, bool)> = None;
                    for (index, job_id) in queue.iter().enumerate() {
                        match inner.jobs.get(job_id) {
                            Some(stored) => {
                                let eligible = matches!(
                                    &stored.state,
                                    StoredState::Ready { visible_at }
                                        if visible_at.map_or(true, |at| at <= now)
                                );
                                if eligible {
                                    found = Some((index, job_id.clone(), true));
                                    break;
                                }
                            }
                            None => {
                                found = Some((index, job_id.clone(), false));
                                break;
                            }
                        }
                    }
                    found
                };

                let Some((index, job_id, live)) = candidate else {
                    break;
                };
                if let Some(queue) = inner.queues.get_mut(*queue_name) {
                    queue.remove(index);
                }
                if !live {
                    continue;
                }
                if let Some(stored) = inner.jobs.get_mut(&job_id) {
                    stored.state = StoredState::InFlight;
                    let job = stored.job.clone();
                    inner.in_flight += 1;
                    inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
                    return Ok(Some(job));
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, job: &Job) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if let Some(stored) = inner.jobs.remove(&job.id) {
            if stored.state == StoredState::InFlight {
                inner.in_flight -= 1;
            }
        }
        // Already removed: idempotent no-op.
        Ok(())
    }

    async fn nack(
        &self,
        job: &Job,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let Some(stored) = inner.jobs.remove(&job.id) else {
            return Err(EngineError::JobNotFound(job.id.to_string()));
        };

        if stored.state == StoredState::InFlight {
            inner.in_flight -= 1;
        }

        // Carry the worker's retry bookkeeping into the stored copy so the
        // next attempt sees the incremented retry_count.
        let mut released = job.clone();
        released.last_error = Some(error.to_string());

        match retry_at {
            Some(at) => {
                let job_id = released.id.clone();
                let queue_name = released.queue.clone();
                inner.jobs.insert(
                    job_id.clone(),
                    Stored {
                        job: released,
                        state: StoredState::Ready {
                            visible_at: Some(at),
                        },
                    },
                );
                inner
                    .queues
                    .entry(queue_name)
                    .or_default()
                    .push_back(job_id);
            }
            None => {
                inner.dead.push(released);
            }
        }

        Ok(())
    }
}
