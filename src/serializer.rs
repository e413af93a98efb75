//! Serializer: orders jobs with overlapping serialization keys.
//!
//! `queue_serializable` is called on the reader task, in wire order,
//! assigning each job a monotonic sequence number and recording it at
//! the back of every key's queue it touches. `serialize` blocks a job
//! until it is at the front of every key queue it registered on — i.e.
//! until every earlier-registered job sharing a key has already called
//! `serialize_remove`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::job::{Job, SerializationKey};

struct State {
    next_seq: u64,
    queues: HashMap<SerializationKey, VecDeque<u64>>,
}

/// Shared, connection-wide serialization state.
pub struct Serializer {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer {
    /// Build an empty serializer with no jobs registered.
    pub fn new() -> Self {
        Serializer {
            state: Mutex::new(State {
                next_seq: 0,
                queues: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Register `job` in wire order, assigning it a sequence number and
    /// recording it on every key queue it touches. Must be called before
    /// the job is handed off for parallel execution.
    pub fn queue_serializable(&self, job: &mut Job) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let seq = state.next_seq;
        state.next_seq += 1;
        job.seq = seq;
        for key in &job.keys {
            state.queues.entry(key.clone()).or_default().push_back(seq);
        }
    }

    /// Block until `job` is at the front of every key queue it holds —
    /// i.e. until no earlier-registered job sharing a key is still in
    /// flight.
    pub async fn serialize(&self, job: &Job) {
        if job.keys.is_empty() {
            return;
        }
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            if self.ready(job) {
                return;
            }
            notified.await;
        }
    }

    fn ready(&self, job: &Job) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        job.keys.iter().all(|key| {
            state
                .queues
                .get(key)
                .and_then(|q| q.front())
                .is_some_and(|front| *front == job.seq)
        })
    }

    /// Remove `job` from every key queue it holds and wake any jobs
    /// blocked in [`Self::serialize`]. Call after the job's response has
    /// been emitted.
    pub fn serialize_remove(&self, job: &Job) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for key in &job.keys {
            if let Some(queue) = state.queues.get_mut(key) {
                if queue.front() == Some(&job.seq) {
                    queue.pop_front();
                }
                if queue.is_empty() {
                    state.queues.remove(key);
                }
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }
}
