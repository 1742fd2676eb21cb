use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::k8s::ObjectKey;
use crate::metrics::METRIC_WORKQUEUE_ADDS;

/// The delay applied to the first retry of a key.
const BACKOFF_BASE: Duration = Duration::from_millis(5);
/// The maximum delay applied between retries of a key.
const BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// A FIFO work queue of object keys.
///
/// A key is held at most once in the queue: adding a key which is already waiting is a no-op.
/// A key handed out by `get` is exclusively owned by its caller until `done` is called; adding
/// it in the meantime marks it dirty and it is queued again once `done` is called. This gives
/// every key at most one in-flight processor.
pub struct WorkQueue {
    name: String,
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

impl WorkQueue {
    /// Create a new instance.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another thread panicked while holding it, the state itself
        // is always consistent between statements.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The name of this queue, used for metrics and logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a key to the queue.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        metrics::increment_counter!(METRIC_WORKQUEUE_ADDS, "name" => self.name.clone());
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key to the queue once the given delay has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add a key to the queue after a delay growing exponentially with its number of failures.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        tracing::debug!(queue = %self.name, %key, ?delay, "requeuing key with backoff");
        self.add_after(key, delay);
    }

    /// Reset the failure count of a key.
    pub fn forget(&self, key: &ObjectKey) {
        self.lock().failures.remove(key);
    }

    /// The number of times the given key has been requeued with backoff since it was last forgotten.
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// The number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next key to process.
    ///
    /// Returns `None` once the queue is shutting down. The caller must call `done` with the key
    /// once it is processed.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark a key as processed, queuing it again if it was added while being processed.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Shut down the queue, waking every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

/// The delay applied to the retry of a key which already failed `failures` times.
pub(crate) fn backoff(failures: u32) -> Duration {
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    BACKOFF_BASE.checked_mul(factor).map(|delay| delay.min(BACKOFF_MAX)).unwrap_or(BACKOFF_MAX)
}
