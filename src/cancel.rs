//! Cooperative cancellation for long-running queries.
//!
//! A [`TaskSupervisor`] hands out generation numbers per key. Starting a new
//! task for a key bumps the key's current generation, which cancels every
//! token issued for older generations. Results carry their generation so a
//! late result from a superseded task can be recognized and dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Never issued, so storing it cancels every outstanding token for a key.
const RETIRED: u64 = 0;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Option<(Arc<AtomicU64>, u64)>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn none() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.state {
            Some((current, issued)) => current.load(Ordering::Acquire) != *issued,
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct TaskSupervisor<K> {
    next_generation: u64,
    current: HashMap<K, Arc<AtomicU64>>,
}

impl<K> Default for TaskSupervisor<K> {
    fn default() -> Self {
        TaskSupervisor {
            next_generation: RETIRED,
            current: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> TaskSupervisor<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a task for `key`, cancelling any task already running for it.
    pub fn begin(&mut self, key: K) -> (u64, CancellationToken) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let current = self
            .current
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(RETIRED)));
        current.store(generation, Ordering::Release);

        let token = CancellationToken {
            state: Some((current.clone(), generation)),
        };
        (generation, token)
    }

    pub fn is_current(&self, key: &K, generation: u64) -> bool {
        self.current
            .get(key)
            .is_some_and(|current| current.load(Ordering::Acquire) == generation)
    }

    /// Marks the task for `key` finished. Returns false when `generation`
    /// has been superseded or cancelled, in which case its result is stale.
    pub fn finish(&mut self, key: &K, generation: u64) -> bool {
        if !self.is_current(key, generation) {
            return false;
        }
        self.current.remove(key);
        true
    }

    pub fn cancel(&mut self, key: &K) {
        if let Some(current) = self.current.remove(key) {
            current.store(RETIRED, Ordering::Release);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, current) in self.current.drain() {
            current.store(RETIRED, Ordering::Release);
        }
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.current.contains_key(key)
    }
}
