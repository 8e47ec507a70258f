//! Per-kind work queue.
//!
//! A key is queued at most once, handed to at most one worker at a time, and
//! re-queued once if it changed while a worker held it.

use std::collections::{HashMap, HashSet, VecDeque};

use catsrc_core::ObjectKey;

#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key`. A key held by a worker is marked dirty instead.
    pub fn add(&mut self, key: ObjectKey) {
        if self.active.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    /// Hand the oldest queued key to a worker.
    pub fn pop(&mut self) -> Option<ObjectKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.active.insert(key.clone());
        Some(key)
    }

    /// Release a key after its worker finished; a dirty key is queued again.
    pub fn done(&mut self, key: &ObjectKey) {
        self.active.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
        }
    }

    /// Count a failed reconcile and return the consecutive failures so far.
    pub fn record_failure(&mut self, key: &ObjectKey) -> u32 {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        *failures
    }

    /// Reset a key's failure count.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Keys currently held by workers.
    pub fn active(&self) -> usize {
        self.active.len()
    }
}
