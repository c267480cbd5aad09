//! Bounded job-state tracker for deduplicating redelivered messages.
//!
//! The queue delivers at-least-once, so the same message id can show up
//! while its command is still running or after it already succeeded.
//! [`JobTracker`] remembers recent ids and tells the dispatcher whether
//! to run the handler ([`JobState::Started`]) or skip it.
//!
//! Eviction is FIFO by first insertion. Observing or completing an entry
//! never moves it, so this is not an LRU.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::telemetry::metrics;

/// Outcome of [`JobTracker::start_try`].
///
/// `Started` is only ever returned, never stored: tracked entries are
/// always `Running` or `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// The caller now owns this unit of work and should run it.
    Started,
    /// Another attempt is in flight.
    Running,
    /// A previous attempt finished successfully.
    Completed,
}

impl JobState {
    /// Should the caller execute the side effect?
    pub fn is_started(self) -> bool {
        self == JobState::Started
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Thread-safe, capacity-bounded map from message id to job state.
pub struct JobTracker {
    capacity: usize,
    inner: Mutex<Table>,
}

impl JobTracker {
    /// Create a tracker holding at most `capacity` ids.
    ///
    /// A capacity of zero or less disables tracking: every id is fresh.
    pub fn new(capacity: i64) -> Self {
        let capacity = usize::try_from(capacity).unwrap_or(0);
        Self {
            capacity,
            inner: Mutex::new(Table::default()),
        }
    }

    /// Whether dedup is active.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `id` or observe the state of an existing claim.
    ///
    /// Returns [`JobState::Started`] when `id` was not tracked; it is now
    /// tracked as running and the caller owns the work. A tracked id
    /// returns its stored state untouched.
    pub fn start_try(&self, id: &str) -> JobState {
        if !self.is_enabled() {
            return JobState::Started;
        }
        let mut table = self.lock();
        if let Some(state) = table.state_of(id) {
            return state;
        }
        while table.len() >= self.capacity {
            match table.pop_front() {
                Some(evicted) => {
                    tracing::debug!(id = %evicted, "evicted oldest tracked job");
                    metrics::tracker_evictions().add(1, &[]);
                }
                None => break,
            }
        }
        table.push_back(id.to_owned(), JobState::Running);
        JobState::Started
    }

    /// Forget `id` so the next delivery starts a fresh attempt.
    pub fn fail(&self, id: &str) {
        if !self.is_enabled() {
            return;
        }
        self.lock().remove(id);
    }

    /// Mark `id` completed in place. Untracked ids are ignored.
    pub fn complete(&self, id: &str) {
        if !self.is_enabled() {
            return;
        }
        self.lock().set_state(id, JobState::Completed);
    }

    /// Release tracked state. Call once, after all in-flight work finished.
    pub fn close(&self) {
        let mut table = self.lock();
        let dropped = table.len();
        *table = Table::default();
        tracing::debug!(dropped, "job tracker closed");
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // Every mutation leaves the table consistent before it can panic,
        // so a poisoned lock is still safe to use.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Insertion-ordered table
// ---------------------------------------------------------------------------

/// A slot in the order list.
struct Node {
    id: String,
    state: JobState,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash index plus an arena-backed doubly linked list in insertion order.
///
/// Every key in `index` points at exactly one occupied slot in `slots`,
/// and every occupied slot is reachable from `head`.
#[derive(Default)]
struct Table {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Table {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn state_of(&self, id: &str) -> Option<JobState> {
        let slot = *self.index.get(id)?;
        self.node(slot).map(|n| n.state)
    }

    fn set_state(&mut self, id: &str, state: JobState) {
        let Some(slot) = self.index.get(id).copied() else {
            return;
        };
        if let Some(node) = self.node_mut(slot) {
            node.state = state;
        }
    }

    fn push_back(&mut self, id: String, state: JobState) {
        let node = Node {
            id: id.clone(),
            state,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        match self.tail.and_then(|t| self.node_mut(t)) {
            Some(tail) => tail.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(id, slot);
    }

    /// Remove the earliest-inserted entry, returning its id.
    fn pop_front(&mut self) -> Option<String> {
        let slot = self.head?;
        let node = self.unlink(slot)?;
        self.index.remove(&node.id);
        Some(node.id)
    }

    fn remove(&mut self, id: &str) -> Option<JobState> {
        let slot = self.index.remove(id)?;
        self.unlink(slot).map(|n| n.state)
    }

    /// Detach `slot` from the list and free it. Leaves `index` alone.
    fn unlink(&mut self, slot: usize) -> Option<Node> {
        let node = self.slots.get_mut(slot)?.take()?;
        match node.prev.and_then(|p| self.node_mut(p)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.node_mut(n)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(slot);
        Some(node)
    }

    #[cfg(test)]
    fn ids_in_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(node) = self.node(slot) else { break };
            out.push(node.id.clone());
            cursor = node.next;
        }
        out
    }
}
