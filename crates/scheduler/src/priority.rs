//! Task priorities and the pending queue
//!
//! The queue is a plain ordered list rather than a heap: a new task is
//! inserted immediately before the first queued task with strictly lower
//! priority, which keeps equal priorities in FIFO order without any
//! insertion counter.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Render task priority
///
/// Higher numeric values run first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Tile intersecting the visible viewport
    pub const VISIBLE: Priority = Priority(1000);

    /// Low-resolution placeholder for a visible page
    pub const PLACEHOLDER: Priority = Priority(800);

    /// Tile only inside the overscan margin
    pub const OVERSCAN: Priority = Priority(100);

    /// Background prefetch
    pub const IDLE: Priority = Priority(0);

    /// Raw numeric value
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique task identifier
pub type TaskId = u64;

/// A queued entry
#[derive(Debug)]
pub struct Pending<T> {
    pub id: TaskId,
    pub priority: Priority,
    pub item: T,
}

/// Priority-ordered queue of pending tasks
///
/// # Example
///
/// ```
/// use pdf_reader_scheduler::{PendingQueue, Priority};
///
/// let mut queue = PendingQueue::new();
/// queue.insert(1, Priority(100), "overscan");
/// queue.insert(2, Priority(1000), "visible");
/// queue.insert(3, Priority(100), "overscan-2");
///
/// let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
///     .map(|p| p.item)
///     .collect();
/// assert_eq!(order, vec!["visible", "overscan", "overscan-2"]);
/// ```
#[derive(Debug)]
pub struct PendingQueue<T> {
    entries: VecDeque<Pending<T>>,
}

impl<T> PendingQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert before the first entry with strictly lower priority
    ///
    /// Returns the position the entry landed at.
    pub fn insert(&mut self, id: TaskId, priority: Priority, item: T) -> usize {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, Pending { id, priority, item });
        position
    }

    /// Remove and return the front entry
    pub fn pop_front(&mut self) -> Option<Pending<T>> {
        self.entries.pop_front()
    }

    /// Remove the entry with the given id
    pub fn remove(&mut self, id: TaskId) -> Option<Pending<T>> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(position)
    }

    /// Mutable access to a queued entry
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Pending<T>> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Remove every entry matching the predicate, preserving the order of
    /// the rest
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<Pending<T>>
    where
        F: FnMut(&Pending<T>) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if predicate(&entry) {
                removed.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        removed
    }

    /// Remove every entry
    pub fn drain(&mut self) -> Vec<Pending<T>> {
        self.entries.drain(..).collect()
    }

    /// Priorities in queue order
    pub fn priorities(&self) -> Vec<Priority> {
        self.entries.iter().map(|entry| entry.priority).collect()
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
