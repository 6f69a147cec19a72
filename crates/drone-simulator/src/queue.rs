//! Bounded per-drone waypoint queue.

use drone_domain::Waypoint;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Default number of waypoints a drone can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Bounded FIFO written by the dispatcher and drained by a single drone.
///
/// `offer` checks capacity and appends under one short lock, so it never
/// waits for space and never drops an accepted waypoint.
#[derive(Debug)]
pub struct WaypointQueue {
    entries: Mutex<VecDeque<Waypoint>>,
    capacity: usize,
}

impl WaypointQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `waypoint`, or return `false` when the queue is full.
    pub fn offer(&self, waypoint: Waypoint) -> bool {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(waypoint);
        true
    }

    /// Current target (head of the queue).
    pub fn peek(&self) -> Option<Waypoint> {
        self.lock().front().copied()
    }

    pub fn pop(&self) -> Option<Waypoint> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the queued waypoints in delivery order.
    pub fn snapshot(&self) -> Vec<Waypoint> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Waypoint>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WaypointQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
