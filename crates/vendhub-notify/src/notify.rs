//! Notification history: the last N envelopes, newest last.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::events::{Envelope, Room};

/// Bounded in-memory history of published events.
#[derive(Debug)]
pub struct NotificationHistory {
    capacity: usize,
    entries: VecDeque<Arc<Envelope>>,
}

impl NotificationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn record(&mut self, envelope: Arc<Envelope>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `limit` most recent entries addressed to any of `rooms`, newest first.
    pub fn visible_to(&self, rooms: &HashSet<Room>, limit: usize) -> Vec<Arc<Envelope>> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.is_for(rooms))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Up to `limit` most recent entries regardless of rooms, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<Envelope>> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for NotificationHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
