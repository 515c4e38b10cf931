//! Event hub: one broadcast channel, filtered per subscriber by room membership.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::Role;

use crate::events::{Envelope, Event, Room};
use crate::notify::NotificationHistory;

/// Sequence counter and history, locked together so sequence numbers reach
/// subscribers in order.
struct Journal {
    last_seq: u64,
    history: NotificationHistory,
}

struct Inner {
    tx: broadcast::Sender<Arc<Envelope>>,
    members: Mutex<HashMap<Room, usize>>,
    journal: Mutex<Journal>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cheaply cloneable handle to the process-wide event relay.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

impl EventHub {
    pub fn new(channel_capacity: usize, history_size: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                members: Mutex::new(HashMap::new()),
                journal: Mutex::new(Journal {
                    last_seq: 0,
                    history: NotificationHistory::new(history_size),
                }),
            }),
        }
    }

    /// Route an event to its rooms, record it and fan it out.
    pub fn publish(&self, event: Event, actor_id: &str) -> Arc<Envelope> {
        let mut journal = guard(&self.inner.journal);
        journal.last_seq += 1;
        let seq = journal.last_seq;
        let envelope = Arc::new(Envelope {
            seq,
            rooms: event.rooms(),
            summary: event.summary(),
            event,
            actor_id: actor_id.to_string(),
            at: Utc::now(),
        });
        journal.history.record(envelope.clone());

        // No receivers is fine: nobody is connected.
        let delivered = self.inner.tx.send(envelope.clone()).unwrap_or(0);
        drop(journal);
        tracing::debug!(
            "📣 {} #{} → {} rooms, {} receivers",
            envelope.event.name(),
            seq,
            envelope.rooms.len(),
            delivered
        );
        envelope
    }

    /// Subscribe on behalf of a user, joining their default rooms.
    pub fn subscribe(&self, user_id: &str, role: Role) -> Subscription {
        let mut sub = Subscription {
            hub: self.clone(),
            user_id: user_id.to_string(),
            role,
            rooms: HashSet::new(),
            stream: BroadcastStream::new(self.inner.tx.subscribe()),
        };
        for room in Room::defaults_for(user_id, role) {
            sub.insert(room);
        }
        sub
    }

    /// Unfiltered stream of every envelope. Not counted as a room member.
    pub fn tap(&self) -> BroadcastStream<Arc<Envelope>> {
        BroadcastStream::new(self.inner.tx.subscribe())
    }

    /// Current member count per room, keyed by room name.
    pub fn room_counts(&self) -> BTreeMap<String, usize> {
        guard(&self.inner.members)
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(room, n)| (room.to_string(), *n))
            .collect()
    }

    /// Recent history, newest first. `None` returns everything.
    pub fn history(&self, rooms: Option<&HashSet<Room>>, limit: usize) -> Vec<Arc<Envelope>> {
        let journal = guard(&self.inner.journal);
        match rooms {
            Some(rooms) => journal.history.visible_to(rooms, limit),
            None => journal.history.recent(limit),
        }
    }

    fn adjust(&self, room: &Room, joined: bool) {
        let mut members = guard(&self.inner.members);
        let count = members.entry(room.clone()).or_insert(0);
        if joined {
            *count += 1;
        } else {
            *count = count.saturating_sub(1);
            if *count == 0 {
                members.remove(room);
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256, 100)
    }
}

/// One subscriber's view of the hub.
pub struct Subscription {
    hub: EventHub,
    user_id: String,
    role: Role,
    rooms: HashSet<Room>,
    stream: BroadcastStream<Arc<Envelope>>,
}

impl Subscription {
    fn insert(&mut self, room: Room) -> bool {
        if self.rooms.contains(&room) {
            return false;
        }
        self.hub.adjust(&room, true);
        self.rooms.insert(room);
        true
    }

    /// Joined rooms, sorted by name.
    pub fn rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().cloned().collect();
        rooms.sort_by_key(|r| r.to_string());
        rooms
    }

    pub fn room_set(&self) -> &HashSet<Room> {
        &self.rooms
    }

    /// Join a room. Returns `false` if already a member.
    pub fn join(&mut self, room: Room) -> Result<bool> {
        if !room.allowed_for(&self.user_id, self.role) {
            return Err(VendHubError::forbidden(format!("Cannot join room {room}")));
        }
        Ok(self.insert(room))
    }

    /// Leave a room. Returns `false` if not a member.
    pub fn leave(&mut self, room: &Room) -> bool {
        if self.rooms.remove(room) {
            self.hub.adjust(room, false);
            true
        } else {
            false
        }
    }

    /// Next envelope addressed to one of our rooms. `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<Arc<Envelope>> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(envelope) if envelope.is_for(&self.rooms) => return Some(envelope),
                Ok(_) => continue,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber {} lagged, skipped {skipped} events", self.user_id);
                }
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for room in self.rooms.drain() {
            self.hub.adjust(&room, false);
        }
    }
}
