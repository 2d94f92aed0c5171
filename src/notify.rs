use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, keyed by venue. In-process consumers
/// (search reindexers, admin dashboards, tests) subscribe here; durable
/// customer notifications go through the outbox instead.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a venue's event feed. Creates the channel if needed.
    pub fn subscribe(&self, venue_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(venue_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, venue_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&venue_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a venue is deleted).
    pub fn remove(&self, venue_id: &Ulid) {
        self.channels.remove(venue_id);
    }
}
