use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/notifications, one channel per ledger
/// (staff member id, or business id for the business pool).
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

    /// Subscribe to notifications for a ledger. Creates the channel if needed.
    pub fn subscribe(&self, ledger_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(ledger_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, ledger_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&ledger_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a channel once its last listener is gone.
    pub fn release(&self, ledger_id: &Ulid) {
        self.channels
            .remove_if(ledger_id, |_, sender| sender.receiver_count() == 0);
    }
}
