use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dao::models::StoreChange;

/// Row-change notifications fanned out per session id.
///
/// Backends call [`ChangeFeed::notify`] after every successful write so that
/// subscribers filtered on `session_id` observe inserts and updates in the
/// order this process performed them.
pub struct ChangeFeed {
    capacity: usize,
    channels: DashMap<Uuid, broadcast::Sender<StoreChange>>,
}

impl ChangeFeed {
    /// Create a feed whose per-session channels buffer `capacity` changes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Subscribe to the changes of one session.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<StoreChange> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver a change to the session's current subscribers.
    pub fn notify(&self, session_id: Uuid, change: StoreChange) {
        let Some(sender) = self.channels.get(&session_id) else {
            return;
        };
        if sender.send(change).is_err() {
            debug!(%session_id, "store change dropped: no subscribers");
        }
    }

    /// Drop the channel of a finished session.
    pub fn forget(&self, session_id: Uuid) {
        self.channels.remove(&session_id);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
