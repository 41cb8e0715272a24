use dashmap::DashMap;
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::events::SessionEvent;

/// Per-session broadcast channels.
///
/// Delivery is best effort: subscribers connected at publish time eventually
/// receive the event, slow ones may miss events and must refetch.
pub struct ChannelHub {
    capacity: usize,
    channels: DashMap<Uuid, broadcast::Sender<SessionEvent>>,
}

impl ChannelHub {
    /// Construct a hub whose channels buffer `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Register a subscriber for the session's subsequent events.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<SessionEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to the session's current subscribers.
    ///
    /// Returns how many subscribers were reached.
    pub fn publish(&self, session_id: Uuid, event: SessionEvent) -> usize {
        let name = event.name();
        let Some(sender) = self.channels.get(&session_id) else {
            debug!(%session_id, event = name, "no channel for session; event dropped");
            return 0;
        };
        match sender.send(event) {
            Ok(receivers) => {
                debug!(%session_id, event = name, receivers, "published session event");
                receivers
            }
            Err(_) => {
                debug!(%session_id, event = name, "no subscribers; event dropped");
                0
            }
        }
    }

    /// Drop the session's channel; receivers observe the channel closing.
    pub fn close(&self, session_id: Uuid) {
        if self.channels.remove(&session_id).is_some() {
            debug!(%session_id, "closed session channel");
        }
    }

    /// Subscribe and adapt the receiver into a stream that skips lagged events
    /// and ends when the channel closes.
    pub fn stream(&self, session_id: Uuid) -> BoxStream<'static, SessionEvent> {
        let mut receiver = self.subscribe(session_id);
        let events = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%session_id, skipped, "session stream lagged; skipping events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        events.boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_of_their_session_only() {
        let hub = ChannelHub::new(8);
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(session_a);
        let mut rx_b = hub.subscribe(session_b);

        assert_eq!(hub.publish(session_a, SessionEvent::JoinsClosed), 1);
        assert_eq!(rx_a.recv().await.unwrap(), SessionEvent::JoinsClosed);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let hub = ChannelHub::new(8);
        assert_eq!(hub.publish(Uuid::new_v4(), SessionEvent::JoinsClosed), 0);
    }

    #[tokio::test]
    async fn stream_ends_when_channel_closes() {
        let hub = ChannelHub::new(8);
        let session = Uuid::new_v4();
        let stream = hub.stream(session);
        hub.publish(session, SessionEvent::SessionStarting { starts_in_secs: 3 });
        hub.close(session);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![SessionEvent::SessionStarting { starts_in_secs: 3 }]);
    }

    #[tokio::test]
    async fn lagged_subscribers_keep_receiving() {
        let hub = ChannelHub::new(1);
        let session = Uuid::new_v4();
        let stream = hub.stream(session);
        hub.publish(session, SessionEvent::SessionStarting { starts_in_secs: 1 });
        hub.publish(session, SessionEvent::JoinsClosed);
        hub.close(session);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![SessionEvent::JoinsClosed]);
    }
}
