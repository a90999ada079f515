//! Broadcast fan-out of symbol changes.
//!
//! Uses [`tokio::sync::broadcast`] so that every subscriber receives every
//! update without any single subscriber blocking the others. Publishing is
//! fire-and-forget: the mutation has already been persisted by the time an
//! update is emitted, so nothing on this path can fail it.

use flicknest_types::SymbolUpdate;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default channel capacity (number of buffered updates before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared update bus. Clone it cheaply – all clones share the same channel.
#[derive(Clone, Debug)]
pub struct UpdateBus {
    sender: broadcast::Sender<SymbolUpdate>,
}

impl UpdateBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Hand `update` to every current subscriber.
    ///
    /// Returns the number of subscribers reached. Zero subscribers is a
    /// normal condition and returns `0`.
    pub fn publish(&self, update: SymbolUpdate) -> usize {
        match self.sender.send(update) {
            Ok(n) => n,
            Err(broadcast::error::SendError(update)) => {
                debug!(id = %update.id, "no realtime subscribers for update");
                0
            }
        }
    }

    pub fn subscribe(&self) -> UpdateReceiver {
        UpdateReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One realtime subscription.
pub struct UpdateReceiver {
    receiver: broadcast::Receiver<SymbolUpdate>,
}

impl UpdateReceiver {
    /// Wait for the next update.
    ///
    /// A subscriber that fell behind skips the dropped updates (logged) and
    /// keeps going. Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<SymbolUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "realtime subscriber lagged, updates skipped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flicknest_types::{Source, Symbol};

    fn make_update(id: &str) -> SymbolUpdate {
        let symbol = Symbol {
            state: Some(true),
            source: Some(Source::Mobile),
            ..Symbol::default()
        };
        SymbolUpdate::new(id, symbol, Source::Mobile)
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = UpdateBus::default();
        let mut rx = bus.subscribe();

        let update = make_update("sym_001");
        assert_eq!(bus.publish(update.clone()), 1);

        let received = rx.recv().await.expect("update must arrive");
        assert_eq!(received.event_id, update.event_id);
        assert_eq!(received.id, "sym_001");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_update() {
        let bus = UpdateBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let update = make_update("sym_002");
        assert_eq!(bus.publish(update.clone()), 2);

        assert_eq!(rx1.recv().await.unwrap().event_id, update.event_id);
        assert_eq!(rx2.recv().await.unwrap().event_id, update.event_id);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = UpdateBus::default();
        assert_eq!(bus.publish(make_update("sym_001")), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let bus = UpdateBus::new(4);
        let mut slow = bus.subscribe();

        for i in 0..20 {
            bus.publish(make_update(&format!("sym_{i:03}")));
        }

        // The oldest updates were dropped; the receiver resumes at the
        // oldest one still buffered.
        let next = slow.recv().await.expect("receiver must keep going after lag");
        assert_eq!(next.id, "sym_016");
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = UpdateBus::default();
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }
}
