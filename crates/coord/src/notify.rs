// Lock notifications for presentation layers ("being edited by X").
//
// Delivery is fire-and-forget: `notify` never blocks and never fails the lock
// operation that produced the event.

use std::fmt::Debug;

use teamgraph_common::types::LockEvent;
use tokio::sync::broadcast;
use tracing::info;

pub const DEFAULT_EVENT_BUFFER: usize = 256;

pub trait NotificationSink: Send + Sync + Debug {
    fn notify(&self, event: LockEvent);
}

/// Fans events out to in-process subscribers. Slow subscribers lag and lose
/// events instead of applying backpressure.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LockEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, event: LockEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: LockEvent) {
        info!(
            entity_id = %event.entity_id,
            holder_id = %event.holder_id,
            action = event.action.as_str(),
            at = %event.at,
            "lock event"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use teamgraph_common::types::{LockAction, LockEvent};

    use super::{BroadcastSink, NotificationSink};

    fn event(action: LockAction) -> LockEvent {
        LockEvent { entity_id: "E1".into(), holder_id: "ana".into(), action, at: Utc::now() }
    }

    #[test]
    fn broadcast_without_subscribers_does_not_fail() {
        BroadcastSink::new(4).notify(event(LockAction::Acquired));
    }

    #[test]
    fn broadcast_delivers_to_subscribers() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();

        sink.notify(event(LockAction::Released));

        let received = rx.try_recv().expect("event should be buffered");
        assert_eq!(received.action, LockAction::Released);
    }
}
