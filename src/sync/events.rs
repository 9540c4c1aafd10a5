//! Sync event bus.
//!
//! Every recovered failure and every commit decision is emitted here instead
//! of being swallowed, so callers and tests can observe what a refresh did.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A cached snapshot was read at startup.
    CacheLoaded { items: usize },
    /// The cached snapshot could not be read or parsed; started empty.
    CacheCorrupt { error: String },
    /// One endpoint failed; its previous contribution was kept.
    EndpointFailed {
        seq: u64,
        endpoint: String,
        error: String,
    },
    /// Every endpoint of a refresh failed; nothing changed.
    AllEndpointsFailed { seq: u64 },
    /// The server reported no new data.
    Unchanged { seq: u64 },
    /// A refresh resolved after a newer one had already committed.
    StaleDiscarded { seq: u64, committed: u64 },
    /// A new snapshot was committed.
    Committed { seq: u64, items: usize },
    /// Writing the snapshot to storage failed.
    PersistFailed { error: String },
}

impl SyncEvent {
    /// Whether this event reports a (recovered) failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncEvent::CacheCorrupt { .. }
                | SyncEvent::EndpointFailed { .. }
                | SyncEvent::AllEndpointsFailed { .. }
                | SyncEvent::PersistFailed { .. }
        )
    }
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
pub struct SyncEventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        match self.sender.send(event) {
            Ok(n) => tracing::trace!("Sync event emitted ({} receivers)", n),
            // No subscribers; events are fire-and-forget.
            Err(_) => tracing::trace!("Sync event emitted (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = SyncEventBus::default();
        bus.emit(SyncEvent::Unchanged { seq: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_events() {
        let bus = SyncEventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(SyncEvent::PersistFailed {
            error: "disk full".into(),
        });
        bus.emit(SyncEvent::Committed { seq: 2, items: 3 });

        let first = rx.try_recv().unwrap();
        assert!(first.is_failure());
        let second = rx.try_recv().unwrap();
        assert_eq!(second, SyncEvent::Committed { seq: 2, items: 3 });
        assert!(!second.is_failure());
    }
}
