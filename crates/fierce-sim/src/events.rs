// crates/fierce-sim/src/events.rs
//
// Ledger events broadcast from the vaults to simulator tasks.
//
// Vaults publish committed events on a tokio broadcast channel. The event
// logger task subscribes, logs each event, and tallies counts per kind
// until every sender is dropped.

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use fierce_core::{EventSink, LedgerEvent};

/// Publishes ledger events on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LedgerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &LedgerEvent) {
        // No subscribers is not an error; the event is simply unobserved.
        let _ = self.tx.send(event.clone());
    }
}

/// Spawn the logger task. It resolves to per-kind counts once the channel
/// closes.
pub fn spawn_event_logger(
    mut rx: broadcast::Receiver<LedgerEvent>,
) -> JoinHandle<BTreeMap<String, usize>> {
    tokio::spawn(async move {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    tracing::debug!(event = event.name(), id = %event.id, "ledger event");
                    *counts.entry(event.name().to_string()).or_insert(0) += 1;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event logger lagged; {} events dropped", skipped);
                    *counts.entry("dropped".to_string()).or_insert(0) += skipped as usize;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        counts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fierce_core::EventKind;

    #[tokio::test]
    async fn test_logger_counts_until_closed() {
        let sink = BroadcastSink::new(16);
        let handle = spawn_event_logger(sink.subscribe());
        sink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn { amount: 1 }));
        sink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn { amount: 2 }));
        drop(sink);
        let counts = handle.await.unwrap();
        assert_eq!(counts.get("surplus_withdrawn"), Some(&2));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastSink::new(4);
        sink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn { amount: 1 }));
    }
}
