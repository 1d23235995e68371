// crates/fierce-ledger/src/sink.rs
//
// Event sinks for committed ledger notifications.

use std::sync::{Mutex, PoisonError};

use tracing::info;

use fierce_core::{EventSink, LedgerEvent};

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &LedgerEvent) {
        match serde_json::to_string(&event.kind) {
            Ok(detail) => info!(event = event.name(), id = %event.id, %detail, "ledger event"),
            Err(err) => info!(event = event.name(), id = %event.id, error = %err, "ledger event"),
        }
    }
}

/// Collects events in memory, in publication order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of collected events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &LedgerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fierce_core::{EventKind, Principal};

    #[test]
    fn test_memory_sink_counts_by_name() {
        let sink = MemorySink::new();
        sink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn { amount: 5 }));
        sink.publish(&LedgerEvent::new(EventKind::ParticipantDeregistered {
            user: Principal::from_label("a"),
        }));
        sink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn { amount: 7 }));
        assert_eq!(sink.count("surplus_withdrawn"), 2);
        assert_eq!(sink.events().len(), 3);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_accepts_large_amounts() {
        TracingSink.publish(&LedgerEvent::new(EventKind::SurplusWithdrawn {
            amount: u128::MAX,
        }));
    }
}
