//! Pool Event Sinks
//!
//! `LoggingEventPublisher` turns pool events into tracing records for the
//! CLI; `InMemoryEventCollector` keeps them for assertions.

use tracing::{debug, info, warn};

use crate::domain::events::PoolEvent;
use crate::domain::ports::EventPublisher;
use crate::layout::DriveId;

/// Writes each pool event as one tracing record carrying its JSON body.
///
/// Refused rebuilds and integrity alerts are always logged at warn.
/// Routine transitions go to info for the CLI and to debug for library
/// callers that did not ask for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher {
    routine_at_info: bool,
}

impl LoggingEventPublisher {
    /// Routine transitions at info
    pub fn info_level() -> Self {
        Self {
            routine_at_info: true,
        }
    }

    /// Routine transitions at debug
    pub fn debug_level() -> Self {
        Self {
            routine_at_info: false,
        }
    }
}

impl EventPublisher for LoggingEventPublisher {
    fn publish(&self, event: PoolEvent) {
        let kind = event.event_type();
        let drive = event.drive_id().map_or(-1, |id| id as i64);
        let body = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        match event {
            PoolEvent::RebuildRejected { .. } | PoolEvent::IntegrityAtRisk { .. } => {
                warn!(kind, drive, event = %body, "Pool alert")
            }
            _ if self.routine_at_info => info!(kind, drive, event = %body, "Pool event"),
            _ => debug!(kind, drive, event = %body, "Pool event"),
        }
    }
}

/// Keeps every published event in arrival order
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<PoolEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose `event_type()` is `kind`
    pub fn events_of_type(&self, kind: &str) -> Vec<PoolEvent> {
        self.matching(|e| e.event_type() == kind)
    }

    /// Events naming `drive_id`
    pub fn events_for_drive(&self, drive_id: DriveId) -> Vec<PoolEvent> {
        self.matching(|e| e.drive_id() == Some(drive_id))
    }

    fn matching(&self, keep: impl Fn(&PoolEvent) -> bool) -> Vec<PoolEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| keep(e))
            .cloned()
            .collect()
    }
}

impl EventPublisher for InMemoryEventCollector {
    fn publish(&self, event: PoolEvent) {
        self.events.write().push(event);
    }

    fn publish_all(&self, events: Vec<PoolEvent>) {
        self.events.write().extend(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_publisher_accepts_every_kind() {
        for publisher in [
            LoggingEventPublisher::info_level(),
            LoggingEventPublisher::debug_level(),
        ] {
            publisher.publish(PoolEvent::drive_status_changed(1, false));
            publisher.publish(PoolEvent::domain_status_changed(0, true));
            publisher.publish(PoolEvent::rebuild_rejected(4, "parity offline"));
        }
    }

    #[test]
    fn test_collector_filters() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector.publish(PoolEvent::drive_status_changed(1, false));
        collector.publish_all(vec![
            PoolEvent::drive_status_changed(1, true),
            PoolEvent::drive_rebuilt(2, "LocalParityRecompute", 12),
            PoolEvent::domain_status_changed(0, false),
        ]);

        assert_eq!(collector.len(), 4);
        assert_eq!(collector.events_of_type("DriveStatusChanged").len(), 2);
        assert_eq!(collector.events_for_drive(1).len(), 2);
        assert_eq!(collector.events_for_drive(2).len(), 1);

        collector.clear();
        assert!(collector.is_empty());
    }
}
