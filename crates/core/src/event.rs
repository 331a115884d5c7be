//! Domain event system, the telemetry sink.
//!
//! The loop publishes structured step/usage events here. Nothing in the
//! control flow depends on anyone listening: publishing never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A loop step is about to call the reasoning engine
    StepStarted {
        task_id: String,
        step: u32,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning engine answered and its usage was recorded
    ReasoningCompleted {
        task_id: String,
        step: u32,
        model: String,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        timestamp: DateTime<Utc>,
    },

    /// A capability was dispatched
    CapabilityInvoked {
        task_id: String,
        name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The budget governor raised an alert
    BudgetAlert {
        level: String,
        message: String,
        usage_percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A task reached a terminal status
    TaskFinished {
        task_id: String,
        status: String,
        steps: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // no subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::CapabilityInvoked {
            task_id: "t-1".into(),
            name: "echo@1.0".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::CapabilityInvoked { name, success, .. } => {
                assert_eq!(name, "echo@1.0");
                assert!(success);
            }
            _ => panic!("Expected CapabilityInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TaskFinished {
            task_id: "t-2".into(),
            status: "completed".into(),
            steps: 1,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_are_tagged() {
        let event = DomainEvent::StepStarted {
            task_id: "t-3".into(),
            step: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_started");
        assert_eq!(json["step"], 2);
    }
}
