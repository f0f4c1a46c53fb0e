//! Agent events: how presentation layers follow a running agent.
//!
//! Events are published when a turn starts, streams, or ends, and whenever
//! the status changes. Subscribers that lag simply miss events; the
//! agent's watch channels always hold the latest state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agent::AgentStatus;
use crate::backend::CompleteResponse;

/// All events an agent publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StatusChanged {
        agent: String,
        from: AgentStatus,
        to: AgentStatus,
        timestamp: DateTime<Utc>,
    },

    TurnStarted {
        agent: String,
        turn_id: Uuid,
        speaker: String,
        directive_injected: bool,
        timestamp: DateTime<Utc>,
    },

    /// Partial text from the backend
    Chunk {
        turn_id: Uuid,
        content: String,
    },

    TurnCompleted {
        agent: String,
        turn_id: Uuid,
        response: CompleteResponse,
        timestamp: DateTime<Utc>,
    },

    TurnCancelled {
        agent: String,
        turn_id: Uuid,
        partial: String,
        timestamp: DateTime<Utc>,
    },

    TurnFailed {
        agent: String,
        turn_id: Uuid,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    WarmupCompleted {
        agent: String,
        model: String,
        timestamp: DateTime<Utc>,
    },

    WarmupFailed {
        agent: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    /// Short event name, handy for log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::TurnStarted { .. } => "turn_started",
            Self::Chunk { .. } => "chunk",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnCancelled { .. } => "turn_cancelled",
            Self::TurnFailed { .. } => "turn_failed",
            Self::WarmupCompleted { .. } => "warmup_completed",
            Self::WarmupFailed { .. } => "warmup_failed",
        }
    }
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let turn_id = Uuid::new_v4();

        bus.publish(AgentEvent::Chunk {
            turn_id,
            content: "Hel".into(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::Chunk { turn_id: id, content } => {
                assert_eq!(*id, turn_id);
                assert_eq!(content, "Hel");
            }
            other => panic!("Expected Chunk event, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::WarmupFailed {
            agent: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_serialization_is_tagged() {
        let event = AgentEvent::StatusChanged {
            agent: "Assistant".into(),
            from: AgentStatus::Cold,
            to: AgentStatus::ColdProcessing,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"status_changed""#));
        assert!(json.contains(r#""to":"cold_processing""#));
        assert_eq!(event.event_type(), "status_changed");
    }
}
