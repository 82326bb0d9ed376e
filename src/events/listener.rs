//! Domain event listener
//!
//! The application layer announces domain mutations on a broker control
//! subject; this listener turns them into trigger invocations. A malformed
//! message is logged and dropped, never crashing the loop.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broker::NatsBroker;
use crate::store::{RecordCategory, RecordRef};
use crate::types::{FanoutError, Result};

use super::triggers::Triggers;

/// Subject carrying domain mutation notifications
pub const DOMAIN_EVENT_SUBJECT: &str = "fanout.domain.events";

/// Notification published by the application layer after a domain mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A syncable record was created or updated back to unsynced
    RecordCreated { category: RecordCategory, id: String },
    /// A record was deleted before publishing
    RecordDeleted { category: RecordCategory, id: String },
    /// A user's relations (groups, friendships, requests) changed
    RelationChanged { username: String },
}

/// Subscribe to the domain event subject and dispatch into the triggers
pub async fn spawn_listener(
    broker: &NatsBroker,
    triggers: Arc<Triggers>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = broker
        .inner()
        .subscribe(DOMAIN_EVENT_SUBJECT.to_string())
        .await
        .map_err(|e| FanoutError::Broker(format!("Failed to subscribe: {}", e)))?;

    info!("Listening for domain events on {}", DOMAIN_EVENT_SUBJECT);

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            match serde_json::from_slice::<DomainEvent>(&msg.payload) {
                Ok(event) => dispatch(&triggers, event),
                Err(e) => {
                    error!(error = %e, "Failed to parse domain event, dropping");
                }
            }
        }
    }))
}

fn dispatch(triggers: &Triggers, event: DomainEvent) {
    match event {
        DomainEvent::RecordCreated { category, id } => {
            // Fire and forget; the task retries on its own schedule
            let _ = triggers.on_record_created(RecordRef::new(category, id));
        }
        DomainEvent::RecordDeleted { category, id } => {
            triggers.on_record_deleted(&RecordRef::new(category, id));
        }
        DomainEvent::RelationChanged { username } => {
            let _ = triggers.on_relation_changed(&username);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event: DomainEvent = serde_json::from_value(json!({
            "event": "record_created",
            "category": "message",
            "id": "m1",
        }))
        .unwrap();
        assert_eq!(
            event,
            DomainEvent::RecordCreated {
                category: RecordCategory::Message,
                id: "m1".into(),
            }
        );

        let event: DomainEvent = serde_json::from_value(json!({
            "event": "relation_changed",
            "username": "alice",
        }))
        .unwrap();
        assert_eq!(
            event,
            DomainEvent::RelationChanged {
                username: "alice".into(),
            }
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result: std::result::Result<DomainEvent, _> = serde_json::from_value(json!({
            "event": "schema_migrated",
        }));
        assert!(result.is_err());
    }
}
