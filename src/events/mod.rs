//! Event fan-out
//!
//! Turns syncable domain records into per-topic publish operations and
//! keeps their publication state consistent with what actually reached
//! the broker.

pub mod engine;
pub mod listener;
pub mod retry;
pub mod triggers;

pub use engine::{BatchStats, EventSyncEngine, SyncOutcome};
pub use listener::{spawn_listener, DomainEvent, DOMAIN_EVENT_SUBJECT};
pub use retry::{spawn_sync_task, RetryPolicy};
pub use triggers::Triggers;
