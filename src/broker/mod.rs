//! Broker transport and the serialized publisher

pub mod client;
pub mod publisher;

pub use client::{Broker, NatsBroker, NullBroker, PublishOptions};
pub use publisher::{PublishOutcome, Publisher};
