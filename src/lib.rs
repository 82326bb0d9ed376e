//! Fanout - event fan-out and topic ACL synchronization for MuField
//!
//! Bridges the MuField social database and the message broker: domain
//! records (chat messages, posts, feed items) are published to their
//! owning topics, and per-user topic permissions are kept consistent with
//! the social graph (groups, friendships, friend requests).
//!
//! ## Engines
//!
//! - **Publisher**: one serialized publisher identity over the broker
//! - **ACL sync**: reconciles stored topic grants against the social graph
//! - **Event sync**: publish-then-mark record delivery with an exactly-once
//!   state transition
//! - **Sweep**: periodic full reconciliation catching whatever the
//!   incremental triggers missed

pub mod acl;
pub mod broker;
pub mod config;
pub mod db;
pub mod events;
pub mod store;
pub mod sweep;
pub mod topics;
pub mod types;

pub use config::Args;
pub use types::{FanoutError, Result};
