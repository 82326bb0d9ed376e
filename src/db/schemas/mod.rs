//! Database schemas for fanout
//!
//! Defines MongoDB document structures for topic grants and the syncable
//! domain records (messages, posts, feed items). Domain fields are read-only
//! inputs here; this subsystem owns only the grant collection and each
//! record's `sync` field.

mod feed_item;
mod grant;
mod message;
mod metadata;
mod post;

pub use feed_item::{FeedItemDoc, FeedKind, FEED_ITEM_COLLECTION};
pub use grant::{GrantDoc, GRANT_COLLECTION};
pub use message::{ChatKind, MessageDoc, MESSAGE_COLLECTION};
pub use metadata::Metadata;
pub use post::{PostDoc, POST_COLLECTION};

use serde::{Deserialize, Serialize};

/// Publication state of a syncable record
///
/// Created `Unsynced`; transitions to `Published` only after a confirmed
/// successful publish to the broker, and never transitions backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Unsynced,
    Published,
}

impl SyncStatus {
    /// Wire/storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Published => "published",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_roundtrip() {
        let s: SyncStatus = serde_json::from_str("\"published\"").unwrap();
        assert_eq!(s, SyncStatus::Published);
        assert_eq!(serde_json::to_string(&SyncStatus::Unsynced).unwrap(), "\"unsynced\"");
    }

    #[test]
    fn test_default_is_unsynced() {
        assert_eq!(SyncStatus::default(), SyncStatus::Unsynced);
    }
}
