//! Store traits and shared record types
//!
//! The engines only speak these traits. MongoDB implementations live in
//! `store::mongo`; `store::memory` backs dev mode and unit tests.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::schemas::{ChatKind, FeedKind, SyncStatus};
use crate::topics::{self, TopicCategory};
use crate::types::Result;

/// Categories of syncable domain records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    Message,
    Post,
    FeedItem,
}

impl RecordCategory {
    /// All categories, in the order the full sweep visits them
    pub const ALL: [RecordCategory; 3] = [Self::Message, Self::Post, Self::FeedItem];
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Post => "post",
            Self::FeedItem => "feed_item",
        };
        f.write_str(name)
    }
}

/// Reference to a single syncable record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub category: RecordCategory,
    pub id: String,
}

impl RecordRef {
    pub fn new(category: RecordCategory, id: impl Into<String>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}

/// The entity that owns a record and thereby its topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    /// A chat owns messages; its kind picks the topic category
    Chat { id: String, kind: ChatKind },
    /// A user owns posts and feed items
    User { id: String },
}

impl OwnerRef {
    /// Topic this owner's records of the given category publish to
    pub fn topic(&self, category: RecordCategory) -> String {
        match self {
            Self::Chat { id, kind } => {
                let topic_category = match kind {
                    ChatKind::Request => TopicCategory::Request,
                    ChatKind::Friendship => TopicCategory::Friendship,
                    ChatKind::Group => TopicCategory::Group,
                };
                topics::topic(topic_category, id)
            }
            Self::User { id } => {
                let topic_category = match category {
                    RecordCategory::Post => TopicCategory::Post,
                    _ => TopicCategory::UserFeed,
                };
                topics::topic(topic_category, id)
            }
        }
    }
}

/// A syncable record as the engines see it: reference, owner, publication
/// state, and the serialized domain payload
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub reference: RecordRef,
    pub owner: OwnerRef,
    pub status: SyncStatus,
    pub payload: serde_json::Value,
}

impl SyncRecord {
    /// Topic this record publishes to
    pub fn topic(&self) -> String {
        self.owner.topic(self.reference.category)
    }

    /// Whether this record is mirrored to the broker at all
    ///
    /// Feedback feed items never leave the database; every other record
    /// kind syncs.
    pub fn is_syncable(&self) -> bool {
        if self.reference.category != RecordCategory::FeedItem {
            return true;
        }
        match self.payload.get("kind") {
            Some(kind) => serde_json::from_value::<FeedKind>(kind.clone())
                .map(|k| k.is_syncable())
                .unwrap_or(true),
            None => true,
        }
    }
}

/// Permission level carried by a grant
///
/// Level 0 ("no access") is represented by the absence of a grant row and
/// is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
}

impl AccessLevel {
    /// Integer representation the broker auth plugin expects
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::ReadOnly => 1,
            Self::ReadWrite => 2,
        }
    }

    /// Parse from the stored integer; 0 and unknown values map to None
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::ReadOnly),
            2 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// An ACL grant binding a principal to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicGrant {
    pub topic: String,
    pub principal: String,
    pub level: AccessLevel,
}

impl TopicGrant {
    pub fn new(topic: impl Into<String>, principal: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            topic: topic.into(),
            principal: principal.into(),
            level,
        }
    }
}

/// The wildcard principal: every authenticated client
pub const WILDCARD_PRINCIPAL: &str = "*";

/// Effect of an upsert on the grant table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantChange {
    /// Row did not exist and was created
    Inserted,
    /// Row existed with a different level and was updated
    Updated,
    /// Row already matched
    Unchanged,
}

/// Persisted ACL rows, keyed by (topic, principal)
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// All grants for a principal (the broker auth query surface)
    async fn grants_for(&self, principal: &str) -> Result<Vec<TopicGrant>>;

    /// Grants for a principal whose topic starts with the given prefix
    async fn grants_with_prefix(&self, principal: &str, prefix: &str) -> Result<Vec<TopicGrant>>;

    /// Insert or update a grant row
    async fn upsert(&self, grant: &TopicGrant) -> Result<GrantChange>;

    /// Delete a single grant row; returns whether a row existed
    async fn delete(&self, topic: &str, principal: &str) -> Result<bool>;

    /// Move every grant from one principal to another (username change)
    async fn rename_principal(&self, from: &str, to: &str) -> Result<u64>;

    /// Delete every grant for a principal (user deletion)
    async fn remove_principal(&self, principal: &str) -> Result<u64>;
}

/// Read-only view of the social graph, owned by the domain layer
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Every known username
    async fn usernames(&self) -> Result<Vec<String>>;

    /// Ids of groups the user belongs to
    async fn group_ids(&self, username: &str) -> Result<Vec<String>>;

    /// Ids of the user's confirmed friendships
    async fn friendship_ids(&self, username: &str) -> Result<Vec<String>>;

    /// Ids of pending requests the user sent
    async fn sent_request_ids(&self, username: &str) -> Result<Vec<String>>;

    /// Ids of pending requests the user received
    async fn received_request_ids(&self, username: &str) -> Result<Vec<String>>;
}

/// Syncable records and their publication state
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a single record; None if it (or its owner) no longer exists
    async fn fetch(&self, reference: &RecordRef) -> Result<Option<SyncRecord>>;

    /// All unsynced records of a category, optionally scoped to one owner
    async fn unsynced(
        &self,
        category: RecordCategory,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<SyncRecord>>;

    /// Owners that currently have unsynced records of a category
    async fn owners_with_backlog(&self, category: RecordCategory) -> Result<Vec<OwnerRef>>;

    /// Compare-and-set `unsynced -> published`; returns whether this call
    /// performed the transition
    async fn mark_published(&self, reference: &RecordRef) -> Result<bool>;

    /// Compare-and-set a whole batch; returns how many records transitioned
    async fn mark_published_many(&self, references: &[RecordRef]) -> Result<u64>;

    /// Remove published, non-feedback feed items (cleanup sweep)
    async fn purge_published_feed_items(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_topic_for_chat_kinds() {
        let chat = OwnerRef::Chat {
            id: "c1".into(),
            kind: ChatKind::Group,
        };
        assert_eq!(chat.topic(RecordCategory::Message), "mufield/groups/c1");

        let chat = OwnerRef::Chat {
            id: "c2".into(),
            kind: ChatKind::Request,
        };
        assert_eq!(chat.topic(RecordCategory::Message), "mufield/requests/c2");
    }

    #[test]
    fn test_owner_topic_for_user() {
        let user = OwnerRef::User { id: "u1".into() };
        assert_eq!(user.topic(RecordCategory::Post), "mufield/posts/u1");
        assert_eq!(user.topic(RecordCategory::FeedItem), "sys/twist/feeds/u1");
    }

    #[test]
    fn test_feedback_feed_items_are_not_syncable() {
        let feed_item = |kind: serde_json::Value| SyncRecord {
            reference: RecordRef::new(RecordCategory::FeedItem, "f1"),
            owner: OwnerRef::User { id: "u1".into() },
            status: SyncStatus::Unsynced,
            payload: serde_json::json!({ "kind": kind }),
        };

        assert!(!feed_item("feedback".into()).is_syncable());
        assert!(feed_item("post_deleted".into()).is_syncable());

        // Messages sync regardless of any kind field in their payload
        let message = SyncRecord {
            reference: RecordRef::new(RecordCategory::Message, "m1"),
            owner: OwnerRef::Chat {
                id: "c1".into(),
                kind: ChatKind::Group,
            },
            status: SyncStatus::Unsynced,
            payload: serde_json::json!({ "kind": "feedback" }),
        };
        assert!(message.is_syncable());
    }

    #[test]
    fn test_access_level_integers() {
        assert_eq!(AccessLevel::ReadOnly.as_i32(), 1);
        assert_eq!(AccessLevel::ReadWrite.as_i32(), 2);
        assert_eq!(AccessLevel::from_i32(0), None);
        assert_eq!(AccessLevel::from_i32(2), Some(AccessLevel::ReadWrite));
    }
}
