//! System feed item schema
//!
//! Feed items notify a user of events they would otherwise miss (a deleted
//! message, a removed friendship, a friend suggestion). They are created by
//! the domain layer and fanned out to the user's system feed topic.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, SyncStatus};

/// Collection name for feed items
pub const FEED_ITEM_COLLECTION: &str = "feed_items";

/// Closed set of feed item kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// User feedback to the operators; never synced to the broker
    Feedback,
    /// A friendship was removed, ref is the friendship id
    FriendshipDeleted,
    /// A message was deleted, ref is the message id
    MessageDeleted,
    /// A message was edited, ref is the message id
    MessageUpdated,
    /// A post was deleted, ref is the post id
    PostDeleted,
    /// A post was edited, ref is the post id
    PostUpdated,
    /// A friend suggestion, ref is the suggested user id
    FriendSuggested,
}

impl FeedKind {
    /// Whether items of this kind are mirrored to the broker
    pub fn is_syncable(&self) -> bool {
        !matches!(self, Self::Feedback)
    }
}

/// Feed item document
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FeedItemDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// User whose feed this item belongs to
    pub user_id: String,

    /// What happened
    pub kind: FeedKind,

    /// Id of the entity the item refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    /// Publication state, owned by fanout
    #[serde(default)]
    pub sync: SyncStatus,
}

impl IntoIndexes for FeedItemDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "user_id": 1, "sync": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_sync_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "kind": 1 },
                Some(
                    IndexOptions::builder()
                        .name("kind_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for FeedItemDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
