//! Chat message schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, SyncStatus};

/// Collection name for chat messages
pub const MESSAGE_COLLECTION: &str = "messages";

/// Kind of chat a message belongs to
///
/// Picks the topic category for the message's publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Pending friend-request conversation
    Request,
    /// Confirmed friendship conversation
    Friendship,
    /// Group conversation
    Group,
}

/// Chat message document
///
/// Domain fields are owned by the excluded domain layer; fanout only reads
/// them and flips `sync` after a confirmed publish.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning chat id
    pub chat_id: String,

    /// Kind of the owning chat
    pub chat_kind: ChatKind,

    /// Author username
    pub author: String,

    /// Message body
    pub body: String,

    /// Publication state, owned by fanout
    #[serde(default)]
    pub sync: SyncStatus,
}

impl IntoIndexes for MessageDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "chat_id": 1, "sync": 1 },
            Some(
                IndexOptions::builder()
                    .name("chat_sync_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for MessageDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
