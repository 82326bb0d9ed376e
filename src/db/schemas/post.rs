//! Post schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, SyncStatus};

/// Collection name for posts
pub const POST_COLLECTION: &str = "posts";

/// Post document
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PostDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user id
    pub user_id: String,

    /// Post caption
    pub caption: String,

    /// Attached track, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,

    /// Publication state, owned by fanout
    #[serde(default)]
    pub sync: SyncStatus,
}

impl IntoIndexes for PostDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "sync": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_sync_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for PostDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
