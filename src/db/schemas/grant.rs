//! Topic grant (ACL row) schema
//!
//! One row per `(topic, principal)` pair, mirroring the broker auth
//! plugin's ACL table. A row is only ever stored with level 1 or 2;
//! "no access" is the absence of a row.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for topic grants
pub const GRANT_COLLECTION: &str = "topic_grants";

/// Topic grant document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GrantDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Broker topic string
    pub topic: String,

    /// Username or the wildcard principal "*"
    pub principal: String,

    /// Permission level: 1 = read-only, 2 = read-write
    pub rw: i32,
}

impl GrantDoc {
    /// Create a new grant document
    pub fn new(topic: String, principal: String, rw: i32) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            topic,
            principal,
            rw,
        }
    }
}

impl IntoIndexes for GrantDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on (topic, principal)
            (
                doc! { "topic": 1, "principal": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("topic_principal_unique".to_string())
                        .build(),
                ),
            ),
            // Index on principal for the broker auth lookup
            (
                doc! { "principal": 1 },
                Some(
                    IndexOptions::builder()
                        .name("principal_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for GrantDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
