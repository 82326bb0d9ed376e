//! MongoDB implementations of the store traits

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures_util::StreamExt;
use mongodb::Collection;
use tracing::error;

use super::{
    AccessLevel, GrantChange, GrantStore, OwnerRef, RecordCategory, RecordRef, RecordStore,
    SocialGraph, SyncRecord, TopicGrant,
};
use crate::db::schemas::{
    FeedItemDoc, GrantDoc, MessageDoc, PostDoc, SyncStatus, FEED_ITEM_COLLECTION,
    GRANT_COLLECTION, MESSAGE_COLLECTION, POST_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{FanoutError, Result};

/// Domain collections read by the social graph view
const USER_COLLECTION: &str = "users";
const GROUPSHIP_COLLECTION: &str = "groupships";
const FRIENDSHIP_COLLECTION: &str = "friendships";
const FRIEND_REQUEST_COLLECTION: &str = "friend_requests";

/// Build an `_id` filter accepting both ObjectId and plain-string ids
fn id_filter(id: &str) -> Document {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "_id": id },
    }
}

/// Convert a stored id value into the engine's string form
fn bson_id_to_string(id: &Bson) -> Option<String> {
    match id {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Grant store over the `topic_grants` collection
#[derive(Clone)]
pub struct MongoGrantStore {
    grants: MongoCollection<GrantDoc>,
}

impl MongoGrantStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            grants: client.collection(GRANT_COLLECTION).await?,
        })
    }

    fn to_grant(doc: &GrantDoc) -> Option<TopicGrant> {
        AccessLevel::from_i32(doc.rw)
            .map(|level| TopicGrant::new(doc.topic.clone(), doc.principal.clone(), level))
    }

    /// Classify an upsert against the currently stored level
    fn classify_upsert(existing: Option<i32>, desired: i32) -> GrantChange {
        match existing {
            None => GrantChange::Inserted,
            Some(rw) if rw == desired => GrantChange::Unchanged,
            Some(_) => GrantChange::Updated,
        }
    }
}

#[async_trait]
impl GrantStore for MongoGrantStore {
    async fn grants_for(&self, principal: &str) -> Result<Vec<TopicGrant>> {
        let docs = self
            .grants
            .find_many(doc! { "principal": principal })
            .await?;
        Ok(docs.iter().filter_map(Self::to_grant).collect())
    }

    async fn grants_with_prefix(&self, principal: &str, prefix: &str) -> Result<Vec<TopicGrant>> {
        // Topic prefixes are fixed constants with no regex metacharacters
        let docs = self
            .grants
            .find_many(doc! {
                "principal": principal,
                "topic": { "$regex": format!("^{}", prefix) },
            })
            .await?;
        Ok(docs.iter().filter_map(Self::to_grant).collect())
    }

    async fn upsert(&self, grant: &TopicGrant) -> Result<GrantChange> {
        let filter = doc! { "topic": &grant.topic, "principal": &grant.principal };
        let desired = grant.level.as_i32();

        // An unchanged row is left alone entirely, timestamps included, so
        // a reconcile pass with no relation changes writes nothing.
        let existing = self.grants.find_one(filter.clone()).await?;
        let change = Self::classify_upsert(existing.map(|d| d.rw), desired);
        if change == GrantChange::Unchanged {
            return Ok(change);
        }

        let now = bson::DateTime::now();
        self.grants
            .inner()
            .update_one(
                filter,
                doc! {
                    "$set": { "rw": desired, "metadata.updated_at": now },
                    "$setOnInsert": { "metadata.created_at": now },
                },
            )
            .upsert(true)
            .await
            .map_err(|e| FanoutError::Database(format!("Grant upsert failed: {}", e)))?;

        Ok(change)
    }

    async fn delete(&self, topic: &str, principal: &str) -> Result<bool> {
        let result = self
            .grants
            .delete_one(doc! { "topic": topic, "principal": principal })
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn rename_principal(&self, from: &str, to: &str) -> Result<u64> {
        let result = self
            .grants
            .update_many(
                doc! { "principal": from },
                doc! { "$set": { "principal": to, "metadata.updated_at": bson::DateTime::now() } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn remove_principal(&self, principal: &str) -> Result<u64> {
        let result = self
            .grants
            .delete_many(doc! { "principal": principal })
            .await?;
        Ok(result.deleted_count)
    }
}

/// Read-only social graph over the domain layer's collections
#[derive(Clone)]
pub struct MongoSocialGraph {
    users: Collection<Document>,
    groupships: Collection<Document>,
    friendships: Collection<Document>,
    friend_requests: Collection<Document>,
}

impl MongoSocialGraph {
    pub fn new(client: &MongoClient) -> Self {
        Self {
            users: client.raw_collection(USER_COLLECTION),
            groupships: client.raw_collection(GROUPSHIP_COLLECTION),
            friendships: client.raw_collection(FRIENDSHIP_COLLECTION),
            friend_requests: client.raw_collection(FRIEND_REQUEST_COLLECTION),
        }
    }

    /// Collect one field from every document matching the filter
    async fn collect_field(
        collection: &Collection<Document>,
        filter: Document,
        field: &str,
    ) -> Result<Vec<String>> {
        let mut cursor = collection
            .find(filter)
            .await
            .map_err(|e| FanoutError::Database(format!("Find failed: {}", e)))?;

        let mut values = Vec::new();
        while let Some(item) = cursor.next().await {
            match item {
                Ok(document) => {
                    if let Some(value) = document.get(field).and_then(bson_id_to_string) {
                        values.push(value);
                    }
                }
                Err(e) => error!("Error reading document: {}", e),
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl SocialGraph for MongoSocialGraph {
    async fn usernames(&self) -> Result<Vec<String>> {
        let values = self
            .users
            .distinct("username", doc! {})
            .await
            .map_err(|e| FanoutError::Database(format!("Distinct failed: {}", e)))?;
        Ok(values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn group_ids(&self, username: &str) -> Result<Vec<String>> {
        Self::collect_field(&self.groupships, doc! { "user": username }, "group").await
    }

    async fn friendship_ids(&self, username: &str) -> Result<Vec<String>> {
        Self::collect_field(
            &self.friendships,
            doc! { "$or": [ { "from_user": username }, { "to_user": username } ] },
            "_id",
        )
        .await
    }

    async fn sent_request_ids(&self, username: &str) -> Result<Vec<String>> {
        Self::collect_field(&self.friend_requests, doc! { "from_user": username }, "_id").await
    }

    async fn received_request_ids(&self, username: &str) -> Result<Vec<String>> {
        Self::collect_field(&self.friend_requests, doc! { "to_user": username }, "_id").await
    }
}

/// Record store over the message, post, and feed item collections
#[derive(Clone)]
pub struct MongoRecordStore {
    messages: MongoCollection<MessageDoc>,
    posts: MongoCollection<PostDoc>,
    feed_items: MongoCollection<FeedItemDoc>,
}

impl MongoRecordStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            messages: client.collection(MESSAGE_COLLECTION).await?,
            posts: client.collection(POST_COLLECTION).await?,
            feed_items: client.collection(FEED_ITEM_COLLECTION).await?,
        })
    }

    fn record_id(id: &Option<ObjectId>, category: RecordCategory) -> Result<String> {
        id.as_ref()
            .map(|oid| oid.to_hex())
            .ok_or_else(|| FanoutError::Serialization(format!("{} record missing _id", category)))
    }

    fn message_to_record(doc: &MessageDoc) -> Result<SyncRecord> {
        Ok(SyncRecord {
            reference: RecordRef::new(
                RecordCategory::Message,
                Self::record_id(&doc._id, RecordCategory::Message)?,
            ),
            owner: OwnerRef::Chat {
                id: doc.chat_id.clone(),
                kind: doc.chat_kind,
            },
            status: doc.sync,
            payload: serde_json::to_value(doc)?,
        })
    }

    fn post_to_record(doc: &PostDoc) -> Result<SyncRecord> {
        Ok(SyncRecord {
            reference: RecordRef::new(
                RecordCategory::Post,
                Self::record_id(&doc._id, RecordCategory::Post)?,
            ),
            owner: OwnerRef::User {
                id: doc.user_id.clone(),
            },
            status: doc.sync,
            payload: serde_json::to_value(doc)?,
        })
    }

    fn feed_item_to_record(doc: &FeedItemDoc) -> Result<SyncRecord> {
        Ok(SyncRecord {
            reference: RecordRef::new(
                RecordCategory::FeedItem,
                Self::record_id(&doc._id, RecordCategory::FeedItem)?,
            ),
            owner: OwnerRef::User {
                id: doc.user_id.clone(),
            },
            status: doc.sync,
            payload: serde_json::to_value(doc)?,
        })
    }

    /// Unsynced filter for a category, optionally scoped to one owner
    fn backlog_filter(category: RecordCategory, owner: Option<&OwnerRef>) -> Document {
        let mut filter = doc! { "sync": SyncStatus::Unsynced.as_str() };
        match (category, owner) {
            (RecordCategory::Message, Some(OwnerRef::Chat { id, .. })) => {
                filter.insert("chat_id", id.clone());
            }
            (_, Some(OwnerRef::User { id })) => {
                filter.insert("user_id", id.clone());
            }
            _ => {}
        }
        if category == RecordCategory::FeedItem {
            // Feedback items never leave the database
            filter.insert("kind", doc! { "$ne": "feedback" });
        }
        filter
    }

    /// CAS filter: the record must still be unsynced
    fn cas_filter(reference: &RecordRef) -> Document {
        let mut filter = id_filter(&reference.id);
        filter.insert("sync", SyncStatus::Unsynced.as_str());
        filter
    }

    fn published_update() -> Document {
        doc! {
            "$set": {
                "sync": SyncStatus::Published.as_str(),
                "metadata.updated_at": bson::DateTime::now(),
            }
        }
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn fetch(&self, reference: &RecordRef) -> Result<Option<SyncRecord>> {
        let filter = id_filter(&reference.id);
        match reference.category {
            RecordCategory::Message => match self.messages.find_one(filter).await? {
                Some(doc) => Ok(Some(Self::message_to_record(&doc)?)),
                None => Ok(None),
            },
            RecordCategory::Post => match self.posts.find_one(filter).await? {
                Some(doc) => Ok(Some(Self::post_to_record(&doc)?)),
                None => Ok(None),
            },
            RecordCategory::FeedItem => match self.feed_items.find_one(filter).await? {
                Some(doc) => Ok(Some(Self::feed_item_to_record(&doc)?)),
                None => Ok(None),
            },
        }
    }

    async fn unsynced(
        &self,
        category: RecordCategory,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<SyncRecord>> {
        let filter = Self::backlog_filter(category, owner);
        let mut records = Vec::new();
        match category {
            RecordCategory::Message => {
                for doc in self.messages.find_many(filter).await? {
                    match Self::message_to_record(&doc) {
                        Ok(record) => records.push(record),
                        Err(e) => error!(error = %e, "Skipping unserializable message"),
                    }
                }
            }
            RecordCategory::Post => {
                for doc in self.posts.find_many(filter).await? {
                    match Self::post_to_record(&doc) {
                        Ok(record) => records.push(record),
                        Err(e) => error!(error = %e, "Skipping unserializable post"),
                    }
                }
            }
            RecordCategory::FeedItem => {
                for doc in self.feed_items.find_many(filter).await? {
                    match Self::feed_item_to_record(&doc) {
                        Ok(record) => records.push(record),
                        Err(e) => error!(error = %e, "Skipping unserializable feed item"),
                    }
                }
            }
        }
        Ok(records)
    }

    async fn owners_with_backlog(&self, category: RecordCategory) -> Result<Vec<OwnerRef>> {
        let records = self.unsynced(category, None).await?;
        let mut owners: Vec<OwnerRef> = Vec::new();
        for record in records {
            if !owners.contains(&record.owner) {
                owners.push(record.owner);
            }
        }
        Ok(owners)
    }

    async fn mark_published(&self, reference: &RecordRef) -> Result<bool> {
        let filter = Self::cas_filter(reference);
        let update = Self::published_update();
        let previous = match reference.category {
            RecordCategory::Message => self
                .messages
                .find_one_and_update(filter, update)
                .await?
                .map(|_| ()),
            RecordCategory::Post => self
                .posts
                .find_one_and_update(filter, update)
                .await?
                .map(|_| ()),
            RecordCategory::FeedItem => self
                .feed_items
                .find_one_and_update(filter, update)
                .await?
                .map(|_| ()),
        };
        Ok(previous.is_some())
    }

    async fn mark_published_many(&self, references: &[RecordRef]) -> Result<u64> {
        let mut total = 0u64;
        for category in RecordCategory::ALL {
            let ids: Vec<Bson> = references
                .iter()
                .filter(|r| r.category == category)
                .map(|r| match ObjectId::parse_str(&r.id) {
                    Ok(oid) => Bson::ObjectId(oid),
                    Err(_) => Bson::String(r.id.clone()),
                })
                .collect();
            if ids.is_empty() {
                continue;
            }

            let filter = doc! { "_id": { "$in": ids }, "sync": SyncStatus::Unsynced.as_str() };
            let update = Self::published_update();
            let result = match category {
                RecordCategory::Message => self.messages.update_many(filter, update).await?,
                RecordCategory::Post => self.posts.update_many(filter, update).await?,
                RecordCategory::FeedItem => self.feed_items.update_many(filter, update).await?,
            };
            total += result.modified_count;
        }
        Ok(total)
    }

    async fn purge_published_feed_items(&self) -> Result<u64> {
        let result = self
            .feed_items
            .delete_many(doc! {
                "sync": SyncStatus::Published.as_str(),
                "kind": { "$ne": "feedback" },
            })
            .await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_filter_accepts_both_forms() {
        let hex = "65f000000000000000000001";
        let filter = id_filter(hex);
        assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));

        let filter = id_filter("plain-id");
        assert_eq!(filter.get_str("_id").unwrap(), "plain-id");
    }

    #[test]
    fn test_upsert_classification() {
        assert_eq!(
            MongoGrantStore::classify_upsert(None, 2),
            GrantChange::Inserted
        );
        assert_eq!(
            MongoGrantStore::classify_upsert(Some(2), 2),
            GrantChange::Unchanged
        );
        assert_eq!(
            MongoGrantStore::classify_upsert(Some(1), 2),
            GrantChange::Updated
        );
    }

    #[test]
    fn test_backlog_filter_scopes() {
        let owner = OwnerRef::User { id: "u1".into() };
        let filter = MongoRecordStore::backlog_filter(RecordCategory::Post, Some(&owner));
        assert_eq!(filter.get_str("user_id").unwrap(), "u1");
        assert_eq!(filter.get_str("sync").unwrap(), "unsynced");

        let filter = MongoRecordStore::backlog_filter(RecordCategory::FeedItem, None);
        assert!(filter.get_document("kind").is_ok());
    }
}
