//! In-memory stores
//!
//! DashMap-backed implementations of the store traits. Used in dev mode
//! when MongoDB is unreachable, and by unit tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    AccessLevel, GrantChange, GrantStore, OwnerRef, RecordCategory, RecordRef, RecordStore,
    SocialGraph, SyncRecord, TopicGrant,
};
use crate::db::schemas::SyncStatus;
use crate::types::Result;

/// In-memory grant store keyed by (topic, principal)
#[derive(Default)]
pub struct MemoryGrantStore {
    grants: DashMap<(String, String), AccessLevel>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grant rows
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn grants_for(&self, principal: &str) -> Result<Vec<TopicGrant>> {
        Ok(self
            .grants
            .iter()
            .filter(|e| e.key().1 == principal)
            .map(|e| TopicGrant::new(e.key().0.clone(), e.key().1.clone(), *e.value()))
            .collect())
    }

    async fn grants_with_prefix(&self, principal: &str, prefix: &str) -> Result<Vec<TopicGrant>> {
        Ok(self
            .grants
            .iter()
            .filter(|e| e.key().1 == principal && e.key().0.starts_with(prefix))
            .map(|e| TopicGrant::new(e.key().0.clone(), e.key().1.clone(), *e.value()))
            .collect())
    }

    async fn upsert(&self, grant: &TopicGrant) -> Result<GrantChange> {
        let key = (grant.topic.clone(), grant.principal.clone());
        match self.grants.insert(key, grant.level) {
            None => Ok(GrantChange::Inserted),
            Some(previous) if previous == grant.level => Ok(GrantChange::Unchanged),
            Some(_) => Ok(GrantChange::Updated),
        }
    }

    async fn delete(&self, topic: &str, principal: &str) -> Result<bool> {
        Ok(self
            .grants
            .remove(&(topic.to_string(), principal.to_string()))
            .is_some())
    }

    async fn rename_principal(&self, from: &str, to: &str) -> Result<u64> {
        let moved: Vec<(String, AccessLevel)> = self
            .grants
            .iter()
            .filter(|e| e.key().1 == from)
            .map(|e| (e.key().0.clone(), *e.value()))
            .collect();

        let mut count = 0u64;
        for (topic, level) in moved {
            self.grants.remove(&(topic.clone(), from.to_string()));
            self.grants.insert((topic, to.to_string()), level);
            count += 1;
        }
        Ok(count)
    }

    async fn remove_principal(&self, principal: &str) -> Result<u64> {
        let mut removed = 0u64;
        self.grants.retain(|k, _| {
            if k.1 == principal {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

/// Per-user relation sets
#[derive(Default, Clone)]
struct Relations {
    groups: Vec<String>,
    friendships: Vec<String>,
    sent_requests: Vec<String>,
    received_requests: Vec<String>,
}

/// In-memory social graph
#[derive(Default)]
pub struct MemorySocialGraph {
    users: DashMap<String, Relations>,
}

impl MemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str) {
        self.users.entry(username.to_string()).or_default();
    }

    pub fn add_group(&self, username: &str, group_id: &str) {
        let mut rel = self.users.entry(username.to_string()).or_default();
        rel.groups.push(group_id.to_string());
    }

    pub fn remove_group(&self, username: &str, group_id: &str) {
        if let Some(mut rel) = self.users.get_mut(username) {
            rel.groups.retain(|g| g != group_id);
        }
    }

    pub fn add_friendship(&self, username: &str, friendship_id: &str) {
        let mut rel = self.users.entry(username.to_string()).or_default();
        rel.friendships.push(friendship_id.to_string());
    }

    pub fn add_sent_request(&self, username: &str, request_id: &str) {
        let mut rel = self.users.entry(username.to_string()).or_default();
        rel.sent_requests.push(request_id.to_string());
    }

    pub fn add_received_request(&self, username: &str, request_id: &str) {
        let mut rel = self.users.entry(username.to_string()).or_default();
        rel.received_requests.push(request_id.to_string());
    }

    fn relations(&self, username: &str) -> Relations {
        self.users
            .get(username)
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SocialGraph for MemorySocialGraph {
    async fn usernames(&self) -> Result<Vec<String>> {
        Ok(self.users.iter().map(|e| e.key().clone()).collect())
    }

    async fn group_ids(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.relations(username).groups)
    }

    async fn friendship_ids(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.relations(username).friendships)
    }

    async fn sent_request_ids(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.relations(username).sent_requests)
    }

    async fn received_request_ids(&self, username: &str) -> Result<Vec<String>> {
        Ok(self.relations(username).received_requests)
    }
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<RecordRef, SyncRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record in its initial unsynced state
    pub fn insert(&self, reference: RecordRef, owner: OwnerRef, payload: serde_json::Value) {
        let record = SyncRecord {
            reference: reference.clone(),
            owner,
            status: SyncStatus::Unsynced,
            payload,
        };
        self.records.insert(reference, record);
    }

    /// Remove a record (owning entity deleted)
    pub fn remove(&self, reference: &RecordRef) {
        self.records.remove(reference);
    }

    /// Current status of a record, if it exists
    pub fn status(&self, reference: &RecordRef) -> Option<SyncStatus> {
        self.records.get(reference).map(|r| r.status)
    }

    /// Count of records in a given state
    pub fn count_with_status(&self, status: SyncStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch(&self, reference: &RecordRef) -> Result<Option<SyncRecord>> {
        Ok(self.records.get(reference).map(|r| r.clone()))
    }

    async fn unsynced(
        &self,
        category: RecordCategory,
        owner: Option<&OwnerRef>,
    ) -> Result<Vec<SyncRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.reference.category == category
                    && r.status == SyncStatus::Unsynced
                    && r.is_syncable()
                    && owner.map_or(true, |o| &r.owner == o)
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn owners_with_backlog(&self, category: RecordCategory) -> Result<Vec<OwnerRef>> {
        let mut owners: Vec<OwnerRef> = Vec::new();
        for r in self.records.iter() {
            if r.reference.category == category
                && r.status == SyncStatus::Unsynced
                && r.is_syncable()
                && !owners.contains(&r.owner)
            {
                owners.push(r.owner.clone());
            }
        }
        Ok(owners)
    }

    async fn mark_published(&self, reference: &RecordRef) -> Result<bool> {
        // The DashMap entry lock makes the check-then-set atomic
        if let Some(mut record) = self.records.get_mut(reference) {
            if record.status == SyncStatus::Unsynced {
                record.status = SyncStatus::Published;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn mark_published_many(&self, references: &[RecordRef]) -> Result<u64> {
        let mut count = 0u64;
        for reference in references {
            if self.mark_published(reference).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_published_feed_items(&self) -> Result<u64> {
        let mut purged = 0u64;
        self.records.retain(|reference, record| {
            let is_purgeable = reference.category == RecordCategory::FeedItem
                && record.status == SyncStatus::Published
                && record.payload.get("kind").and_then(|k| k.as_str()) != Some("feedback");
            if is_purgeable {
                purged += 1;
            }
            !is_purgeable
        });
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ChatKind;
    use serde_json::json;

    fn message_ref(id: &str) -> RecordRef {
        RecordRef::new(RecordCategory::Message, id)
    }

    fn chat_owner(id: &str) -> OwnerRef {
        OwnerRef::Chat {
            id: id.into(),
            kind: ChatKind::Friendship,
        }
    }

    #[tokio::test]
    async fn test_grant_upsert_reports_change() {
        let store = MemoryGrantStore::new();
        let grant = TopicGrant::new("mufield/groups/1", "alice", AccessLevel::ReadWrite);

        assert_eq!(store.upsert(&grant).await.unwrap(), GrantChange::Inserted);
        assert_eq!(store.upsert(&grant).await.unwrap(), GrantChange::Unchanged);

        let downgraded = TopicGrant::new("mufield/groups/1", "alice", AccessLevel::ReadOnly);
        assert_eq!(store.upsert(&downgraded).await.unwrap(), GrantChange::Updated);
    }

    #[tokio::test]
    async fn test_grant_rename_principal() {
        let store = MemoryGrantStore::new();
        store
            .upsert(&TopicGrant::new("t/1", "old", AccessLevel::ReadWrite))
            .await
            .unwrap();
        store
            .upsert(&TopicGrant::new("t/2", "old", AccessLevel::ReadOnly))
            .await
            .unwrap();

        let moved = store.rename_principal("old", "new").await.unwrap();
        assert_eq!(moved, 2);
        assert!(store.grants_for("old").await.unwrap().is_empty());
        assert_eq!(store.grants_for("new").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_principal_counts_removed_rows() {
        let store = MemoryGrantStore::new();
        store
            .upsert(&TopicGrant::new("t/1", "gone", AccessLevel::ReadWrite))
            .await
            .unwrap();
        store
            .upsert(&TopicGrant::new("t/2", "gone", AccessLevel::ReadOnly))
            .await
            .unwrap();
        store
            .upsert(&TopicGrant::new("t/1", "kept", AccessLevel::ReadWrite))
            .await
            .unwrap();

        assert_eq!(store.remove_principal("gone").await.unwrap(), 2);
        assert_eq!(store.remove_principal("gone").await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_backlog_excludes_feedback_items() {
        let store = MemoryRecordStore::new();
        let user = OwnerRef::User { id: "u1".into() };
        store.insert(
            RecordRef::new(RecordCategory::FeedItem, "f1"),
            user.clone(),
            json!({"kind": "feedback"}),
        );
        store.insert(
            RecordRef::new(RecordCategory::FeedItem, "f2"),
            user,
            json!({"kind": "friend_suggested"}),
        );

        let backlog = store.unsynced(RecordCategory::FeedItem, None).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].reference.id, "f2");

        let owners = store
            .owners_with_backlog(RecordCategory::FeedItem)
            .await
            .unwrap();
        assert_eq!(owners.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_published_is_one_shot() {
        let store = MemoryRecordStore::new();
        store.insert(message_ref("m1"), chat_owner("c1"), json!({"body": "hi"}));

        assert!(store.mark_published(&message_ref("m1")).await.unwrap());
        assert!(!store.mark_published(&message_ref("m1")).await.unwrap());
        assert_eq!(store.status(&message_ref("m1")), Some(SyncStatus::Published));
    }

    #[tokio::test]
    async fn test_backlog_scoped_to_owner() {
        let store = MemoryRecordStore::new();
        store.insert(message_ref("m1"), chat_owner("c1"), json!({}));
        store.insert(message_ref("m2"), chat_owner("c1"), json!({}));
        store.insert(message_ref("m3"), chat_owner("c2"), json!({}));

        let owner = chat_owner("c1");
        let backlog = store
            .unsynced(RecordCategory::Message, Some(&owner))
            .await
            .unwrap();
        assert_eq!(backlog.len(), 2);

        let owners = store.owners_with_backlog(RecordCategory::Message).await.unwrap();
        assert_eq!(owners.len(), 2);
    }

    #[tokio::test]
    async fn test_purge_keeps_feedback_and_unsynced() {
        let store = MemoryRecordStore::new();
        let user = OwnerRef::User { id: "u1".into() };
        store.insert(
            RecordRef::new(RecordCategory::FeedItem, "f1"),
            user.clone(),
            json!({"kind": "post_deleted"}),
        );
        store.insert(
            RecordRef::new(RecordCategory::FeedItem, "f2"),
            user.clone(),
            json!({"kind": "feedback"}),
        );
        store.insert(
            RecordRef::new(RecordCategory::FeedItem, "f3"),
            user,
            json!({"kind": "post_deleted"}),
        );

        store
            .mark_published(&RecordRef::new(RecordCategory::FeedItem, "f1"))
            .await
            .unwrap();
        store
            .mark_published(&RecordRef::new(RecordCategory::FeedItem, "f2"))
            .await
            .unwrap();

        let purged = store.purge_published_feed_items().await.unwrap();
        assert_eq!(purged, 1);
        // Feedback survives even when published; unsynced items survive
        assert!(store.status(&RecordRef::new(RecordCategory::FeedItem, "f2")).is_some());
        assert!(store.status(&RecordRef::new(RecordCategory::FeedItem, "f3")).is_some());
    }
}
