//! Event synchronization engine
//!
//! `sync_one` handles the incremental path for a single record;
//! `sync_backlog` handles catch-up after downtime with one batched publish
//! per owning topic. A record is marked published only after the broker
//! confirmed the write, and the `unsynced -> published` transition is a
//! compare-and-set, so a record is never counted as delivered twice.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{PublishOptions, PublishOutcome, Publisher};
use crate::store::{OwnerRef, RecordCategory, RecordRef, RecordStore};
use crate::topics::DAILY_TRACK_TOPIC;
use crate::types::Result;

/// Result of an incremental sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// This call published the record and performed the state transition
    Published { message_id: Option<Uuid> },
    /// The record was already published; safe no-op
    AlreadyPublished,
    /// The record (or its owner) no longer exists
    Missing,
    /// The broker did not accept the publish; the record stays unsynced
    /// and remains a candidate for the next sweep
    Pending,
    /// The payload could not be serialized; skipped, not retried
    Skipped,
}

/// Counters for a backlog pass
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    /// Batched publishes the broker accepted
    pub batches_published: u64,
    /// Records marked published
    pub records_published: u64,
    /// Records left unsynced because their batch was not accepted
    pub records_pending: u64,
    /// Owners whose backlog pass failed on a storage error
    pub owners_failed: u64,
}

impl BatchStats {
    pub fn absorb(&mut self, other: BatchStats) {
        self.batches_published += other.batches_published;
        self.records_published += other.records_published;
        self.records_pending += other.records_pending;
        self.owners_failed += other.owners_failed;
    }
}

/// Event synchronization engine
pub struct EventSyncEngine {
    records: Arc<dyn RecordStore>,
    publisher: Arc<Publisher>,
    /// Per-record locks making fetch/check/publish/mark one unit under
    /// concurrent invocation for the same record
    locks: DashMap<RecordRef, Arc<Mutex<()>>>,
}

impl EventSyncEngine {
    pub fn new(records: Arc<dyn RecordStore>, publisher: Arc<Publisher>) -> Self {
        Self {
            records,
            publisher,
            locks: DashMap::new(),
        }
    }

    fn record_lock(&self, reference: &RecordRef) -> Arc<Mutex<()>> {
        self.locks
            .entry(reference.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop lock state for a record that no longer exists
    pub fn forget(&self, reference: &RecordRef) {
        self.locks.remove(reference);
    }

    /// Publish a single unsynced record to its owning topic and, only on a
    /// confirmed publish, transition it to published.
    pub async fn sync_one(&self, reference: &RecordRef) -> Result<SyncOutcome> {
        let lock = self.record_lock(reference);
        let _guard = lock.lock().await;

        let record = match self.records.fetch(reference).await? {
            Some(record) => record,
            None => {
                debug!(record = %reference, "Record gone before sync, skipping");
                self.forget(reference);
                return Ok(SyncOutcome::Missing);
            }
        };

        if record.status == crate::db::schemas::SyncStatus::Published {
            self.forget(reference);
            return Ok(SyncOutcome::AlreadyPublished);
        }

        // Feedback feed items never leave the database
        if !record.is_syncable() {
            debug!(record = %reference, "Record kind excluded from sync, skipping");
            self.forget(reference);
            return Ok(SyncOutcome::Skipped);
        }

        let payload = match serde_json::to_vec(&record.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(record = %reference, error = %e, "Payload serialization failed, skipping record");
                return Ok(SyncOutcome::Skipped);
            }
        };

        let topic = record.topic();
        let outcome = self.publisher.publish(&topic, Bytes::from(payload)).await;
        if !outcome.accepted {
            return Ok(SyncOutcome::Pending);
        }

        // The store-level CAS already happened; the lock entry is done
        let transitioned = self.records.mark_published(reference).await?;
        self.forget(reference);
        if transitioned {
            debug!(record = %reference, topic = %topic, "Record published");
            Ok(SyncOutcome::Published {
                message_id: outcome.message_id,
            })
        } else {
            // Another writer (a concurrent process) got there first
            Ok(SyncOutcome::AlreadyPublished)
        }
    }

    /// Publish the unsynced backlog of a category, batched per owning
    /// entity: one message carrying the whole batch, and the batch is
    /// marked published only if that one publish was accepted.
    pub async fn sync_backlog(
        &self,
        category: RecordCategory,
        owner: Option<&OwnerRef>,
    ) -> Result<BatchStats> {
        if let Some(owner) = owner {
            return self.sync_owner_backlog(category, owner).await;
        }

        let mut stats = BatchStats::default();
        for owner in self.records.owners_with_backlog(category).await? {
            match self.sync_owner_backlog(category, &owner).await {
                Ok(owner_stats) => stats.absorb(owner_stats),
                Err(e) => {
                    stats.owners_failed += 1;
                    warn!(category = %category, error = %e, "Backlog pass failed for one owner, continuing");
                }
            }
        }
        Ok(stats)
    }

    async fn sync_owner_backlog(
        &self,
        category: RecordCategory,
        owner: &OwnerRef,
    ) -> Result<BatchStats> {
        let mut stats = BatchStats::default();

        let records = self.records.unsynced(category, Some(owner)).await?;
        if records.is_empty() {
            // Empty backlog: no publish attempted
            return Ok(stats);
        }

        let mut references = Vec::with_capacity(records.len());
        let mut payloads = Vec::with_capacity(records.len());
        for record in &records {
            references.push(record.reference.clone());
            payloads.push(&record.payload);
        }

        let bytes = serde_json::to_vec(&payloads)?;
        let topic = owner.topic(category);
        let outcome = self.publisher.publish(&topic, Bytes::from(bytes)).await;

        if outcome.accepted {
            let transitioned = self.records.mark_published_many(&references).await?;
            stats.batches_published += 1;
            stats.records_published += transitioned;
            debug!(
                topic = %topic,
                records = transitioned,
                "Backlog batch published"
            );
        } else {
            // All-or-nothing: a rejected batch leaves every record unsynced
            stats.records_pending += references.len() as u64;
        }
        Ok(stats)
    }

    /// Publish the daily featured tracks, retained so late subscribers see
    /// the current selection. Track picking lives in the domain layer.
    pub async fn publish_daily_feature(
        &self,
        tracks: &[serde_json::Value],
    ) -> Result<Option<PublishOutcome>> {
        if tracks.is_empty() {
            return Ok(None);
        }
        let bytes = serde_json::to_vec(tracks)?;
        let outcome = self
            .publisher
            .publish_with(
                DAILY_TRACK_TOPIC,
                Bytes::from(bytes),
                PublishOptions::retained(1),
            )
            .await;
        info!(
            accepted = outcome.accepted,
            tracks = tracks.len(),
            "Daily feature publish"
        );
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, PublishOptions};
    use crate::db::schemas::{ChatKind, SyncStatus};
    use crate::store::memory::MemoryRecordStore;
    use crate::types::FanoutError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Broker that records every accepted publish and can be switched off
    #[derive(Default)]
    struct ScriptedBroker {
        down: AtomicBool,
        published: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ScriptedBroker {
        fn publishes(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }

        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn publish(&self, topic: &str, payload: Bytes, _opts: &PublishOptions) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(FanoutError::Broker("down".into()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<ScriptedBroker>, Arc<MemoryRecordStore>, Arc<EventSyncEngine>) {
        let broker = Arc::new(ScriptedBroker::default());
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            PublishOptions::default(),
            Duration::from_secs(5),
        ));
        let records = Arc::new(MemoryRecordStore::new());
        let engine = Arc::new(EventSyncEngine::new(records.clone(), publisher));
        (broker, records, engine)
    }

    fn message_ref(id: &str) -> RecordRef {
        RecordRef::new(RecordCategory::Message, id)
    }

    fn chat(id: &str) -> OwnerRef {
        OwnerRef::Chat {
            id: id.into(),
            kind: ChatKind::Friendship,
        }
    }

    #[tokio::test]
    async fn test_sync_one_publishes_and_marks() {
        let (broker, records, engine) = setup();
        records.insert(message_ref("m1"), chat("c1"), json!({"body": "hi"}));

        let outcome = engine.sync_one(&message_ref("m1")).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Published { message_id: Some(_) }));
        assert_eq!(records.status(&message_ref("m1")), Some(SyncStatus::Published));

        let publishes = broker.publishes();
        assert_eq!(publishes.len(), 1);
        assert_eq!(publishes[0].0, "mufield/friendships/c1");
    }

    #[tokio::test]
    async fn test_published_never_reverts() {
        let (_broker, records, engine) = setup();
        records.insert(message_ref("m1"), chat("c1"), json!({}));

        engine.sync_one(&message_ref("m1")).await.unwrap();
        // A second call, and a backlog pass, must leave the state alone
        let again = engine.sync_one(&message_ref("m1")).await.unwrap();
        assert_eq!(again, SyncOutcome::AlreadyPublished);
        engine
            .sync_backlog(RecordCategory::Message, None)
            .await
            .unwrap();
        assert_eq!(records.status(&message_ref("m1")), Some(SyncStatus::Published));
    }

    #[tokio::test]
    async fn test_concurrent_sync_one_publishes_exactly_once() {
        let (broker, records, engine) = setup();
        records.insert(message_ref("m1"), chat("c1"), json!({"body": "hi"}));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.sync_one(&message_ref("m1")).await.unwrap()
            }));
        }

        let mut published = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                SyncOutcome::Published { .. } => published += 1,
                SyncOutcome::AlreadyPublished => already += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        assert_eq!(published, 1);
        assert_eq!(already, 7);
        assert_eq!(broker.publishes().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_publish_leaves_record_unsynced() {
        let (broker, records, engine) = setup();
        broker.set_down(true);
        records.insert(message_ref("m1"), chat("c1"), json!({}));

        let outcome = engine.sync_one(&message_ref("m1")).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Pending);
        assert_eq!(records.status(&message_ref("m1")), Some(SyncStatus::Unsynced));
    }

    #[tokio::test]
    async fn test_missing_record_is_a_safe_noop() {
        let (broker, _records, engine) = setup();
        let outcome = engine.sync_one(&message_ref("ghost")).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Missing);
        assert!(broker.publishes().is_empty());
    }

    #[tokio::test]
    async fn test_backlog_batch_all_or_nothing() {
        // Scenario: 3 unsynced messages in chat c1, broker down
        let (broker, records, engine) = setup();
        for id in ["m1", "m2", "m3"] {
            records.insert(message_ref(id), chat("c1"), json!({"id": id}));
        }

        broker.set_down(true);
        let owner = chat("c1");
        let stats = engine
            .sync_backlog(RecordCategory::Message, Some(&owner))
            .await
            .unwrap();
        assert_eq!(stats.records_published, 0);
        assert_eq!(stats.records_pending, 3);
        assert_eq!(records.count_with_status(SyncStatus::Published), 0);

        // Broker comes back: one publish carries all three records
        broker.set_down(false);
        let stats = engine
            .sync_backlog(RecordCategory::Message, Some(&owner))
            .await
            .unwrap();
        assert_eq!(stats.batches_published, 1);
        assert_eq!(stats.records_published, 3);
        assert_eq!(records.count_with_status(SyncStatus::Published), 3);

        let publishes = broker.publishes();
        assert_eq!(publishes.len(), 1);
        let batch: Vec<serde_json::Value> = serde_json::from_slice(&publishes[0].1).unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_backlog_publishes_nothing() {
        let (broker, _records, engine) = setup();
        let stats = engine
            .sync_backlog(RecordCategory::Post, None)
            .await
            .unwrap();
        assert_eq!(stats.batches_published, 0);
        assert!(broker.publishes().is_empty());
    }

    #[tokio::test]
    async fn test_backlog_batches_per_owner() {
        let (broker, records, engine) = setup();
        records.insert(message_ref("m1"), chat("c1"), json!({}));
        records.insert(message_ref("m2"), chat("c2"), json!({}));

        let stats = engine
            .sync_backlog(RecordCategory::Message, None)
            .await
            .unwrap();
        assert_eq!(stats.batches_published, 2);
        assert_eq!(broker.publishes().len(), 2);
    }

    #[tokio::test]
    async fn test_post_payload_contains_exactly_the_record() {
        // Scenario: a post for a user with no friends still publishes
        let (broker, records, engine) = setup();
        let reference = RecordRef::new(RecordCategory::Post, "p1");
        records.insert(
            reference.clone(),
            OwnerRef::User { id: "u1".into() },
            json!({"caption": "new track"}),
        );

        let outcome = engine.sync_one(&reference).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Published { .. }));

        let publishes = broker.publishes();
        assert_eq!(publishes[0].0, "mufield/posts/u1");
        let payload: serde_json::Value = serde_json::from_slice(&publishes[0].1).unwrap();
        assert_eq!(payload, json!({"caption": "new track"}));
    }

    #[tokio::test]
    async fn test_feedback_feed_items_never_reach_the_broker() {
        let (broker, records, engine) = setup();
        let owner = OwnerRef::User { id: "u1".into() };
        let feedback = RecordRef::new(RecordCategory::FeedItem, "f1");
        records.insert(feedback.clone(), owner.clone(), json!({"kind": "feedback"}));
        records.insert(
            RecordRef::new(RecordCategory::FeedItem, "f2"),
            owner,
            json!({"kind": "post_updated"}),
        );

        // Direct sync of the feedback item is a skip, not a publish
        let outcome = engine.sync_one(&feedback).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(records.status(&feedback), Some(SyncStatus::Unsynced));

        // The backlog pass carries only the syncable item
        let stats = engine
            .sync_backlog(RecordCategory::FeedItem, None)
            .await
            .unwrap();
        assert_eq!(stats.records_published, 1);
        assert_eq!(records.status(&feedback), Some(SyncStatus::Unsynced));

        let publishes = broker.publishes();
        assert_eq!(publishes.len(), 1);
        let batch: Vec<serde_json::Value> = serde_json::from_slice(&publishes[0].1).unwrap();
        assert_eq!(batch, vec![json!({"kind": "post_updated"})]);
    }

    #[tokio::test]
    async fn test_lock_state_dropped_once_published() {
        let (_broker, records, engine) = setup();
        records.insert(message_ref("m1"), chat("c1"), json!({}));

        engine.sync_one(&message_ref("m1")).await.unwrap();
        assert!(engine.locks.is_empty());

        // Repeat calls on a published record leave nothing behind either
        engine.sync_one(&message_ref("m1")).await.unwrap();
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn test_daily_feature_is_retained_and_skips_empty() {
        let (broker, _records, engine) = setup();

        assert!(engine.publish_daily_feature(&[]).await.unwrap().is_none());
        assert!(broker.publishes().is_empty());

        let tracks = vec![json!({"track": "a"}), json!({"track": "b"})];
        let outcome = engine.publish_daily_feature(&tracks).await.unwrap().unwrap();
        assert!(outcome.accepted);
        assert_eq!(broker.publishes()[0].0, "sys/twist/music");
    }
}
