//! Periodic full sweep
//!
//! The safety net under the incremental triggers: every interval the sweep
//! reconciles every user's grants and drains the unsynced backlog of every
//! record category. Each phase is isolated, so a failure in one leaves the
//! others running. A slower cleanup loop purges feed items that have
//! already been published.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acl::{AclSweepStats, AclSyncEngine};
use crate::events::{BatchStats, EventSyncEngine};
use crate::store::{RecordCategory, RecordStore};
use crate::types::Result;

/// Outcome of one full sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Grant reconciliation counters; None when that phase failed outright
    pub acl: Option<AclSweepStats>,
    /// Backlog counters aggregated across categories
    pub events: BatchStats,
    /// Record categories whose backlog pass failed
    pub categories_failed: u64,
}

/// Periodic reconciliation driver
pub struct SweepLoop {
    acl: Arc<AclSyncEngine>,
    events: Arc<EventSyncEngine>,
    records: Arc<dyn RecordStore>,
    interval: Duration,
    cleanup_interval: Duration,
}

impl SweepLoop {
    pub fn new(
        acl: Arc<AclSyncEngine>,
        events: Arc<EventSyncEngine>,
        records: Arc<dyn RecordStore>,
        interval: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            acl,
            events,
            records,
            interval,
            cleanup_interval,
        }
    }

    /// One full sweep: reconcile all grants, then drain every category's
    /// backlog. Never fails as a whole; phase failures are counted and
    /// logged.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.acl.reconcile_all(true).await {
            Ok(stats) => {
                if stats.users_failed > 0 {
                    warn!(
                        users_failed = stats.users_failed,
                        "Grant sweep finished with failures"
                    );
                }
                report.acl = Some(stats);
            }
            Err(e) => {
                error!(error = %e, "Grant sweep failed, continuing with event backlog");
            }
        }

        for category in RecordCategory::ALL {
            match self.events.sync_backlog(category, None).await {
                Ok(stats) => {
                    report.events.absorb(stats);
                }
                Err(e) => {
                    report.categories_failed += 1;
                    warn!(category = %category, error = %e, "Backlog sweep failed for category");
                }
            }
        }

        info!(
            users_reconciled = report.acl.map(|a| a.users_reconciled).unwrap_or(0),
            batches_published = report.events.batches_published,
            records_published = report.events.records_published,
            records_pending = report.events.records_pending,
            "Sweep complete"
        );
        report
    }

    /// Spawn the sweep loop: one run at startup to recover whatever was
    /// missed while the process was down, then one per interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Sweep loop started");
            loop {
                self.run_once().await;
                tokio::time::sleep(self.interval).await;
            }
        })
    }

    /// Spawn the cleanup loop purging published feed items
    pub fn spawn_cleanup(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.cleanup_interval.as_secs(),
                "Cleanup loop started"
            );
            loop {
                tokio::time::sleep(self.cleanup_interval).await;
                match self.cleanup_once().await {
                    Ok(purged) if purged > 0 => {
                        info!(purged, "Purged published feed items");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Feed item cleanup failed");
                    }
                }
            }
        })
    }

    async fn cleanup_once(&self) -> Result<u64> {
        self.records.purge_published_feed_items().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, PublishOptions, Publisher};
    use crate::db::schemas::{ChatKind, SyncStatus};
    use crate::store::memory::{MemoryGrantStore, MemoryRecordStore, MemorySocialGraph};
    use crate::store::{GrantStore, OwnerRef, RecordRef, WILDCARD_PRINCIPAL};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    struct AcceptingBroker;

    #[async_trait]
    impl Broker for AcceptingBroker {
        async fn publish(&self, _topic: &str, _payload: Bytes, _opts: &PublishOptions) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sweep_loop() -> (
        Arc<MemorySocialGraph>,
        Arc<MemoryGrantStore>,
        Arc<MemoryRecordStore>,
        SweepLoop,
    ) {
        let graph = Arc::new(MemorySocialGraph::new());
        let grants = Arc::new(MemoryGrantStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let acl = Arc::new(AclSyncEngine::new(
            graph.clone(),
            grants.clone(),
            "admin".to_string(),
        ));
        let publisher = Arc::new(Publisher::new(
            Arc::new(AcceptingBroker),
            PublishOptions::default(),
            Duration::from_secs(5),
        ));
        let events = Arc::new(EventSyncEngine::new(records.clone(), publisher));
        let sweep = SweepLoop::new(
            acl,
            events,
            records.clone(),
            Duration::from_secs(900),
            Duration::from_secs(604_800),
        );
        (graph, grants, records, sweep)
    }

    #[tokio::test]
    async fn test_run_once_reconciles_and_drains() {
        let (graph, grants, records, sweep) = sweep_loop();

        graph.add_user("alice");
        graph.add_friendship("alice", "f1");
        records.insert(
            RecordRef::new(RecordCategory::Message, "m1"),
            OwnerRef::Chat {
                id: "f1".into(),
                kind: ChatKind::Friendship,
            },
            json!({"body": "hi"}),
        );

        let report = sweep.run_once().await;

        let acl = report.acl.unwrap();
        assert_eq!(acl.users_reconciled, 1);
        assert_eq!(acl.users_failed, 0);
        assert_eq!(report.events.records_published, 1);
        assert_eq!(report.categories_failed, 0);
        assert_eq!(records.count_with_status(SyncStatus::Unsynced), 0);

        // System grants for the wildcard principal come along with the sweep
        let system = grants.grants_for(WILDCARD_PRINCIPAL).await.unwrap();
        assert_eq!(system.len(), 2);
    }

    #[tokio::test]
    async fn test_run_once_on_empty_state_is_a_noop() {
        let (_graph, _grants, _records, sweep) = sweep_loop();
        let report = sweep.run_once().await;
        assert_eq!(report.events.batches_published, 0);
        assert_eq!(report.categories_failed, 0);
    }

    #[tokio::test]
    async fn test_cleanup_purges_only_published_feed_items() {
        let (_graph, _grants, records, sweep) = sweep_loop();

        let published = RecordRef::new(RecordCategory::FeedItem, "f1");
        let unsynced = RecordRef::new(RecordCategory::FeedItem, "f2");
        records.insert(
            published.clone(),
            OwnerRef::User { id: "u1".into() },
            json!({"kind": "post_updated"}),
        );
        records.insert(
            unsynced.clone(),
            OwnerRef::User { id: "u1".into() },
            json!({"kind": "post_updated"}),
        );
        records.mark_published(&published).await.unwrap();

        let purged = sweep.cleanup_once().await.unwrap();
        assert_eq!(purged, 1);
        assert!(records.status(&published).is_none());
        assert_eq!(records.status(&unsynced), Some(SyncStatus::Unsynced));
    }
}
