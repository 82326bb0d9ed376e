//! Topic ACL synchronization
//!
//! Recomputes, for each user, the exact set of topics their current social
//! graph entitles them to, diffs it against the persisted grant rows, and
//! applies insertions and deletions so the grant table always mirrors live
//! relations. The broker's auth plugin reads the result through
//! [`AclSyncEngine::grants_for`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{
    AccessLevel, GrantChange, GrantStore, SocialGraph, TopicGrant, WILDCARD_PRINCIPAL,
};
use crate::topics::{self, TopicCategory, DAILY_TRACK_TOPIC};
use crate::types::Result;

/// Outcome of one reconcile pass for one principal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ReconcileStats {
    /// Whether the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }

    fn absorb(&mut self, other: ReconcileStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Outcome of a full reconcile sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct AclSweepStats {
    pub users_reconciled: u64,
    pub users_failed: u64,
    pub changes: ReconcileStats,
}

/// ACL synchronization engine
pub struct AclSyncEngine {
    graph: Arc<dyn SocialGraph>,
    grants: Arc<dyn GrantStore>,
    /// Administrative account excluded from reconciliation
    admin_username: String,
}

impl AclSyncEngine {
    pub fn new(
        graph: Arc<dyn SocialGraph>,
        grants: Arc<dyn GrantStore>,
        admin_username: String,
    ) -> Self {
        Self {
            graph,
            grants,
            admin_username,
        }
    }

    /// Make the persisted grants for one user exactly equal the set derived
    /// from their live relations. Idempotent: a second run with no relation
    /// changes is a no-op.
    pub async fn reconcile_user(&self, username: &str) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        // Group memberships: read-write
        let group_desired: HashMap<String, AccessLevel> = self
            .graph
            .group_ids(username)
            .await?
            .into_iter()
            .map(|id| (topics::topic(TopicCategory::Group, &id), AccessLevel::ReadWrite))
            .collect();
        stats.absorb(
            self.reconcile_category(username, TopicCategory::Group.prefix(), &group_desired)
                .await?,
        );

        // Confirmed friendships: read-write
        let friendship_desired: HashMap<String, AccessLevel> = self
            .graph
            .friendship_ids(username)
            .await?
            .into_iter()
            .map(|id| {
                (
                    topics::topic(TopicCategory::Friendship, &id),
                    AccessLevel::ReadWrite,
                )
            })
            .collect();
        stats.absorb(
            self.reconcile_category(
                username,
                TopicCategory::Friendship.prefix(),
                &friendship_desired,
            )
            .await?,
        );

        // Pending requests: sender gets level 1, recipient level 2
        let mut request_desired: HashMap<String, AccessLevel> = HashMap::new();
        for id in self.graph.sent_request_ids(username).await? {
            request_desired.insert(
                topics::topic(TopicCategory::Request, &id),
                AccessLevel::ReadOnly,
            );
        }
        for id in self.graph.received_request_ids(username).await? {
            request_desired.insert(
                topics::topic(TopicCategory::Request, &id),
                AccessLevel::ReadWrite,
            );
        }
        stats.absorb(
            self.reconcile_category(username, TopicCategory::Request.prefix(), &request_desired)
                .await?,
        );

        if !stats.is_noop() {
            debug!(
                user = %username,
                inserted = stats.inserted,
                updated = stats.updated,
                deleted = stats.deleted,
                "Reconciled user grants"
            );
        }
        Ok(stats)
    }

    /// Diff desired grants against the persisted rows under one category
    /// prefix: upsert what is missing or wrong, delete what is stale.
    async fn reconcile_category(
        &self,
        username: &str,
        prefix: &str,
        desired: &HashMap<String, AccessLevel>,
    ) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        for (topic, level) in desired {
            let grant = TopicGrant::new(topic.clone(), username, *level);
            match self.grants.upsert(&grant).await? {
                GrantChange::Inserted => stats.inserted += 1,
                GrantChange::Updated => stats.updated += 1,
                GrantChange::Unchanged => {}
            }
        }

        let current = self.grants.grants_with_prefix(username, prefix).await?;
        for grant in current {
            if !desired.contains_key(&grant.topic) {
                if self.grants.delete(&grant.topic, username).await? {
                    stats.deleted += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Reconcile every user except the administrative account. A failure for
    /// one user is logged and counted, never aborts the rest of the sweep.
    pub async fn reconcile_all(&self, include_system_grants: bool) -> Result<AclSweepStats> {
        let mut sweep = AclSweepStats::default();

        for username in self.graph.usernames().await? {
            if username == self.admin_username {
                continue;
            }
            match self.reconcile_user(&username).await {
                Ok(stats) => {
                    sweep.users_reconciled += 1;
                    sweep.changes.absorb(stats);
                }
                Err(e) => {
                    sweep.users_failed += 1;
                    warn!(user = %username, error = %e, "User reconcile failed, continuing sweep");
                }
            }
        }

        if include_system_grants {
            self.ensure_system_grants().await?;
        }

        info!(
            users = sweep.users_reconciled,
            failed = sweep.users_failed,
            inserted = sweep.changes.inserted,
            deleted = sweep.changes.deleted,
            "ACL sweep complete"
        );
        Ok(sweep)
    }

    /// Wildcard-principal read grants for the broadcast topics
    async fn ensure_system_grants(&self) -> Result<()> {
        for topic in [topics::post_broadcast_topic(), DAILY_TRACK_TOPIC] {
            self.grants
                .upsert(&TopicGrant::new(
                    topic,
                    WILDCARD_PRINCIPAL,
                    AccessLevel::ReadOnly,
                ))
                .await?;
        }
        Ok(())
    }

    /// ACL query surface for the broker's auth hook
    pub async fn grants_for(&self, principal: &str) -> Result<Vec<TopicGrant>> {
        self.grants.grants_for(principal).await
    }

    /// Move all grants to a new username (the user was renamed)
    pub async fn rename_principal(&self, from: &str, to: &str) -> Result<u64> {
        let moved = self.grants.rename_principal(from, to).await?;
        info!(from = %from, to = %to, moved, "Renamed grant principal");
        Ok(moved)
    }

    /// Drop every grant for a principal (the user was deleted)
    pub async fn remove_principal(&self, principal: &str) -> Result<u64> {
        let removed = self.grants.remove_principal(principal).await?;
        info!(principal = %principal, removed, "Removed grant principal");
        Ok(removed)
    }
}
