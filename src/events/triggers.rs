//! Domain-event triggers
//!
//! The thin seam between domain mutations and the sync engines. Each hook
//! spawns its work on the runtime and returns immediately so callers on the
//! request path never wait on the broker.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::acl::AclSyncEngine;
use crate::store::RecordRef;

use super::engine::EventSyncEngine;
use super::retry::{spawn_sync_task, RetryPolicy};

/// Incremental sync triggers
pub struct Triggers {
    events: Arc<EventSyncEngine>,
    acl: Arc<AclSyncEngine>,
    retry: RetryPolicy,
}

impl Triggers {
    pub fn new(events: Arc<EventSyncEngine>, acl: Arc<AclSyncEngine>, retry: RetryPolicy) -> Self {
        Self { events, acl, retry }
    }

    /// A syncable record was created (or updated back to unsynced):
    /// drive it to published in the background.
    pub fn on_record_created(&self, reference: RecordRef) -> JoinHandle<()> {
        debug!(record = %reference, "Record created, scheduling sync");
        spawn_sync_task(Arc::clone(&self.events), reference, self.retry)
    }

    /// A record was deleted before it synced. Nothing to unpublish; just
    /// drop the per-record lock state.
    pub fn on_record_deleted(&self, reference: &RecordRef) {
        debug!(record = %reference, "Record deleted, dropping sync state");
        self.events.forget(reference);
    }

    /// A user's relations changed (group membership, friendship, request):
    /// reconcile that one user's grants in the background.
    pub fn on_relation_changed(&self, username: &str) -> JoinHandle<()> {
        debug!(username = %username, "Relations changed, scheduling grant reconcile");
        let acl = Arc::clone(&self.acl);
        let username = username.to_string();
        tokio::spawn(async move {
            match acl.reconcile_user(&username).await {
                Ok(stats) if stats.is_noop() => {}
                Ok(stats) => {
                    debug!(
                        username = %username,
                        inserted = stats.inserted,
                        updated = stats.updated,
                        deleted = stats.deleted,
                        "Grants reconciled"
                    );
                }
                Err(e) => {
                    warn!(username = %username, error = %e, "Grant reconcile failed, next sweep will retry");
                }
            }
        })
    }
}
