//! Retry policy for incremental sync tasks
//!
//! A bounded number of attempts with exponential backoff and jitter. A
//! record whose retries run out is not lost; it stays unsynced and the next
//! sweep picks it up.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::store::RecordRef;
use crate::types::FanoutError;

use super::engine::{EventSyncEngine, SyncOutcome};

/// Backoff schedule for a sync task
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }

    /// Backoff before attempt `attempt + 1`, doubling each time
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Backoff with up to 50% random jitter to spread out thundering herds
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter)
    }
}

/// Spawn a background task that drives one record to published
///
/// Resolves without retrying on terminal outcomes (published, already
/// published, missing, unserializable). Retries with backoff when the
/// broker did not accept the publish or the store failed transiently.
pub fn spawn_sync_task(
    engine: Arc<EventSyncEngine>,
    reference: RecordRef,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for attempt in 1..=policy.max_attempts {
            match engine.sync_one(&reference).await {
                Ok(SyncOutcome::Published { .. })
                | Ok(SyncOutcome::AlreadyPublished)
                | Ok(SyncOutcome::Missing)
                | Ok(SyncOutcome::Skipped) => return,
                Ok(SyncOutcome::Pending) => {
                    debug!(
                        record = %reference,
                        attempt,
                        "Publish not accepted, will retry"
                    );
                }
                Err(e) if e.is_retryable() => {
                    warn!(record = %reference, attempt, error = %e, "Sync failed, will retry");
                }
                Err(e) => {
                    log_terminal_error(&reference, &e);
                    return;
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.jittered_backoff(attempt)).await;
            }
        }
        debug!(
            record = %reference,
            attempts = policy.max_attempts,
            "Retries exhausted, record left for the next sweep"
        );
    })
}

fn log_terminal_error(reference: &RecordRef, e: &FanoutError) {
    error!(record = %reference, error = %e, "Sync failed permanently");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, PublishOptions, Publisher};
    use crate::db::schemas::{ChatKind, SyncStatus};
    use crate::store::memory::MemoryRecordStore;
    use crate::store::{OwnerRef, RecordCategory};
    use crate::types::Result;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    /// Broker that fails the first `failures` publishes, then accepts
    struct FlakyBroker {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn publish(&self, _topic: &str, _payload: Bytes, _opts: &PublishOptions) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(FanoutError::Broker("transient".into()));
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let broker = Arc::new(FlakyBroker {
            failures: 2,
            attempts: AtomicUsize::new(0),
        });
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            PublishOptions::default(),
            Duration::from_secs(5),
        ));
        let records = Arc::new(MemoryRecordStore::new());
        let engine = Arc::new(EventSyncEngine::new(records.clone(), publisher));

        let reference = RecordRef::new(RecordCategory::Message, "m1");
        records.insert(
            reference.clone(),
            OwnerRef::Chat {
                id: "c1".into(),
                kind: ChatKind::Group,
            },
            json!({"body": "hi"}),
        );

        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        spawn_sync_task(Arc::clone(&engine), reference.clone(), policy)
            .await
            .unwrap();

        assert_eq!(records.status(&reference), Some(SyncStatus::Published));
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_record_resolves_without_retrying() {
        let publisher = Arc::new(Publisher::new(
            Arc::new(crate::broker::NullBroker),
            PublishOptions::default(),
            Duration::from_secs(5),
        ));
        let records = Arc::new(MemoryRecordStore::new());
        let engine = Arc::new(EventSyncEngine::new(records, publisher));

        // Policy with a long backoff: resolving quickly proves no retry ran
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let reference = RecordRef::new(RecordCategory::Post, "ghost");
        let task = spawn_sync_task(engine, reference, policy);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
