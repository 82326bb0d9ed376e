//! Serialized publisher
//!
//! A single logical publisher identity for the whole process. Every publish
//! goes through one mutex held across the wire write, so payload bytes for
//! two concurrent publishes are never interleaved. Broker failures surface
//! as a not-accepted outcome, never as an error: retry policy belongs to the
//! callers.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::client::{Broker, PublishOptions};

/// Result of a publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Whether the broker accepted the write
    pub accepted: bool,
    /// Opaque id assigned to the accepted message
    pub message_id: Option<Uuid>,
}

impl PublishOutcome {
    fn accepted() -> Self {
        Self {
            accepted: true,
            message_id: Some(Uuid::new_v4()),
        }
    }

    fn rejected() -> Self {
        Self {
            accepted: false,
            message_id: None,
        }
    }
}

/// Process-wide serialized publisher
pub struct Publisher {
    broker: Arc<dyn Broker>,
    /// Serializes wire writes from this logical publisher identity
    lock: Mutex<()>,
    defaults: PublishOptions,
    timeout: Duration,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, defaults: PublishOptions, timeout: Duration) -> Self {
        Self {
            broker,
            lock: Mutex::new(()),
            defaults,
            timeout,
        }
    }

    /// Publish with the default QoS and retain settings
    pub async fn publish(&self, topic: &str, payload: Bytes) -> PublishOutcome {
        self.publish_with(topic, payload, self.defaults).await
    }

    /// Publish with explicit per-call options
    ///
    /// Exactly one network write per call; no internal retries. A
    /// disconnected broker, a publish error, or a timeout all yield a
    /// not-accepted outcome and leave retrying to the caller.
    pub async fn publish_with(
        &self,
        topic: &str,
        payload: Bytes,
        opts: PublishOptions,
    ) -> PublishOutcome {
        let _guard = self.lock.lock().await;

        if !self.broker.is_connected() {
            warn!(topic = %topic, "Broker not connected, publish not accepted");
            return PublishOutcome::rejected();
        }

        let write = async {
            self.broker.publish(topic, payload, &opts).await?;
            self.broker.flush().await
        };

        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {
                let outcome = PublishOutcome::accepted();
                debug!(
                    topic = %topic,
                    message_id = ?outcome.message_id,
                    "Publish accepted"
                );
                outcome
            }
            Ok(Err(e)) => {
                warn!(topic = %topic, error = %e, "Publish failed");
                PublishOutcome::rejected()
            }
            Err(_) => {
                warn!(topic = %topic, timeout_ms = self.timeout.as_millis() as u64, "Publish timed out");
                PublishOutcome::rejected()
            }
        }
    }
}
