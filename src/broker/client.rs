//! Broker client
//!
//! Provides connection management with reconnection and a minimal publish
//! surface behind the `Broker` trait. The broker is an opaque pub/sub
//! transport here; QoS and retain travel as message headers for the
//! downstream bridge.

use async_nats::{Client, ConnectOptions, HeaderMap, HeaderValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::BrokerArgs;
use crate::types::{FanoutError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Header carrying the QoS level to the broker bridge
const QOS_HEADER: &str = "Fanout-QoS";

/// Header carrying the retain flag to the broker bridge
const RETAIN_HEADER: &str = "Fanout-Retain";

/// Per-publish options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Delivery QoS level (0, 1 or 2)
    pub qos: u8,
    /// Whether the broker should retain the message for late subscribers
    pub retain: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: 1,
            retain: false,
        }
    }
}

impl PublishOptions {
    /// Retained publish at the given QoS
    pub fn retained(qos: u8) -> Self {
        Self { qos, retain: true }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.qos.to_string()) {
            headers.insert(QOS_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.retain.to_string()) {
            headers.insert(RETAIN_HEADER, value);
        }
        headers
    }
}

/// Opaque pub/sub transport
#[async_trait]
pub trait Broker: Send + Sync {
    /// Write one message to the wire
    async fn publish(&self, topic: &str, payload: Bytes, opts: &PublishOptions) -> Result<()>;

    /// Whether the connection is currently established
    fn is_connected(&self) -> bool;

    /// Flush pending messages
    async fn flush(&self) -> Result<()>;
}

/// NATS-backed broker client
#[derive(Clone)]
pub struct NatsBroker {
    /// Underlying NATS client
    client: Client,
    /// Client name for logging
    name: String,
}

impl NatsBroker {
    /// Connect to the broker
    pub async fn new(args: &BrokerArgs, name: &str) -> Result<Self> {
        info!("Connecting to broker at {}", args.broker_url);

        // Fast failure if the broker isn't available at startup; the client
        // reconnects on its own after the initial successful connection.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.broker_user, &args.broker_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.broker_url)
            .await
            .map_err(|e| FanoutError::Broker(format!("Failed to connect: {}", e)))?;

        info!("Connected to broker at {}", args.broker_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, payload: Bytes, opts: &PublishOptions) -> Result<()> {
        self.client
            .publish_with_headers(topic.to_string(), opts.headers(), payload)
            .await
            .map_err(|e| FanoutError::Broker(format!("Publish failed: {}", e)))
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| FanoutError::Broker(format!("Flush failed: {}", e)))
    }
}

/// Disconnected broker used as a dev-mode fallback
///
/// Every publish is rejected, so records simply stay unsynced until a real
/// broker is available.
#[derive(Debug, Default, Clone)]
pub struct NullBroker;

#[async_trait]
impl Broker for NullBroker {
    async fn publish(&self, _topic: &str, _payload: Bytes, _opts: &PublishOptions) -> Result<()> {
        Err(FanoutError::Broker("No broker connection".into()))
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_headers() {
        let headers = PublishOptions::retained(2).headers();
        assert_eq!(headers.get(QOS_HEADER).map(|v| v.as_str()), Some("2"));
        assert_eq!(headers.get(RETAIN_HEADER).map(|v| v.as_str()), Some("true"));
    }

    #[tokio::test]
    async fn test_null_broker_rejects() {
        let broker = NullBroker;
        assert!(!broker.is_connected());
        let result = broker
            .publish("t", Bytes::from_static(b"x"), &PublishOptions::default())
            .await;
        assert!(matches!(result, Err(FanoutError::Broker(_))));
    }
}
