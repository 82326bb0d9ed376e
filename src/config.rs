//! Configuration for fanout
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

/// Fanout - event fan-out and topic ACL synchronization for MuField
#[derive(Parser, Debug, Clone)]
#[command(name = "fanout")]
#[command(about = "Event fan-out and topic ACL synchronization engine")]
pub struct Args {
    /// Unique node identifier for this fanout instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Enable development mode (in-memory stores when backends are down)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Broker configuration
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "mufield")]
    pub mongodb_db: String,

    /// Username of the administrative account excluded from ACL reconciliation
    #[arg(long, env = "ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,

    /// Interval between full reconciliation sweeps, in seconds
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "900")]
    pub sweep_interval_secs: u64,

    /// Interval between cleanup passes over published feed items, in seconds
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "604800")]
    pub cleanup_interval_secs: u64,

    /// Maximum attempts for the incremental sync fast path
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Initial backoff between incremental sync attempts, in milliseconds
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "500")]
    pub retry_backoff_ms: u64,

    /// Per-publish timeout against the broker, in milliseconds
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value = "30000")]
    pub publish_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Broker connection configuration
#[derive(Parser, Debug, Clone)]
pub struct BrokerArgs {
    /// Broker server URL
    #[arg(long, env = "BROKER_URL", default_value = "nats://127.0.0.1:4222")]
    pub broker_url: String,

    /// Broker username (optional)
    #[arg(long, env = "BROKER_USER")]
    pub broker_user: Option<String>,

    /// Broker password (optional)
    #[arg(long, env = "BROKER_PASSWORD")]
    pub broker_password: Option<String>,

    /// Default QoS level for publishes (0, 1 or 2)
    #[arg(long, env = "BROKER_QOS", default_value = "1")]
    pub qos: u8,

    /// Default retain flag for publishes
    #[arg(long, env = "BROKER_RETAIN", default_value = "false")]
    pub retain: bool,
}

impl Args {
    /// Per-publish timeout as a Duration
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.broker.qos > 2 {
            return Err(format!("BROKER_QOS must be 0, 1 or 2, got {}", self.broker.qos));
        }
        if self.sweep_interval_secs == 0 {
            return Err("SWEEP_INTERVAL_SECS must be greater than zero".to_string());
        }
        if self.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be greater than zero".to_string());
        }
        if self.admin_username.is_empty() {
            return Err("ADMIN_USERNAME must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["fanout"])
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_qos() {
        let mut args = base_args();
        args.broker.qos = 3;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let mut args = base_args();
        args.sweep_interval_secs = 0;
        assert!(args.validate().is_err());
    }
}
