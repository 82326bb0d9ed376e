//! Fanout - event fan-out and topic ACL synchronization for MuField

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout::{
    acl::AclSyncEngine,
    broker::{Broker, NatsBroker, NullBroker, PublishOptions, Publisher},
    config::Args,
    db::MongoClient,
    events::{self, EventSyncEngine, RetryPolicy, Triggers},
    store::{
        memory::{MemoryGrantStore, MemoryRecordStore, MemorySocialGraph},
        mongo::{MongoGrantStore, MongoRecordStore, MongoSocialGraph},
        GrantStore, RecordStore, SocialGraph,
    },
    sweep::SweepLoop,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fanout={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Fanout - MuField sync engine");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Broker: {}", args.broker.broker_url);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Sweep interval: {}s", args.sweep_interval_secs);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (grants, graph, records): (
        Arc<dyn GrantStore>,
        Arc<dyn SocialGraph>,
        Arc<dyn RecordStore>,
    ) = match &mongo {
        Some(client) => (
            Arc::new(MongoGrantStore::new(client).await?),
            Arc::new(MongoSocialGraph::new(client)),
            Arc::new(MongoRecordStore::new(client).await?),
        ),
        None => (
            Arc::new(MemoryGrantStore::new()),
            Arc::new(MemorySocialGraph::new()),
            Arc::new(MemoryRecordStore::new()),
        ),
    };

    // Connect to the broker (optional in dev mode)
    let nats = match NatsBroker::new(&args.broker, &format!("fanout-{}", args.node_id)).await {
        Ok(client) => {
            info!("Broker connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("Broker connection failed (dev mode, records stay unsynced): {}", e);
                None
            } else {
                error!("Broker connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let broker: Arc<dyn Broker> = match &nats {
        Some(client) => Arc::new(client.clone()),
        None => Arc::new(NullBroker),
    };

    let publisher = Arc::new(Publisher::new(
        broker,
        PublishOptions {
            qos: args.broker.qos,
            retain: args.broker.retain,
        },
        args.publish_timeout(),
    ));

    let acl = Arc::new(AclSyncEngine::new(
        Arc::clone(&graph),
        Arc::clone(&grants),
        args.admin_username.clone(),
    ));
    let engine = Arc::new(EventSyncEngine::new(Arc::clone(&records), publisher));
    let retry = RetryPolicy::new(
        args.retry_max_attempts,
        Duration::from_millis(args.retry_backoff_ms),
    );
    let triggers = Arc::new(Triggers::new(Arc::clone(&engine), Arc::clone(&acl), retry));

    // Incremental path: domain mutation notifications arrive over the broker
    let listener_task = match &nats {
        Some(client) => Some(events::spawn_listener(client, Arc::clone(&triggers)).await?),
        None => None,
    };

    let sweep = Arc::new(SweepLoop::new(
        Arc::clone(&acl),
        Arc::clone(&engine),
        Arc::clone(&records),
        Duration::from_secs(args.sweep_interval_secs),
        Duration::from_secs(args.cleanup_interval_secs),
    ));

    // The sweep loop runs once at startup, so backlog accumulated while the
    // process was down drains immediately.
    let sweep_task = Arc::clone(&sweep).spawn();
    let cleanup_task = sweep.spawn_cleanup();

    info!("Fanout running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweep_task.abort();
    cleanup_task.abort();
    if let Some(task) = listener_task {
        task.abort();
    }
    info!("Fanout stopped");
    Ok(())
}
