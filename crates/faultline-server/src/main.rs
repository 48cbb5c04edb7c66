//! Faultline server binary.
//!
//! Runs the ingestion API and the issue consumer in a single process.
//! Backends are constructed from configuration; an unreachable backend
//! degrades the relevant path (in-memory fallback or degraded publisher)
//! instead of failing startup.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;

use api::AppState;
use config::{CacheBackend, ServerConfig, StoreSettings};

use faultline_ingest::{
    ConsumerConfig, ConsumerHandle, DedupCache, IssueConsumer, IssuePublisher, IssueReporter,
    IssueStore, MemoryDedupCache, MemoryIssueStore, MemoryRecentCache, PostgresIssueStore,
    RecentIssueCache, ValkeyDedupCache, ValkeyRecentCache, CONNECT_BACKOFF, ISSUES_TOPIC,
};

/// Faultline issue ingestion server.
#[derive(Parser, Debug)]
#[command(name = "faultline-server")]
#[command(about = "Run the Faultline ingestion API and issue consumer")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise tracing
    let filter = if cli.verbose {
        "debug,hyper=info,tower=info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    info!("Faultline server starting");

    // Load configuration
    let config = ServerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        info!(error = %e, "Failed to load config, using defaults");
        ServerConfig::default()
    });

    info!(
        listen_addr = %config.api.listen_addr,
        consumer_enabled = config.consumer.enabled,
        "Configuration loaded"
    );

    // Document store
    let store: Arc<dyn IssueStore> = match &config.store {
        StoreSettings::Memory => Arc::new(MemoryIssueStore::new()),
        StoreSettings::Postgres { url } => match PostgresIssueStore::new(url).await {
            Ok(store) => {
                info!("Connected to PostgreSQL issue store");
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to PostgreSQL, using in-memory store");
                Arc::new(MemoryIssueStore::new())
            }
        },
    };

    // Read cache
    let cache: Arc<dyn RecentIssueCache> = match &config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryRecentCache::new(config.cache.ttl())),
        CacheBackend::Valkey {
            url,
            key_prefix,
            pool_size,
        } => match ValkeyRecentCache::new(url, key_prefix.clone(), config.cache.ttl(), *pool_size)
            .await
        {
            Ok(cache) => {
                info!("Connected to Valkey read cache");
                Arc::new(cache)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Valkey, using in-memory read cache");
                Arc::new(MemoryRecentCache::new(config.cache.ttl()))
            }
        },
    };

    // Dedup cache
    let dedup: Arc<dyn DedupCache> = match &config.dedup.backend {
        CacheBackend::Memory => Arc::new(MemoryDedupCache::new()),
        CacheBackend::Valkey {
            url,
            key_prefix,
            pool_size,
        } => match ValkeyDedupCache::new(url, key_prefix.clone(), *pool_size).await {
            Ok(cache) => {
                info!("Connected to Valkey dedup cache");
                Arc::new(cache)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Valkey, using in-memory dedup cache");
                Arc::new(MemoryDedupCache::new())
            }
        },
    };

    // Publisher: bounded-retry connect, degraded mode on exhaustion.
    let broker_config = config.broker.clone();
    let publisher = Arc::new(
        IssuePublisher::connect(ISSUES_TOPIC, &CONNECT_BACKOFF, move || {
            let broker_config = broker_config.clone();
            async move { broker_config.connect().await }
        })
        .await,
    );

    if publisher.is_degraded() {
        warn!("Publisher degraded: reports will be accepted but not forwarded");
    }

    // Consumer: shares the publisher's broker handle.
    let consumer_handle: Option<ConsumerHandle> = if config.consumer.enabled {
        match publisher.backend() {
            Some(backend) => {
                let consumer_config = ConsumerConfig {
                    topic: ISSUES_TOPIC.to_owned(),
                    group: config.consumer.group.clone(),
                    poll_timeout: Duration::from_secs(config.consumer.poll_timeout_secs),
                    max_batch: config.consumer.max_batch,
                    ..Default::default()
                };
                let consumer =
                    IssueConsumer::new(backend, store.clone(), cache.clone(), consumer_config);
                Some(consumer.start())
            }
            None => {
                warn!("Broker unavailable, consumer not started");
                None
            }
        }
    } else {
        None
    };

    // Reporter and API
    let reporter = IssueReporter::new(publisher.clone(), dedup, store.clone())
        .with_dedup_ttl(config.dedup.ttl());

    let state = Arc::new(AppState {
        reporter,
        publisher,
        store,
        cache,
    });

    let app = api::router(state);

    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Ingestion API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = consumer_handle {
        info!("Stopping consumer");
        handle.shutdown().await;
    }

    info!("Faultline server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
