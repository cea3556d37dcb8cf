//! Retranslator binary entry point.
//!
//! Usage: retranslator [--config <path>] [--log-level <level>]
//!
//! Loads `config.yml`, connects the outbox database and the broker, then
//! relays pack events until SIGINT or SIGTERM.

mod metrics_server;
mod outbox;

use anyhow::Context;
use clap::Parser;
use outbox::Outbox;
use pack_publisher::RedisStreamPublisher;
use retranslator::{Retranslator, RetranslatorMetrics};
use retranslator_config::{init_logging, AppConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Relays logistic pack events from the outbox table to the broker.
#[derive(Parser, Debug)]
#[command(name = "retranslator")]
#[command(about = "Relays logistic pack events from the outbox table to the broker")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "RETRANSLATOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    init_logging(&config, args.log_level.as_deref())?;

    let outbox = Outbox::connect(&config).await?;
    let store = outbox.store();
    let backlog = store
        .stats()
        .await
        .context("Outbox table is not readable")?;

    let publisher = RedisStreamPublisher::connect(config.publisher_config())
        .await
        .context("Failed to connect to the broker")?;

    let broker = publisher.endpoint().await;
    info!(
        version = %config.project.version,
        commit = %config.project.commit_hash,
        environment = %config.project.environment,
        store = store.backend(),
        broker = %broker,
        topics = ?config.broker.topics,
        partitions = config.broker.partitions,
        created = backlog.created,
        in_flight = backlog.in_flight,
        failed = backlog.failed,
        "Retranslator starting"
    );

    let metrics = Arc::new(RetranslatorMetrics::new()?);
    let shutdown = CancellationToken::new();
    let metrics_task = if config.metrics.enabled {
        let listener = metrics_server::bind(&config.metrics).await?;
        let app = metrics_server::router(metrics.registry().clone(), &config.metrics.path);
        Some(tokio::spawn(metrics_server::serve(listener, app, shutdown.clone())))
    } else {
        None
    };

    let engine = Retranslator::new(
        config.retranslator_config(),
        store,
        Arc::new(publisher),
        metrics,
    )?;
    engine.start()?;

    shutdown_signal().await;

    engine.close().await;
    shutdown.cancel();
    if let Some(task) = metrics_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
            Err(e) => error!(error = %e, "Metrics server task panicked"),
        }
    }
    drop(engine);
    outbox.close().await;

    info!("Retranslator exited");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
