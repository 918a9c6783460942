mod config;
mod consumer;
mod demux;
mod docker;
mod error;
mod executor;
mod health;
mod injector;
mod output;
mod registry;
mod reporter;


use crate::config::WorkerConfig;
use crate::consumer::JobConsumer;
use crate::docker::DockerManager;
use crate::executor::CodeExecutor;
use crate::registry::InFlightRegistry;
use crate::reporter::RedisReporter;
use anyhow::Context;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env()?;
    info!(
        worker = %config.consumer_name,
        concurrency = config.concurrency,
        "Coderank worker booting..."
    );

    let client = redis::Client::open(config.redis_url.as_str())
        .context("failed to create Redis client")?;
    let conn = ConnectionManager::new(client.clone())
        .await
        .context("failed to connect to Redis")?;
    // The consumer's blocking stream reads park a connection for the whole
    // block window, so they get their own; reporting stays on `conn`.
    let consumer_conn = ConnectionManager::new(client)
        .await
        .context("failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis_url);

    let manager = DockerManager::new(&config.docker_socket)
        .context("failed to connect to Docker daemon")?;
    info!("Connected to Docker daemon: {}", config.docker_socket);

    let registry = Arc::new(InFlightRegistry::new(config.concurrency));
    let executor = Arc::new(CodeExecutor::new(
        Arc::new(manager),
        config.max_output_bytes,
        config.file_delivery,
    ));
    let reporter = Arc::new(RedisReporter::new(conn));

    tokio::spawn(health::serve(config.health_addr.clone(), registry.clone()));

    let consumer = JobConsumer::new(consumer_conn, config, registry, executor, reporter);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping consumption");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Ready to accept jobs");
    consumer.run(shutdown_rx).await?;

    consumer.drain().await;
    info!("Worker shutdown complete");
    Ok(())
}
