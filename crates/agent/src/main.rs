//! Health agent - cluster health model evaluator
//!
//! Runs next to the log-routing host: probe batches arrive on stdin, the
//! evaluated health model records leave on stdout, health and metrics are
//! served over HTTP.

use anyhow::{Context, Result};
use health_lib::model::HealthModelDefinition;
use health_lib::{AgentHealth, MonitorConfigProvider, PipelineBuilder, PipelineMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod host;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the emitted records, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting health-agent");

    let config = config::AgentConfig::load()?;
    info!(cluster_id = %config.cluster_id, "Agent configured");

    let definition = HealthModelDefinition::from_path(&config.definition_path)
        .context("Failed to load health model definition")?;
    let configs = match &config.monitor_config_path {
        Some(path) => {
            MonitorConfigProvider::load_configs(path).context("Failed to load monitor configuration")?
        }
        None => HashMap::new(),
    };

    let inventory = health_lib::InventoryRegistry::new();
    if let Some(path) = &config.inventory_path {
        match host::load_inventory(path).await {
            Ok(snapshot) => inventory.replace(snapshot),
            Err(e) => error!(error = %e, "Initial inventory load failed, presence checks fail open"),
        }
    }

    let monitor_count = definition.len();
    let mut pipeline = PipelineBuilder::new()
        .settings(config.pipeline_settings()?)
        .definition(Arc::new(definition))
        .configs(configs)
        .inventory(inventory.clone())
        .build()?;

    let logger = pipeline.logger().clone();
    logger.log_startup(AGENT_VERSION, monitor_count, pipeline.restored_instances());

    let health = AgentHealth::new(config.failure_threshold);
    let metrics = PipelineMetrics::new();
    let app_state = Arc::new(api::AppState::new(health.clone(), metrics));

    health.set_ready(true).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let refresh_handle = config.inventory_path.clone().map(|path| {
        tokio::spawn(host::refresh_inventory(
            path,
            inventory.clone(),
            Duration::from_secs(config.inventory_refresh_secs.max(1)),
            shutdown_tx.subscribe(),
        ))
    });

    let reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();

    let reason = tokio::select! {
        result = host::pump(&mut pipeline, &health, reader, &mut writer) => {
            match result {
                Ok(summary) => {
                    info!(
                        batches = summary.batches,
                        rejected = summary.rejected,
                        lines = summary.lines_written,
                        "Input closed"
                    );
                    "input closed"
                }
                Err(e) => {
                    error!(error = %e, "Host adapter failed");
                    "host adapter failed"
                }
            }
        }
        _ = tokio::signal::ctrl_c() => "SIGINT received",
    };

    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());
    if let Some(handle) = refresh_handle {
        let _ = handle.await;
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
