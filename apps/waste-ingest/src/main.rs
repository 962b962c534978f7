mod config;
mod handler;
mod influx;
mod mqtt;
mod point;

use crate::config::Config;
use crate::handler::IngestHandler;
use crate::influx::InfluxWriter;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::sync::Arc;
use waste_core::config as settings;
use waste_core::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing("waste-ingest", settings::otlp_endpoint().as_deref())?;
    let config = Config::from_env()?;

    let writer = InfluxWriter::new(&config.store).context("failed to build store client")?;
    tracing::info!(
        write_url=%writer.write_url(),
        measurement=%config.store.measurement,
        "store client ready"
    );
    let handler = Arc::new(IngestHandler::new(writer, config.store.measurement.clone()));

    tracing::info!(
        host=%config.bus.host,
        port=config.bus.port,
        topic=%config.bus.topic,
        "ingest listening for readings"
    );
    mqtt::run_listener(&config.bus, handler.clone(), async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error=%err, "failed to listen for shutdown signal");
        }
        tracing::info!("shutdown signal received");
    })
    .await?;

    drop(handler);
    tracing::info!("store client released");
    Ok(())
}
