mod config;
mod mqtt;
mod supervisor;

use crate::config::Config;
use crate::supervisor::{Supervisor, UnitFactory};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use futures::FutureExt;
use waste_core::config as settings;
use waste_core::logging::init_tracing;
use waste_core::ReadingGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing("waste-gateway", settings::otlp_endpoint().as_deref())?;
    let config = Config::from_env()?;

    let publisher = mqtt::connect(&config.bus, config.connect_timeout())
        .await
        .context("initial MQTT connection failed")?;

    let registry = config.registry.clone();
    let pacing = config.pacing;
    let factory: UnitFactory = Box::new(move |sink| {
        ReadingGenerator::new(registry.clone(), pacing)
            .run(sink)
            .boxed()
    });
    let supervisor = Supervisor::new(publisher, config.bus.topic.clone(), config.timing(), factory);

    tracing::info!(
        topic=%config.bus.topic,
        devices=config.registry.len(),
        unit_timeout_secs=config.unit_timeout_secs,
        "gateway relaying generated readings"
    );

    tokio::select! {
        _ = supervisor.run() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                tracing::warn!(error=%err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
        }
    }

    supervisor.into_publisher().disconnect().await;
    Ok(())
}
