//! Standalone generator: prints one JSON reading per line on stdout, with a
//! marker line after each pass over the registry. Logs go to stderr.

use anyhow::{Context, Result};
use std::io::Write;
use tokio::sync::mpsc;
use waste_core::config::{self, SetupConfig, Settings};
use waste_core::logging::init_tracing;
use waste_core::ReadingGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("waste-sim", config::otlp_endpoint().as_deref())?;
    let setup = SetupConfig::load();
    let settings = Settings::new(&config::env_optional, setup.as_ref());

    let pacing = config::resolve_pacing(&settings)?;
    let registry = config::resolve_registry(&settings)?;
    tracing::info!(devices = registry.len(), ?pacing, "simulator started");

    let (tx, mut rx) = mpsc::channel::<String>(16);
    let generator = tokio::spawn(ReadingGenerator::new(registry, pacing).run(tx));

    let stdout = std::io::stdout();
    let result: Result<()> = async {
        loop {
            tokio::select! {
                line = rx.recv() => {
                    let Some(line) = line else { break };
                    let mut out = stdout.lock();
                    writeln!(out, "{line}").context("failed to write to stdout")?;
                    out.flush().context("failed to flush stdout")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
    .await;

    generator.abort();
    result
}
