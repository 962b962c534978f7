use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;
use waste_core::config::{self, BusConfig, SetupConfig, Settings};

use crate::point::DEFAULT_MEASUREMENT;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: Url,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bus: BusConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let setup = SetupConfig::load();
        Self::resolve(&Settings::new(&config::env_optional, setup.as_ref()))
    }

    pub fn resolve(settings: &Settings<'_>) -> Result<Self> {
        let bus = BusConfig::resolve(settings, "waste-ingest")?;

        let raw_url = settings.string(
            "WASTE_STORE_URL",
            |s| s.store_url.as_ref(),
            "http://localhost:8086",
        );
        let url = Url::parse(&raw_url).with_context(|| format!("invalid WASTE_STORE_URL: {raw_url}"))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "WASTE_STORE_URL must be http or https, got {}",
            url.scheme()
        );
        let token = settings.required_string("WASTE_STORE_TOKEN", |s| s.store_token.as_ref())?;
        let org = settings.string("WASTE_STORE_ORG", |s| s.store_org.as_ref(), "IoTOrg");
        let bucket = settings.string("WASTE_STORE_BUCKET", |s| s.store_bucket.as_ref(), "waste-data");
        let measurement = settings.string(
            "WASTE_STORE_MEASUREMENT",
            |s| s.store_measurement.as_ref(),
            DEFAULT_MEASUREMENT,
        );
        let timeout_ms = settings.u64("WASTE_STORE_TIMEOUT_MS", |s| s.store_timeout_ms, 10_000)?;

        Ok(Self {
            bus,
            store: StoreConfig {
                url,
                token,
                org,
                bucket,
                measurement,
                timeout: Duration::from_millis(timeout_ms),
            },
        })
    }
}
