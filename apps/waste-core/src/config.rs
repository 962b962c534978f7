//! Settings resolution shared by the gateway, the ingest service and the
//! simulator.
//!
//! Every option is read from the environment first (trimmed; empty counts as
//! unset), then from the optional JSON setup file, then falls back to a
//! built-in default.

use crate::device::{Device, DeviceRegistry};
use crate::generator::Pacing;
use anyhow::{Context, Result};
use rumqttc::MqttOptions;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/waste-telemetry/config.json";

pub const DEFAULT_TOPIC: &str = "city/waste/containers";

pub fn setup_config_path() -> PathBuf {
    match env_optional("WASTE_SETUP_CONFIG_PATH") {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DEFAULT_SETUP_CONFIG_PATH),
    }
}

/// Optional on-disk overrides, keyed the same way as the env options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub mqtt_host: Option<String>,
    #[serde(default)]
    pub mqtt_port: Option<u16>,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default)]
    pub mqtt_keepalive_secs: Option<u64>,
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub store_token: Option<String>,
    #[serde(default)]
    pub store_org: Option<String>,
    #[serde(default)]
    pub store_bucket: Option<String>,
    #[serde(default)]
    pub store_measurement: Option<String>,
    #[serde(default)]
    pub store_timeout_ms: Option<u64>,
    #[serde(default)]
    pub gateway_unit_timeout_secs: Option<u64>,
    #[serde(default)]
    pub gateway_cycle_pause_secs: Option<u64>,
    #[serde(default)]
    pub gateway_connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sim_device_delay_ms: Option<u64>,
    #[serde(default)]
    pub sim_cycle_delay_ms: Option<u64>,
    #[serde(default)]
    pub devices: Option<Vec<Device>>,
}

impl SetupConfig {
    pub fn load() -> Option<Self> {
        Self::load_from(&setup_config_path())
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read setup config; using env defaults"
                );
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse setup config; using env defaults"
                );
                None
            }
        }
    }
}

pub fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Env lookup plus setup-file fallback. Tests swap the env lookup for a map.
pub struct Settings<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
    setup: Option<&'a SetupConfig>,
}

impl<'a> Settings<'a> {
    pub fn new(env: &'a dyn Fn(&str) -> Option<String>, setup: Option<&'a SetupConfig>) -> Self {
        Self { env, setup }
    }

    pub fn setup(&self) -> Option<&'a SetupConfig> {
        self.setup
    }

    fn env(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn file_string(&self, pick: impl FnOnce(&'a SetupConfig) -> Option<&'a String>) -> Option<String> {
        self.setup
            .and_then(pick)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn optional_string(
        &self,
        key: &str,
        pick: impl FnOnce(&'a SetupConfig) -> Option<&'a String>,
    ) -> Option<String> {
        self.env(key).or_else(|| self.file_string(pick))
    }

    pub fn string(
        &self,
        key: &str,
        pick: impl FnOnce(&'a SetupConfig) -> Option<&'a String>,
        default: &str,
    ) -> String {
        self.optional_string(key, pick)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn required_string(
        &self,
        key: &str,
        pick: impl FnOnce(&'a SetupConfig) -> Option<&'a String>,
    ) -> Result<String> {
        self.optional_string(key, pick)
            .with_context(|| format!("{key} is required (env or setup config)"))
    }

    pub fn u64(
        &self,
        key: &str,
        pick: impl FnOnce(&'a SetupConfig) -> Option<u64>,
        default: u64,
    ) -> Result<u64> {
        if let Some(raw) = self.env(key) {
            return raw
                .parse::<u64>()
                .with_context(|| format!("invalid {key}: {raw:?}"));
        }
        Ok(self.setup.and_then(pick).filter(|v| *v != 0).unwrap_or(default))
    }

    pub fn u16(
        &self,
        key: &str,
        pick: impl FnOnce(&'a SetupConfig) -> Option<u16>,
        default: u16,
    ) -> Result<u16> {
        if let Some(raw) = self.env(key) {
            return raw
                .parse::<u16>()
                .with_context(|| format!("invalid {key}: {raw:?}"));
        }
        Ok(self.setup.and_then(pick).filter(|v| *v != 0).unwrap_or(default))
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub client_id: String,
    pub keepalive_secs: u64,
}

impl BusConfig {
    pub fn resolve(settings: &Settings<'_>, client_prefix: &str) -> Result<Self> {
        let host = settings.string("WASTE_MQTT_HOST", |s| s.mqtt_host.as_ref(), "127.0.0.1");
        let port = settings.u16("WASTE_MQTT_PORT", |s| s.mqtt_port, 1883)?;
        let username = settings.optional_string("WASTE_MQTT_USERNAME", |s| s.mqtt_username.as_ref());
        let password = settings.optional_string("WASTE_MQTT_PASSWORD", |s| s.mqtt_password.as_ref());
        let topic = settings.string("WASTE_MQTT_TOPIC", |s| s.mqtt_topic.as_ref(), DEFAULT_TOPIC);
        let client_id = settings.string(
            "WASTE_MQTT_CLIENT_ID",
            |_| None,
            &format!("{client_prefix}-{}", std::process::id()),
        );
        let keepalive_secs =
            settings.u64("WASTE_MQTT_KEEPALIVE_SECS", |s| s.mqtt_keepalive_secs, 60)?;

        anyhow::ensure!(
            !topic.contains(['+', '#']),
            "WASTE_MQTT_TOPIC must be a concrete topic, got {topic:?}"
        );

        Ok(Self {
            host,
            port,
            username,
            password,
            topic,
            client_id,
            keepalive_secs,
        })
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut mqttoptions = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        mqttoptions.set_keep_alive(self.keepalive());
        if let Some(username) = &self.username {
            mqttoptions.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        mqttoptions
    }
}

pub fn resolve_pacing(settings: &Settings<'_>) -> Result<Pacing> {
    let defaults = Pacing::default();
    let device_delay_ms = settings.u64(
        "WASTE_SIM_DEVICE_DELAY_MS",
        |s| s.sim_device_delay_ms,
        defaults.device_delay.as_millis() as u64,
    )?;
    let cycle_delay_ms = settings.u64(
        "WASTE_SIM_CYCLE_DELAY_MS",
        |s| s.sim_cycle_delay_ms,
        defaults.cycle_delay.as_millis() as u64,
    )?;
    Ok(Pacing {
        device_delay: Duration::from_millis(device_delay_ms),
        cycle_delay: Duration::from_millis(cycle_delay_ms),
    })
}

pub fn resolve_registry(settings: &Settings<'_>) -> Result<DeviceRegistry> {
    match settings.setup().and_then(|s| s.devices.clone()) {
        Some(devices) => {
            DeviceRegistry::new(devices).context("invalid device registry in setup config")
        }
        None => Ok(DeviceRegistry::reference()),
    }
}

/// Env only, so tracing can be up before the setup file is read.
pub fn otlp_endpoint() -> Option<String> {
    env_optional("OTEL_EXPORTER_OTLP_ENDPOINT")
}
