use anyhow::Result;
use std::time::Duration;
use waste_core::config::{self, BusConfig, SetupConfig, Settings};
use waste_core::{DeviceRegistry, Pacing};

use crate::supervisor::SupervisorTiming;

#[derive(Clone, Debug)]
pub struct Config {
    pub bus: BusConfig,
    pub unit_timeout_secs: u64,
    pub cycle_pause_secs: u64,
    pub connect_timeout_secs: u64,
    pub pacing: Pacing,
    pub registry: DeviceRegistry,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let setup = SetupConfig::load();
        Self::resolve(&Settings::new(&config::env_optional, setup.as_ref()))
    }

    pub fn resolve(settings: &Settings<'_>) -> Result<Self> {
        let bus = BusConfig::resolve(settings, "waste-gateway")?;
        let unit_timeout_secs = settings.u64(
            "WASTE_GATEWAY_UNIT_TIMEOUT_SECS",
            |s| s.gateway_unit_timeout_secs,
            35,
        )?;
        let cycle_pause_secs = settings.u64(
            "WASTE_GATEWAY_CYCLE_PAUSE_SECS",
            |s| s.gateway_cycle_pause_secs,
            5,
        )?;
        let connect_timeout_secs = settings.u64(
            "WASTE_GATEWAY_CONNECT_TIMEOUT_SECS",
            |s| s.gateway_connect_timeout_secs,
            10,
        )?;
        anyhow::ensure!(
            unit_timeout_secs > 0,
            "WASTE_GATEWAY_UNIT_TIMEOUT_SECS must be positive"
        );

        Ok(Self {
            bus,
            unit_timeout_secs,
            cycle_pause_secs,
            connect_timeout_secs,
            pacing: config::resolve_pacing(settings)?,
            registry: config::resolve_registry(settings)?,
        })
    }

    pub fn timing(&self) -> SupervisorTiming {
        SupervisorTiming {
            unit_timeout: Duration::from_secs(self.unit_timeout_secs),
            cycle_pause: Duration::from_secs(self.cycle_pause_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_reference_cadence() {
        let vars: HashMap<String, String> = HashMap::new();
        let lookup = |key: &str| vars.get(key).cloned();
        let config = Config::resolve(&Settings::new(&lookup, None)).unwrap();
        let timing = config.timing();
        assert_eq!(timing.unit_timeout, Duration::from_secs(35));
        assert_eq!(timing.cycle_pause, Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.pacing, Pacing::default());
        assert_eq!(config.registry.len(), 3);
        assert!(config.bus.client_id.starts_with("waste-gateway-"));
    }

    #[test]
    fn env_overrides_timing() {
        let vars: HashMap<String, String> = [
            ("WASTE_GATEWAY_UNIT_TIMEOUT_SECS", "12"),
            ("WASTE_GATEWAY_CYCLE_PAUSE_SECS", "1"),
            ("WASTE_SIM_CYCLE_DELAY_MS", "500"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let lookup = |key: &str| vars.get(key).cloned();
        let config = Config::resolve(&Settings::new(&lookup, None)).unwrap();
        assert_eq!(config.timing().unit_timeout, Duration::from_secs(12));
        assert_eq!(config.timing().cycle_pause, Duration::from_secs(1));
        assert_eq!(config.pacing.cycle_delay, Duration::from_millis(500));
    }

    #[test]
    fn zero_unit_timeout_is_rejected() {
        let vars: HashMap<String, String> =
            [("WASTE_GATEWAY_UNIT_TIMEOUT_SECS".to_string(), "0".to_string())].into();
        let lookup = |key: &str| vars.get(key).cloned();
        assert!(Config::resolve(&Settings::new(&lookup, None)).is_err());
    }
}
