//! Session tuning: stage timeouts, retry policy and radio parameters.
//! Persisted as JSON so hosts can keep it next to their own settings.

use crate::ble::{BleAddress, ConnectionParams, ScanParams};
use crate::scales::DeviceFilter;
use crate::types::*;
use anyhow::{bail, Context, Result};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

// Bump when a field changes meaning
const CONFIG_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub version: u8,

    /// Only connect to this address. `None` takes the first supported scale.
    pub target_address: Option<String>,

    pub idle_delay_ms: u64,
    pub scan_timeout_ms: u64,
    pub scan_clear_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub configure_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub keepalive_interval_ms: u64, // Acaia_Old only
    pub heartbeat_period_ms: u64,

    pub deep_reset_every: u32,
    pub attempt_ceiling: u32,

    pub scan: ScanParams,
    pub connection: ConnectionParams,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            target_address: None,
            idle_delay_ms: IDLE_DELAY_MS,
            scan_timeout_ms: SCAN_TIMEOUT_MS,
            scan_clear_interval_ms: SCAN_CLEAR_INTERVAL_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            discovery_timeout_ms: DISCOVERY_TIMEOUT_MS,
            configure_timeout_ms: CONFIGURE_TIMEOUT_MS,
            data_timeout_ms: DATA_TIMEOUT_MS,
            keepalive_interval_ms: KEEPALIVE_INTERVAL_MS,
            heartbeat_period_ms: HEARTBEAT_PERIOD_MS,
            deep_reset_every: DEEP_RESET_EVERY,
            attempt_ceiling: ATTEMPT_CEILING,
            scan: ScanParams::default(),
            connection: ConnectionParams::default(),
        }
    }
}

impl ScaleConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScaleConfig =
            serde_json::from_str(json).context("Failed to parse scale config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize scale config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.version > CONFIG_VERSION {
            bail!(
                "Config version {} is newer than supported version {}",
                self.version,
                CONFIG_VERSION
            );
        }

        self.target()?;

        let timeouts = [
            ("idle_delay_ms", self.idle_delay_ms),
            ("scan_timeout_ms", self.scan_timeout_ms),
            ("scan_clear_interval_ms", self.scan_clear_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("discovery_timeout_ms", self.discovery_timeout_ms),
            ("configure_timeout_ms", self.configure_timeout_ms),
            ("data_timeout_ms", self.data_timeout_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("heartbeat_period_ms", self.heartbeat_period_ms),
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        if self.deep_reset_every == 0 {
            bail!("deep_reset_every must be at least 1");
        }
        if self.attempt_ceiling == 0 {
            bail!("attempt_ceiling must be at least 1");
        }

        Ok(())
    }

    /// Parsed target address. Empty strings count as "any scale".
    pub fn target(&self) -> Result<Option<BleAddress>> {
        match self.target_address.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(address) => address
                .parse()
                .map(Some)
                .with_context(|| format!("Invalid target_address '{}'", address)),
        }
    }

    pub fn device_filter(&self) -> Result<DeviceFilter> {
        Ok(DeviceFilter {
            target: self.target()?,
        })
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn scan_clear_interval(&self) -> Duration {
        Duration::from_millis(self.scan_clear_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }
}
