//! Monitoring parameters stored in the `Configuration` relation.
//!
//! Values are text in the database. Loading never fails on a bad value: the
//! documented default is used and a warning is logged. Explicit updates are
//! validated and rejected instead.

use std::time::Duration;

use anyhow::Result;
use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::alerts::AlertThresholds;
use crate::db::{ConfigEntry, Database};

pub const CELL_VOLTAGE_THRESHOLD: &str = "cell_voltage_threshold";
pub const TEMPERATURE_THRESHOLD: &str = "temperature_threshold";
pub const SAMPLING_INTERVAL_MS: &str = "sampling_interval_ms";
pub const COM_PORT: &str = "com_port";
pub const BAUD_RATE: &str = "baud_rate";

const DEFAULT_CELL_VOLTAGE_THRESHOLD: f64 = 4.2;
const DEFAULT_TEMPERATURE_THRESHOLD: f64 = 40.0;
const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1000;
const DEFAULT_COM_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 9600;

const MIN_SAMPLING_INTERVAL_MS: u64 = 100;
const MAX_SAMPLING_INTERVAL_MS: u64 = 60_000;
const MAX_CELL_VOLTAGE_THRESHOLD: f64 = 10.0;

/// Rows written on first database initialization.
pub const DEFAULT_ENTRIES: [(&str, &str); 5] = [
    (BAUD_RATE, "9600"),
    (CELL_VOLTAGE_THRESHOLD, "4.2"),
    (COM_PORT, DEFAULT_COM_PORT),
    (SAMPLING_INTERVAL_MS, "1000"),
    (TEMPERATURE_THRESHOLD, "40.0"),
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown configuration parameter '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorConfig {
    pub thresholds: AlertThresholds,
    pub sampling_interval: Duration,
    /// Only meaningful to serial-attached hardware.
    pub com_port: String,
    pub baud_rate: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds {
                cell_voltage: DEFAULT_CELL_VOLTAGE_THRESHOLD,
                temperature: DEFAULT_TEMPERATURE_THRESHOLD,
            },
            sampling_interval: Duration::from_millis(DEFAULT_SAMPLING_INTERVAL_MS),
            com_port: DEFAULT_COM_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl MonitorConfig {
    pub async fn load(db: &Database) -> Result<Self> {
        let entries = db.get_configuration().await?;
        Ok(Self::from_entries(&entries))
    }

    /// Builds a config from stored rows. Unknown keys are ignored; invalid
    /// values fall back to the default with a warning.
    pub fn from_entries(entries: &[ConfigEntry]) -> Self {
        let mut config = Self::default();
        for entry in entries {
            if let Err(err) = config.apply(&entry.parameter_name, &entry.value) {
                match err {
                    ConfigError::UnknownKey(_) => {}
                    ConfigError::InvalidValue { .. } => {
                        warn!("{err}; using default");
                    }
                }
            }
        }
        config
    }

    /// Validates and persists a single parameter, returning the refreshed
    /// configuration.
    pub async fn update(db: &Database, key: &str, value: &str) -> Result<Self> {
        let mut probe = Self::default();
        probe.apply(key, value)?;

        db.set_configuration_value(key, value.trim()).await?;
        Self::load(db).await
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let raw = value.trim();
        match key {
            CELL_VOLTAGE_THRESHOLD => {
                let volts = parse_f64(key, raw)?;
                if volts <= 0.0 || volts > MAX_CELL_VOLTAGE_THRESHOLD {
                    return Err(invalid(key, raw, "must be in (0, 10] volts"));
                }
                self.thresholds.cell_voltage = volts;
            }
            TEMPERATURE_THRESHOLD => {
                let celsius = parse_f64(key, raw)?;
                if !(-50.0..=150.0).contains(&celsius) {
                    return Err(invalid(key, raw, "must be in [-50, 150] °C"));
                }
                self.thresholds.temperature = celsius;
            }
            SAMPLING_INTERVAL_MS => {
                let millis: u64 = raw
                    .parse()
                    .map_err(|_| invalid(key, raw, "not a whole number of milliseconds"))?;
                if !(MIN_SAMPLING_INTERVAL_MS..=MAX_SAMPLING_INTERVAL_MS).contains(&millis) {
                    return Err(invalid(key, raw, "must be between 100 and 60000 ms"));
                }
                self.sampling_interval = Duration::from_millis(millis);
            }
            COM_PORT => {
                if raw.is_empty() {
                    return Err(invalid(key, raw, "must not be empty"));
                }
                self.com_port = raw.to_string();
            }
            BAUD_RATE => {
                let baud: u32 = raw
                    .parse()
                    .map_err(|_| invalid(key, raw, "not a whole number"))?;
                if baud == 0 {
                    return Err(invalid(key, raw, "must be greater than zero"));
                }
                self.baud_rate = baud;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn parse_f64(key: &str, raw: &str) -> Result<f64, ConfigError> {
    let value: f64 = raw.parse().map_err(|_| invalid(key, raw, "not a number"))?;
    if !value.is_finite() {
        return Err(invalid(key, raw, "not a finite number"));
    }
    Ok(value)
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
