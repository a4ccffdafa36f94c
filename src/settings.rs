use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

/// Which telemetry source the acquisition loop is built with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Simulated,
    Hardware,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HardwareSettings {
    /// IIO device exposing `in_voltageN_raw` for the cell taps.
    pub adc_device_dir: PathBuf,
    pub adc_channels: [u8; 3],
    /// Resistor-divider gain per cell tap.
    pub divider_gains: [f64; 3],
    pub reference_volts: f64,
    pub adc_full_scale: u32,
    /// IIO device exposing `in_temp_input` / `in_humidityrelative_input`.
    pub climate_device_dir: PathBuf,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            adc_device_dir: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            adc_channels: [0, 1, 2],
            divider_gains: [4.3, 3.127, 1.47],
            reference_volts: 3.3,
            adc_full_scale: 1023,
            climate_device_dir: PathBuf::from("/sys/bus/iio/devices/iio:device1"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub source: SourceKind,
    /// Fixed seed for a reproducible simulator run.
    pub simulator_seed: Option<u64>,
    /// Width of the live chart window.
    pub chart_window_secs: u64,
    /// Relative paths resolve against the data directory.
    pub export_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub hardware: HardwareSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Simulated,
            simulator_seed: None,
            chart_window_secs: 60,
            export_dir: PathBuf::from("exports"),
            log_file: Some(PathBuf::from("bms_error.log")),
            hardware: HardwareSettings::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    load_warning: Option<String>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut load_warning = None;
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                load_warning = Some(format!(
                    "Ignoring unreadable settings file {} ({err}); using defaults",
                    path.display()
                ));
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            load_warning,
        })
    }

    /// Set when the file existed but could not be parsed. Settings are read
    /// before the logger exists, so the caller logs this once it is up.
    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn current(&self) -> UserSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `mutate` and writes the result back to the settings file.
    pub fn update<F>(&self, mutate: F) -> Result<UserSettings>
    where
        F: FnOnce(&mut UserSettings),
    {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        mutate(&mut *guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Resolves `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
