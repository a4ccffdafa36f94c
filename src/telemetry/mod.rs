//! # Telemetry sources
//!
//! A [`TelemetrySource`] produces one [`Reading`] per sampling tick. Two
//! variants exist, picked once at startup by [`build_source`]:
//!
//! - [`HardwareSource`]: three ADC cell taps plus a temperature/humidity
//!   sensor, reached through the [`AnalogInput`] / [`ClimateSensor`]
//!   capabilities (Linux IIO implementations live in [`iio`]).
//! - [`SimulatedSource`]: smooth periodic drift, bounded jitter and rare
//!   spikes that trip the alert thresholds.

pub mod hardware;
pub mod iio;
pub mod simulated;

use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::models::Reading;
use crate::settings::{SourceKind, UserSettings};

pub use hardware::{
    AdcCalibration, AnalogInput, ClimateSample, ClimateSensor, HardwareSource, SensorError,
};
pub use simulated::{SimulatedSource, SimulatorProfile};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// Skip this tick and try again on the next one.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The source is gone for the rest of the session.
    #[error("telemetry source unavailable: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Fatal(_))
    }
}

/// Produces one reading per call. May block briefly on sensor I/O.
pub trait TelemetrySource: Send {
    fn sample(&mut self) -> Result<Reading, SourceError>;

    fn describe(&self) -> String;
}

/// Builds the configured source. Hardware construction failures (device
/// nodes missing) are returned so startup can abort.
pub fn build_source(
    settings: &UserSettings,
    sampling_interval: Duration,
) -> Result<Box<dyn TelemetrySource>> {
    match settings.source {
        SourceKind::Simulated => {
            let profile = SimulatorProfile {
                tick: sampling_interval,
                ..SimulatorProfile::default()
            };
            let source = match settings.simulator_seed {
                Some(seed) => SimulatedSource::with_seed(profile, seed),
                None => SimulatedSource::new(profile),
            };
            Ok(Box::new(source))
        }
        SourceKind::Hardware => {
            let hw = &settings.hardware;
            let mut inputs: Vec<(Box<dyn AnalogInput>, AdcCalibration)> = Vec::new();
            for (channel, gain) in hw.adc_channels.iter().zip(hw.divider_gains.iter()) {
                let input: Box<dyn AnalogInput> = Box::new(
                    iio::IioAdcChannel::open(&hw.adc_device_dir, *channel)
                        .with_context(|| format!("failed to open ADC channel {channel}"))?,
                );
                let calibration = AdcCalibration {
                    full_scale: hw.adc_full_scale,
                    reference_volts: hw.reference_volts,
                    divider_gain: *gain,
                };
                inputs.push((input, calibration));
            }
            let climate = iio::IioClimateSensor::open(&hw.climate_device_dir)
                .context("failed to open temperature/humidity sensor")?;

            let source = HardwareSource::new(inputs, Box::new(climate))?;
            Ok(Box::new(source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_build_simulated_source() {
        let settings = UserSettings {
            simulator_seed: Some(1),
            ..UserSettings::default()
        };
        let mut source = build_source(&settings, Duration::from_secs(1)).unwrap();
        assert!(source.describe().contains("simulated"));
        assert!(source.sample().is_ok());
    }

    #[test]
    fn test_build_hardware_source_requires_devices() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = UserSettings {
            source: SourceKind::Hardware,
            ..UserSettings::default()
        };
        settings.hardware.adc_device_dir = dir.path().join("missing-adc");
        settings.hardware.climate_device_dir = dir.path().join("missing-dht");

        assert!(build_source(&settings, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_build_hardware_source_from_iio_tree() {
        let dir = tempfile::tempdir().unwrap();
        let adc = dir.path().join("adc");
        let dht = dir.path().join("dht");
        fs::create_dir_all(&adc).unwrap();
        fs::create_dir_all(&dht).unwrap();
        for channel in 0..3 {
            fs::write(adc.join(format!("in_voltage{channel}_raw")), "600\n").unwrap();
        }
        fs::write(dht.join("in_temp_input"), "24500\n").unwrap();
        fs::write(dht.join("in_humidityrelative_input"), "41200\n").unwrap();

        let mut settings = UserSettings {
            source: SourceKind::Hardware,
            ..UserSettings::default()
        };
        settings.hardware.adc_device_dir = adc;
        settings.hardware.climate_device_dir = dht;

        let mut source = build_source(&settings, Duration::from_secs(1)).unwrap();
        let reading = source.sample().unwrap();
        assert_eq!(reading.temperature(), 24.5);
        assert_eq!(reading.humidity(), Some(41.2));
        let expected_cell1 = 600.0 / 1023.0 * 3.3 * 4.3;
        assert!((reading.cell_voltages()[0] - expected_cell1).abs() < 1e-9);
    }
}
