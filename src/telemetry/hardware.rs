//! Hardware-backed telemetry source.
//!
//! Cell voltages come from three ADC taps behind resistor dividers; pack
//! temperature and humidity come from a combined digital sensor. The way the
//! bytes reach us is hidden behind [`AnalogInput`] and [`ClimateSensor`].

use anyhow::{bail, Result};
use chrono::Utc;
use thiserror::Error;

use crate::models::{state_of_charge_from_pack, Reading, CELL_COUNT};
use crate::models::reading::{MAX_TEMPERATURE_C, MIN_TEMPERATURE_C};

use super::{SourceError, TelemetrySource};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    /// Checksum mismatch, timeout, garbled value. Worth retrying next tick.
    #[error("transient sensor error: {0}")]
    Transient(String),

    /// Device missing or failed to initialize.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// One ADC channel returning raw conversion codes.
pub trait AnalogInput: Send {
    fn read_raw(&mut self) -> Result<u32, SensorError>;

    fn label(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    pub temperature: f64,
    pub humidity: Option<f64>,
}

/// Combined temperature/humidity sensor.
pub trait ClimateSensor: Send {
    fn read(&mut self) -> Result<ClimateSample, SensorError>;

    fn label(&self) -> String;
}

/// Linear conversion from a raw ADC code to cell volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcCalibration {
    pub full_scale: u32,
    pub reference_volts: f64,
    pub divider_gain: f64,
}

impl AdcCalibration {
    pub fn to_volts(&self, raw: u32) -> f64 {
        f64::from(raw) / f64::from(self.full_scale) * self.reference_volts * self.divider_gain
    }
}

struct CellTap {
    input: Box<dyn AnalogInput>,
    calibration: AdcCalibration,
    last_volts: Option<f64>,
}

pub struct HardwareSource {
    taps: Vec<CellTap>,
    climate: Box<dyn ClimateSensor>,
    last_climate: Option<ClimateSample>,
    dead: Option<String>,
}

impl HardwareSource {
    pub fn new(
        inputs: Vec<(Box<dyn AnalogInput>, AdcCalibration)>,
        climate: Box<dyn ClimateSensor>,
    ) -> Result<Self> {
        if inputs.len() != CELL_COUNT {
            bail!("expected {CELL_COUNT} ADC inputs, got {}", inputs.len());
        }
        if let Some((_, cal)) = inputs.iter().find(|(_, cal)| cal.full_scale == 0) {
            bail!("ADC full scale must be non-zero (gain {})", cal.divider_gain);
        }

        let taps = inputs
            .into_iter()
            .map(|(input, calibration)| CellTap {
                input,
                calibration,
                last_volts: None,
            })
            .collect();

        Ok(Self {
            taps,
            climate,
            last_climate: None,
            dead: None,
        })
    }

    pub fn is_dead(&self) -> bool {
        self.dead.is_some()
    }

    fn disable(&mut self, reason: String) -> SourceError {
        log_error!("hardware source disabled for this session: {reason}");
        self.dead = Some(reason.clone());
        SourceError::Fatal(reason)
    }

    fn read_cells(&mut self) -> Result<(), SourceError> {
        for index in 0..self.taps.len() {
            let tap = &mut self.taps[index];
            match tap.input.read_raw() {
                Ok(raw) if raw <= tap.calibration.full_scale => {
                    tap.last_volts = Some(tap.calibration.to_volts(raw));
                }
                Ok(raw) => {
                    log_warn!(
                        "{}: raw code {raw} above full scale {}; keeping previous value",
                        tap.input.label(),
                        tap.calibration.full_scale
                    );
                }
                Err(SensorError::Transient(msg)) => {
                    log_warn!("{}: {msg}; keeping previous value", tap.input.label());
                }
                Err(SensorError::Unavailable(msg)) => {
                    let reason = format!("{}: {msg}", tap.input.label());
                    return Err(self.disable(reason));
                }
            }
        }
        Ok(())
    }

    fn read_climate(&mut self) -> Result<(), SourceError> {
        match self.climate.read() {
            Ok(sample) if in_domain(&sample) => {
                self.last_climate = Some(sample);
            }
            Ok(sample) => {
                log_warn!(
                    "{}: implausible sample {:?}; keeping previous value",
                    self.climate.label(),
                    sample
                );
            }
            Err(SensorError::Transient(msg)) => {
                log_warn!("{}: {msg}; keeping previous value", self.climate.label());
            }
            Err(SensorError::Unavailable(msg)) => {
                let reason = format!("{}: {msg}", self.climate.label());
                return Err(self.disable(reason));
            }
        }
        Ok(())
    }
}

fn in_domain(sample: &ClimateSample) -> bool {
    let temperature_ok = (MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&sample.temperature);
    let humidity_ok = sample
        .humidity
        .map_or(true, |h| (0.0..=100.0).contains(&h));
    temperature_ok && humidity_ok
}

impl TelemetrySource for HardwareSource {
    fn sample(&mut self) -> Result<Reading, SourceError> {
        if let Some(reason) = &self.dead {
            return Err(SourceError::Fatal(reason.clone()));
        }

        self.read_cells()?;
        self.read_climate()?;

        let mut cells = [0.0; CELL_COUNT];
        for (slot, tap) in cells.iter_mut().zip(&self.taps) {
            *slot = tap.last_volts.ok_or_else(|| {
                SourceError::Transient(format!("{} has no value yet", tap.input.label()))
            })?;
        }
        let climate = self.last_climate.ok_or_else(|| {
            SourceError::Transient(format!("{} has no value yet", self.climate.label()))
        })?;

        let soc = state_of_charge_from_pack(cells.iter().sum());
        Reading::new(
            Utc::now(),
            cells,
            climate.temperature,
            climate.humidity,
            soc,
            None,
        )
        .map_err(|err| SourceError::Transient(err.to_string()))
    }

    fn describe(&self) -> String {
        let taps: Vec<String> = self.taps.iter().map(|t| t.input.label()).collect();
        format!("hardware ({}; {})", taps.join(", "), self.climate.label())
    }
}
