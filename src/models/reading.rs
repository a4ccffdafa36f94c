//! Reading value object.
//!
//! One sampling instant of the battery pack: three cell voltages, the pack
//! temperature, optional humidity/current and the derived state of charge.
//! Readings are validated on construction and immutable afterwards.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const CELL_COUNT: usize = 3;

pub const MIN_TEMPERATURE_C: f64 = -50.0;
pub const MAX_TEMPERATURE_C: f64 = 150.0;

/// Pack voltage that maps to 0% state of charge (3 cells at 3.0 V).
pub const MIN_PACK_VOLTAGE: f64 = 9.0;
/// Pack voltage that maps to 100% state of charge (3 cells at 4.2 V).
pub const MAX_PACK_VOLTAGE: f64 = 12.6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadingError {
    #[error("cell {index} voltage {value} V is negative or not finite")]
    CellVoltage { index: usize, value: f64 },

    #[error("temperature {0} °C outside [-50, 150]")]
    Temperature(f64),

    #[error("humidity {0}% outside [0, 100]")]
    Humidity(f64),

    #[error("state of charge {0}% outside [0, 100]")]
    StateOfCharge(f64),

    #[error("current {0} A is not finite")]
    Current(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    cell_voltages: [f64; CELL_COUNT],
    temperature: f64,
    humidity: Option<f64>,
    state_of_charge: f64,
    current: Option<f64>,
}

impl Reading {
    pub fn new(
        timestamp: DateTime<Utc>,
        cell_voltages: [f64; CELL_COUNT],
        temperature: f64,
        humidity: Option<f64>,
        state_of_charge: f64,
        current: Option<f64>,
    ) -> Result<Self, ReadingError> {
        validate_core(&cell_voltages, temperature, state_of_charge)?;

        if let Some(value) = humidity {
            if !(0.0..=100.0).contains(&value) {
                return Err(ReadingError::Humidity(value));
            }
        }
        if let Some(value) = current {
            if !value.is_finite() {
                return Err(ReadingError::Current(value));
            }
        }

        Ok(Self {
            timestamp,
            cell_voltages,
            temperature,
            humidity,
            state_of_charge,
            current,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cell_voltages(&self) -> [f64; CELL_COUNT] {
        self.cell_voltages
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn state_of_charge(&self) -> f64 {
        self.state_of_charge
    }

    pub fn current(&self) -> Option<f64> {
        self.current
    }

    pub fn pack_voltage(&self) -> f64 {
        self.cell_voltages.iter().sum()
    }

    /// Same reading with a different timestamp; used to keep timestamps
    /// strictly increasing within a session.
    pub fn with_timestamp(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// Checks the fields that are mandatory for persistence.
pub fn validate_core(
    cell_voltages: &[f64; CELL_COUNT],
    temperature: f64,
    state_of_charge: f64,
) -> Result<(), ReadingError> {
    for (index, &value) in cell_voltages.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(ReadingError::CellVoltage { index, value });
        }
    }
    // NaN fails `contains`, so these also reject non-finite values.
    if !(MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&temperature) {
        return Err(ReadingError::Temperature(temperature));
    }
    if !(0.0..=100.0).contains(&state_of_charge) {
        return Err(ReadingError::StateOfCharge(state_of_charge));
    }
    Ok(())
}

/// Linear map from total pack voltage to state of charge, clamped to [0, 100].
pub fn state_of_charge_from_pack(pack_voltage: f64) -> f64 {
    let span = MAX_PACK_VOLTAGE - MIN_PACK_VOLTAGE;
    let soc = (pack_voltage - MIN_PACK_VOLTAGE) / span * 100.0;
    if soc.is_nan() {
        return 0.0;
    }
    soc.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(cells: [f64; 3], temperature: f64, soc: f64) -> Result<Reading, ReadingError> {
        Reading::new(Utc::now(), cells, temperature, None, soc, None)
    }

    #[test]
    fn test_valid_reading() {
        let r = reading([3.6, 3.6, 3.6], 25.0, 80.0).unwrap();
        assert_eq!(r.cell_voltages(), [3.6, 3.6, 3.6]);
        assert_eq!(r.temperature(), 25.0);
        assert_eq!(r.state_of_charge(), 80.0);
        assert!(r.humidity().is_none());
        assert!((r.pack_voltage() - 10.8).abs() < 1e-9);
    }

    #[test]
    fn test_negative_cell_rejected() {
        let err = reading([3.6, -0.1, 3.6], 25.0, 80.0).unwrap_err();
        assert_eq!(err, ReadingError::CellVoltage { index: 1, value: -0.1 });
    }

    #[test]
    fn test_nan_cell_rejected() {
        assert!(reading([f64::NAN, 3.6, 3.6], 25.0, 80.0).is_err());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(reading([3.6; 3], -50.0, 50.0).is_ok());
        assert!(reading([3.6; 3], 150.0, 50.0).is_ok());
        assert!(reading([3.6; 3], 150.1, 50.0).is_err());
        assert!(reading([3.6; 3], -50.1, 50.0).is_err());
    }

    #[test]
    fn test_soc_bounds() {
        assert!(reading([3.6; 3], 25.0, 0.0).is_ok());
        assert!(reading([3.6; 3], 25.0, 100.0).is_ok());
        assert_eq!(
            reading([3.6; 3], 25.0, 100.5).unwrap_err(),
            ReadingError::StateOfCharge(100.5)
        );
    }

    #[test]
    fn test_humidity_bounds() {
        let now = Utc::now();
        assert!(Reading::new(now, [3.6; 3], 25.0, Some(45.0), 50.0, None).is_ok());
        assert!(Reading::new(now, [3.6; 3], 25.0, Some(101.0), 50.0, None).is_err());
    }

    #[test]
    fn test_soc_mapping() {
        assert_eq!(state_of_charge_from_pack(MIN_PACK_VOLTAGE), 0.0);
        assert_eq!(state_of_charge_from_pack(MAX_PACK_VOLTAGE), 100.0);
        assert!((state_of_charge_from_pack(10.8) - 50.0).abs() < 1e-9);
        assert_eq!(state_of_charge_from_pack(2.0), 0.0);
        assert_eq!(state_of_charge_from_pack(20.0), 100.0);
        assert_eq!(state_of_charge_from_pack(f64::NAN), 0.0);
    }

    #[test]
    fn test_with_timestamp_keeps_values() {
        let r = reading([3.7, 3.8, 3.9], 30.0, 60.0).unwrap();
        let later = r.timestamp() + chrono::Duration::seconds(1);
        let moved = r.with_timestamp(later);
        assert_eq!(moved.timestamp(), later);
        assert_eq!(moved.cell_voltages(), r.cell_voltages());
    }
}
