//! Threshold alert evaluation.
//!
//! Stateless: every reading above a threshold yields a fresh event. There is
//! no hysteresis, so a cell sitting above its limit alerts on every tick.

use serde::Serialize;

use crate::models::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertThresholds {
    pub cell_voltage: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    Temperature,
    CellVoltage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub measured: f64,
    pub threshold: f64,
    pub cell_index: Option<usize>,
}

impl AlertEvent {
    pub fn message(&self) -> String {
        match (self.kind, self.cell_index) {
            (AlertKind::Temperature, _) => format!(
                "High temperature: {:.2} °C exceeds threshold of {:.2} °C",
                self.measured, self.threshold
            ),
            (AlertKind::CellVoltage, Some(index)) => format!(
                "Cell {} voltage {:.2} V exceeds threshold of {:.2} V",
                index + 1,
                self.measured,
                self.threshold
            ),
            (AlertKind::CellVoltage, None) => format!(
                "Cell voltage {:.2} V exceeds threshold of {:.2} V",
                self.measured, self.threshold
            ),
        }
    }
}

/// Temperature is checked first, then each cell in index order.
pub fn evaluate(reading: &Reading, thresholds: &AlertThresholds) -> Vec<AlertEvent> {
    let mut events = Vec::new();

    if reading.temperature() > thresholds.temperature {
        events.push(AlertEvent {
            kind: AlertKind::Temperature,
            measured: reading.temperature(),
            threshold: thresholds.temperature,
            cell_index: None,
        });
    }

    for (index, voltage) in reading.cell_voltages().into_iter().enumerate() {
        if voltage > thresholds.cell_voltage {
            events.push(AlertEvent {
                kind: AlertKind::CellVoltage,
                measured: voltage,
                threshold: thresholds.cell_voltage,
                cell_index: Some(index),
            });
        }
    }

    events
}
