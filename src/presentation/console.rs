use anyhow::Result;
use log::{error, info, warn};

use crate::alerts::AlertEvent;
use crate::models::Reading;

use super::{ChartSnapshot, Presenter};

/// Headless presenter that writes every update to the log.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    alerts_raised: u64,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised
    }
}

impl Presenter for ConsolePresenter {
    fn show_reading(&mut self, reading: &Reading) -> Result<()> {
        let [c1, c2, c3] = reading.cell_voltages();
        let humidity = reading
            .humidity()
            .map(|h| format!(" RH {h:.1}%"))
            .unwrap_or_default();
        info!(
            "cells {c1:.3}/{c2:.3}/{c3:.3} V  pack {:.2} V  {:.1} °C{humidity}  SoC {:.1}%",
            reading.pack_voltage(),
            reading.temperature(),
            reading.state_of_charge()
        );
        Ok(())
    }

    fn render_chart(&mut self, chart: &ChartSnapshot) -> Result<()> {
        let (Some(first), Some(last)) = (chart.times.first(), chart.times.last()) else {
            info!("chart: no samples in window");
            return Ok(());
        };
        let peak_temp = chart
            .temperature
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        info!(
            "chart: {} samples over {}s, peak {:.1} °C (limit {:.1} °C, cell limit {:.2} V)",
            chart.len(),
            (*last - *first).num_seconds(),
            peak_temp,
            chart.thresholds.temperature,
            chart.thresholds.cell_voltage
        );
        Ok(())
    }

    fn raise_alert(&mut self, alert: &AlertEvent) -> Result<()> {
        self.alerts_raised += 1;
        warn!("ALERT: {}", alert.message());
        Ok(())
    }

    fn notify_source_unavailable(&mut self, message: &str) -> Result<()> {
        error!("telemetry source unavailable, acquisition stopped: {message}");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.alerts_raised = 0;
        info!("stored data cleared");
        Ok(())
    }
}
