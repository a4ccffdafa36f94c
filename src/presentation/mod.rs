//! Presentation side of the update channel.
//!
//! [`PresentationConsumer`] drains queued [`UiCommand`]s on the presentation
//! context and applies them to a [`Presenter`]. Only the presentation context
//! touches the presenter.

mod console;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::acquisition::AcquisitionController;
use crate::alerts::{AlertEvent, AlertThresholds};
use crate::db::{Database, QueryWindow, StoredSample};
use crate::models::{Reading, CELL_COUNT};
use crate::updates::{UiCommand, UpdateReceiver};

pub use console::ConsolePresenter;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Rendering surface. Every method may fail; failures are isolated per
/// command by the consumer.
pub trait Presenter {
    fn show_reading(&mut self, reading: &Reading) -> Result<()>;

    fn render_chart(&mut self, chart: &ChartSnapshot) -> Result<()>;

    fn raise_alert(&mut self, alert: &AlertEvent) -> Result<()>;

    fn notify_source_unavailable(&mut self, message: &str) -> Result<()>;

    /// Forget everything shown so far.
    fn clear(&mut self) -> Result<()>;
}

/// Series for the live chart: one point per stored sample, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSnapshot {
    pub times: Vec<DateTime<Utc>>,
    pub cell_voltages: [Vec<f64>; CELL_COUNT],
    pub temperature: Vec<f64>,
    pub state_of_charge: Vec<f64>,
    pub thresholds: AlertThresholds,
}

impl ChartSnapshot {
    pub fn from_samples(samples: &[StoredSample], thresholds: AlertThresholds) -> Self {
        let mut cell_voltages: [Vec<f64>; CELL_COUNT] = Default::default();
        for series in cell_voltages.iter_mut() {
            series.reserve(samples.len());
        }

        let mut times = Vec::with_capacity(samples.len());
        let mut temperature = Vec::with_capacity(samples.len());
        let mut state_of_charge = Vec::with_capacity(samples.len());

        for sample in samples {
            times.push(sample.timestamp);
            for (series, value) in cell_voltages.iter_mut().zip(sample.cell_voltages) {
                series.push(value);
            }
            temperature.push(sample.temperature);
            state_of_charge.push(sample.state_of_charge);
        }

        Self {
            times,
            cell_voltages,
            temperature,
            state_of_charge,
            thresholds,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

pub struct PresentationConsumer<P: Presenter> {
    presenter: P,
    updates: UpdateReceiver,
    db: Database,
    chart_window: QueryWindow,
    thresholds: AlertThresholds,
}

impl<P: Presenter> PresentationConsumer<P> {
    pub fn new(
        presenter: P,
        updates: UpdateReceiver,
        db: Database,
        chart_window: QueryWindow,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            presenter,
            updates,
            db,
            chart_window,
            thresholds,
        }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Applies every queued command, in order, until the queue is empty.
    pub async fn drain_and_apply(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some(command) = self.updates.try_next() {
            match self.apply(command).await {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    report.failed += 1;
                    log_error!("failed to apply UI update: {err:?}");
                }
            }
        }
        report
    }

    /// Drains every [`DRAIN_INTERVAL`] until `shutdown` fires, then drains
    /// once more so nothing enqueued before shutdown is lost.
    pub async fn run_until(&mut self, shutdown: CancellationToken) -> DrainReport {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut total = DrainReport::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.drain_and_apply().await;
                    if report.applied + report.failed > 0 {
                        log_debug!("applied {} UI updates ({} failed)", report.applied, report.failed);
                    }
                    total.merge(report);
                }
            }
        }

        total.merge(self.drain_and_apply().await);
        total
    }

    /// Deletes all stored samples and resets the presenter. Refused while
    /// acquisition is running.
    pub async fn clear_history(&mut self, controller: &AcquisitionController) -> Result<usize> {
        if controller.is_running() {
            bail!("stop acquisition before clearing stored data");
        }
        let removed = self.db.clear_readings().await?;
        self.presenter.clear()?;
        Ok(removed)
    }

    async fn apply(&mut self, command: UiCommand) -> Result<()> {
        match command {
            UiCommand::UpdateDisplay(reading) => self.presenter.show_reading(&reading),
            UiCommand::RefreshChart => {
                let samples = self
                    .db
                    .query_window(self.chart_window)
                    .await
                    .context("failed to load chart window")?;
                let chart = ChartSnapshot::from_samples(&samples, self.thresholds);
                self.presenter.render_chart(&chart)
            }
            UiCommand::RaiseAlert(event) => self.presenter.raise_alert(&event),
            UiCommand::SourceUnavailable(message) => {
                self.presenter.notify_source_unavailable(&message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use crate::configuration::MonitorConfig;
    use crate::telemetry::{SimulatedSource, SimulatorProfile};
    use crate::updates::{update_channel, UpdateSender};
    use anyhow::anyhow;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        charts: Vec<ChartSnapshot>,
        fail_readings: bool,
    }

    impl Presenter for Recorder {
        fn show_reading(&mut self, reading: &Reading) -> Result<()> {
            if self.fail_readings {
                return Err(anyhow!("display is broken"));
            }
            self.events.push(format!("reading {}", reading.temperature()));
            Ok(())
        }

        fn render_chart(&mut self, chart: &ChartSnapshot) -> Result<()> {
            self.events.push(format!("chart {}", chart.len()));
            self.charts.push(chart.clone());
            Ok(())
        }

        fn raise_alert(&mut self, alert: &AlertEvent) -> Result<()> {
            self.events.push(format!("alert {:?}", alert.kind));
            Ok(())
        }

        fn notify_source_unavailable(&mut self, message: &str) -> Result<()> {
            self.events.push(format!("lost {message}"));
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.events.push("clear".into());
            Ok(())
        }
    }

    fn reading(temperature: f64) -> Reading {
        Reading::new(Utc::now(), [3.7, 3.8, 3.9], temperature, None, 55.0, None).unwrap()
    }

    fn consumer(recorder: Recorder) -> (UpdateSender, PresentationConsumer<Recorder>, Database) {
        let db = Database::open_in_memory().unwrap();
        let (tx, rx) = update_channel();
        let consumer = PresentationConsumer::new(
            recorder,
            rx,
            db.clone(),
            QueryWindow::from_secs(60),
            MonitorConfig::default().thresholds,
        );
        (tx, consumer, db)
    }

    #[tokio::test]
    async fn test_drain_applies_in_order() {
        let (tx, mut consumer, db) = consumer(Recorder::default());
        let r = reading(30.0);
        db.insert_reading(&r).await.unwrap();

        tx.enqueue(UiCommand::UpdateDisplay(r));
        tx.enqueue(UiCommand::RefreshChart);
        tx.enqueue(UiCommand::RaiseAlert(AlertEvent {
            kind: AlertKind::Temperature,
            measured: 41.0,
            threshold: 40.0,
            cell_index: None,
        }));
        tx.enqueue(UiCommand::SourceUnavailable("dht22".into()));

        let report = consumer.drain_and_apply().await;
        assert_eq!(report, DrainReport { applied: 4, failed: 0 });
        assert_eq!(
            consumer.presenter().events,
            vec!["reading 30", "chart 1", "alert Temperature", "lost dht22"]
        );

        let chart = &consumer.presenter().charts[0];
        assert_eq!(chart.cell_voltages[2], vec![3.9]);
        assert_eq!(chart.thresholds.temperature, 40.0);
        assert_eq!(consumer.drain_and_apply().await, DrainReport::default());
    }

    #[tokio::test]
    async fn test_failed_command_does_not_stop_drain() {
        let recorder = Recorder {
            fail_readings: true,
            ..Recorder::default()
        };
        let (tx, mut consumer, _db) = consumer(recorder);
        tx.enqueue(UiCommand::UpdateDisplay(reading(20.0)));
        tx.enqueue(UiCommand::RefreshChart);
        tx.enqueue(UiCommand::UpdateDisplay(reading(21.0)));

        let report = consumer.drain_and_apply().await;
        assert_eq!(report, DrainReport { applied: 1, failed: 2 });
        assert_eq!(consumer.presenter().events, vec!["chart 0"]);
    }

    #[tokio::test]
    async fn test_run_until_drains_after_shutdown() {
        let (tx, mut consumer, _db) = consumer(Recorder::default());
        let shutdown = CancellationToken::new();
        tx.enqueue(UiCommand::UpdateDisplay(reading(25.0)));
        shutdown.cancel();

        let report = consumer.run_until(shutdown).await;
        assert_eq!(report.applied, 1);
    }

    #[tokio::test]
    async fn test_clear_history_refused_while_running() {
        let (tx, mut consumer, db) = consumer(Recorder::default());
        db.insert_reading(&reading(25.0)).await.unwrap();

        let source = Box::new(SimulatedSource::with_seed(SimulatorProfile::default(), 1));
        let mut controller =
            AcquisitionController::new(source, db.clone(), tx, &MonitorConfig::default());

        controller.start().await.unwrap();
        assert!(consumer.clear_history(&controller).await.is_err());
        assert_eq!(db.count_readings().await.unwrap(), 1);

        controller.stop().await;
        assert_eq!(consumer.clear_history(&controller).await.unwrap(), 1);
        assert_eq!(db.count_readings().await.unwrap(), 0);
        assert_eq!(consumer.presenter().events, vec!["clear"]);
    }
}
