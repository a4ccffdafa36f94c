use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::configuration::MonitorConfig;
use crate::db::Database;
use crate::telemetry::TelemetrySource;
use crate::updates::UpdateSender;

use super::loop_worker::{acquisition_loop, AcquisitionStats, LoopContext};
use super::{RunFlag, SharedSource};

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped(AcquisitionStats),
    /// The loop did not exit in time; it is detached and will stop after its
    /// current tick.
    TimedOut,
    /// The loop task panicked.
    Crashed(String),
}

pub struct AcquisitionController {
    source: SharedSource,
    db: Database,
    updates: UpdateSender,
    config: MonitorConfig,
    flag: RunFlag,
    handle: Option<JoinHandle<AcquisitionStats>>,
    cancel_token: Option<CancellationToken>,
}

impl AcquisitionController {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        db: Database,
        updates: UpdateSender,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            db,
            updates,
            config: config.clone(),
            flag: RunFlag::new(),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_set()
    }

    pub async fn start(&mut self) -> Result<()> {
        self.reap_finished().await;
        if self.handle.is_some() {
            bail!("acquisition already running");
        }

        let cancel_token = CancellationToken::new();
        let ctx = LoopContext {
            source: Arc::clone(&self.source),
            db: self.db.clone(),
            updates: self.updates.clone(),
            thresholds: self.config.thresholds,
            interval: self.config.sampling_interval,
            flag: self.flag.clone(),
        };

        self.flag.set();
        let handle = tokio::spawn(acquisition_loop(ctx, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!(
            "acquisition started every {}ms",
            self.config.sampling_interval.as_millis()
        );
        Ok(())
    }

    /// Stops with the default bound of two sampling periods.
    pub async fn stop(&mut self) -> StopOutcome {
        let timeout = self.config.sampling_interval.saturating_mul(2);
        self.stop_with_timeout(timeout).await
    }

    pub async fn stop_with_timeout(&mut self, timeout: Duration) -> StopOutcome {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let outcome = match self.handle.take() {
            None => StopOutcome::NotRunning,
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(stats)) => StopOutcome::Stopped(stats),
                Ok(Err(join_err)) => {
                    warn!("acquisition loop task failed: {join_err}");
                    StopOutcome::Crashed(join_err.to_string())
                }
                Err(_) => {
                    warn!(
                        "acquisition loop did not stop within {}ms",
                        timeout.as_millis()
                    );
                    StopOutcome::TimedOut
                }
            },
        };

        self.flag.clear();
        outcome
    }

    /// Drops the handle of a loop that already exited on its own.
    async fn reap_finished(&mut self) {
        let finished = self.handle.as_ref().is_some_and(JoinHandle::is_finished);
        if !finished {
            return;
        }
        self.cancel_token = None;
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(stats) => info!("reaped finished acquisition loop: {stats:?}"),
                Err(err) => warn!("finished acquisition loop failed: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertThresholds;
    use crate::models::Reading;
    use crate::telemetry::{SimulatedSource, SimulatorProfile, SourceError};
    use crate::updates::{update_channel, UiCommand, UpdateReceiver};
    use chrono::Utc;

    fn config(interval_ms: u64) -> MonitorConfig {
        MonitorConfig {
            sampling_interval: Duration::from_millis(interval_ms),
            ..MonitorConfig::default()
        }
    }

    fn quiet_source() -> Box<dyn TelemetrySource> {
        let profile = SimulatorProfile {
            spike_probability: 0.0,
            ..SimulatorProfile::default()
        };
        Box::new(SimulatedSource::with_seed(profile, 5))
    }

    fn drain(rx: &mut UpdateReceiver) -> Vec<UiCommand> {
        std::iter::from_fn(|| rx.try_next()).collect()
    }

    /// Produces `good` hot readings, then reports the device gone.
    struct FailingSource {
        good: u32,
    }

    impl TelemetrySource for FailingSource {
        fn sample(&mut self) -> Result<Reading, SourceError> {
            if self.good == 0 {
                return Err(SourceError::Fatal("sensor unplugged".into()));
            }
            self.good -= 1;
            Reading::new(Utc::now(), [3.7, 3.7, 4.5], 45.0, None, 60.0, None)
                .map_err(|err| SourceError::Transient(err.to_string()))
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    #[tokio::test]
    async fn test_start_then_stop_inserts_nothing() {
        let db = Database::open_in_memory().unwrap();
        let (tx, mut rx) = update_channel();
        let mut controller = AcquisitionController::new(quiet_source(), db.clone(), tx, &config(1000));

        controller.start().await.unwrap();
        assert!(controller.is_running());

        let started = std::time::Instant::now();
        let outcome = controller.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome, StopOutcome::Stopped(AcquisitionStats::default()));
        assert!(!controller.is_running());
        assert_eq!(db.count_readings().await.unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let (tx, _rx) = update_channel();
        let mut controller = AcquisitionController::new(quiet_source(), db, tx, &config(1000));
        assert_eq!(controller.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (tx, _rx) = update_channel();
        let mut controller = AcquisitionController::new(quiet_source(), db, tx, &config(1000));
        controller.start().await.unwrap();
        assert!(controller.start().await.is_err());
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_ticks_persist_and_enqueue_in_order() {
        let db = Database::open_in_memory().unwrap();
        let (tx, mut rx) = update_channel();
        let mut controller = AcquisitionController::new(quiet_source(), db.clone(), tx, &config(100));

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(550)).await;
        let outcome = controller.stop().await;

        let StopOutcome::Stopped(stats) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(stats.persisted >= 2);
        assert_eq!(stats.failed_inserts, 0);
        assert_eq!(db.count_readings().await.unwrap(), stats.persisted);

        // Each tick: display update, then chart refresh.
        let commands = drain(&mut rx);
        assert_eq!(commands.len() as u64, stats.persisted * 2);
        for pair in commands.chunks(2) {
            assert!(matches!(pair[0], UiCommand::UpdateDisplay(_)));
            assert_eq!(pair[1], UiCommand::RefreshChart);
        }

        let stored = db.query_window(crate::db::QueryWindow::All).await.unwrap();
        assert!(stored.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let db = Database::open_in_memory().unwrap();
        let (tx, _rx) = update_channel();
        let mut controller = AcquisitionController::new(quiet_source(), db.clone(), tx, &config(100));

        for _ in 0..2 {
            controller.start().await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            assert!(matches!(controller.stop().await, StopOutcome::Stopped(_)));
        }
        assert!(db.count_readings().await.unwrap() >= 2);
    }

    /// Blocks inside `sample` for longer than a stop is willing to wait.
    struct SlowSource {
        delay: Duration,
    }

    impl TelemetrySource for SlowSource {
        fn sample(&mut self) -> Result<Reading, SourceError> {
            std::thread::sleep(self.delay);
            Reading::new(Utc::now(), [3.7, 3.7, 3.7], 25.0, None, 50.0, None)
                .map_err(|err| SourceError::Transient(err.to_string()))
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detached_loop_does_not_clear_new_run() {
        let db = Database::open_in_memory().unwrap();
        let (tx, _rx) = update_channel();
        let source = Box::new(SlowSource {
            delay: Duration::from_millis(400),
        });
        let mut controller = AcquisitionController::new(source, db, tx, &config(100));

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            controller.stop_with_timeout(Duration::from_millis(10)).await,
            StopOutcome::TimedOut
        );
        assert!(!controller.is_running());

        controller.start().await.unwrap();
        // The detached loop finishes its slow tick and exits in this window.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(controller.is_running());

        controller.stop_with_timeout(Duration::from_secs(2)).await;
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_fatal_source_stops_loop() {
        let db = Database::open_in_memory().unwrap();
        let (tx, mut rx) = update_channel();
        let mut cfg = config(100);
        cfg.thresholds = AlertThresholds {
            cell_voltage: 4.2,
            temperature: 40.0,
        };
        let mut controller =
            AcquisitionController::new(Box::new(FailingSource { good: 1 }), db.clone(), tx, &cfg);

        controller.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!controller.is_running());

        let commands = drain(&mut rx);
        assert!(matches!(commands[0], UiCommand::UpdateDisplay(_)));
        assert_eq!(commands[1], UiCommand::RefreshChart);
        let alerts = commands
            .iter()
            .filter(|c| matches!(c, UiCommand::RaiseAlert(_)))
            .count();
        assert_eq!(alerts, 2);
        let lost: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, UiCommand::SourceUnavailable(_)))
            .collect();
        assert_eq!(lost.len(), 1);
        assert_eq!(commands.last(), Some(&UiCommand::SourceUnavailable("sensor unplugged".into())));

        let errors = db.recent_errors(10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error_message.contains("sensor unplugged"));

        match controller.stop().await {
            StopOutcome::Stopped(stats) => {
                assert_eq!(stats.persisted, 1);
                assert_eq!(stats.alerts, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
