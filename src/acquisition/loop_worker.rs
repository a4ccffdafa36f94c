use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alerts::{self, AlertThresholds};
use crate::db::{Database, Severity};
use crate::models::Reading;
use crate::telemetry::SourceError;
use crate::updates::{UiCommand, UpdateSender};

use super::{RunFlag, SharedSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub ticks: u64,
    pub persisted: u64,
    pub failed_inserts: u64,
    pub skipped_ticks: u64,
    pub alerts: u64,
}

pub(crate) struct LoopContext {
    pub source: SharedSource,
    pub db: Database,
    pub updates: UpdateSender,
    pub thresholds: AlertThresholds,
    pub interval: Duration,
    pub flag: RunFlag,
}

enum TickOutcome {
    Continue,
    SourceLost(String),
}

/// Keeps stored timestamps strictly increasing at microsecond resolution,
/// which is what the store's text encoding can represent.
#[derive(Default)]
struct TimestampClock {
    last: Option<DateTime<Utc>>,
}

impl TimestampClock {
    fn stamp(&mut self, observed: DateTime<Utc>) -> DateTime<Utc> {
        let micros = (observed.nanosecond() / 1_000) * 1_000;
        let truncated = observed.with_nanosecond(micros).unwrap_or(observed);
        let stamped = match self.last {
            Some(last) if truncated <= last => last + ChronoDuration::microseconds(1),
            _ => truncated,
        };
        self.last = Some(stamped);
        stamped
    }
}

pub(crate) async fn acquisition_loop(
    ctx: LoopContext,
    cancel_token: CancellationToken,
) -> AcquisitionStats {
    let period = ctx.interval;
    // First sample one full period after start, so an immediate stop writes nothing.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut stats = AcquisitionStats::default();
    let mut clock = TimestampClock::default();

    log_info!("acquisition loop started (interval {}ms)", period.as_millis());

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("acquisition loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                stats.ticks += 1;
                if let TickOutcome::SourceLost(message) = run_tick(&ctx, &mut clock, &mut stats).await {
                    handle_source_lost(&ctx, &message).await;
                    break;
                }
            }
        }
    }

    // A cancelled loop may have been detached by a timed-out stop; the flag
    // then belongs to the controller (and possibly a newer loop).
    if !cancel_token.is_cancelled() {
        ctx.flag.clear();
    }
    log_info!(
        "acquisition loop exited: {} ticks, {} persisted, {} failed inserts, {} skipped, {} alerts",
        stats.ticks,
        stats.persisted,
        stats.failed_inserts,
        stats.skipped_ticks,
        stats.alerts
    );
    stats
}

async fn run_tick(
    ctx: &LoopContext,
    clock: &mut TimestampClock,
    stats: &mut AcquisitionStats,
) -> TickOutcome {
    let source = Arc::clone(&ctx.source);
    let sampled = tokio::task::spawn_blocking(move || {
        let mut guard = source.lock().unwrap_or_else(PoisonError::into_inner);
        guard.sample()
    })
    .await;

    let reading = match sampled {
        Ok(Ok(reading)) => reading,
        Ok(Err(SourceError::Transient(message))) => {
            log_warn!("skipping tick: {message}");
            stats.skipped_ticks += 1;
            return TickOutcome::Continue;
        }
        Ok(Err(SourceError::Fatal(message))) => return TickOutcome::SourceLost(message),
        Err(join_err) => {
            log_error!("sampling worker failed: {join_err}");
            stats.skipped_ticks += 1;
            return TickOutcome::Continue;
        }
    };

    let reading = reading.with_timestamp(clock.stamp(reading.timestamp()));
    publish(ctx, UiCommand::UpdateDisplay(reading.clone()));

    match ctx.db.insert_reading(&reading).await {
        Ok(id) => {
            stats.persisted += 1;
            log_debug!("stored sample {id} at {}", reading.timestamp());
            publish(ctx, UiCommand::RefreshChart);
        }
        Err(err) => {
            stats.failed_inserts += 1;
            log_error!("failed to persist sample: {err:?}");
        }
    }

    raise_alerts(ctx, &reading, stats);
    TickOutcome::Continue
}

fn raise_alerts(ctx: &LoopContext, reading: &Reading, stats: &mut AcquisitionStats) {
    for event in alerts::evaluate(reading, &ctx.thresholds) {
        log_warn!("{}", event.message());
        stats.alerts += 1;
        publish(ctx, UiCommand::RaiseAlert(event));
    }
}

async fn handle_source_lost(ctx: &LoopContext, message: &str) {
    log_error!("telemetry source lost, stopping acquisition: {message}");
    publish(ctx, UiCommand::SourceUnavailable(message.to_string()));
    if let Err(err) = ctx
        .db
        .record_error(
            &format!("Telemetry source unavailable: {message}"),
            Severity::Error,
        )
        .await
    {
        log_error!("failed to record source error: {err:?}");
    }
}

fn publish(ctx: &LoopContext, command: UiCommand) {
    if !ctx.updates.enqueue(command) {
        log_debug!("presentation side is gone; update dropped");
    }
}
