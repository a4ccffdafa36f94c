//! Background acquisition: one sample per interval, persisted and forwarded
//! to the presentation side through the update channel.

mod controller;
mod loop_worker;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

pub use controller::{AcquisitionController, StopOutcome};
pub use loop_worker::AcquisitionStats;

use crate::telemetry::TelemetrySource;

/// Source shared between the controller and whichever loop is running, so
/// simulator state and sensor history survive a stop/start cycle.
pub(crate) type SharedSource = Arc<Mutex<Box<dyn TelemetrySource>>>;

/// Cross-context "acquisition active" flag.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
