//! Persisted battery sample and window selection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::CELL_COUNT;

/// One `BatteryData` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub cell_voltages: [f64; CELL_COUNT],
    pub temperature: f64,
    pub state_of_charge: f64,
}

/// Which rows a window query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryWindow {
    /// Rows with `timestamp >= now - duration`.
    Last(Duration),
    /// Entire history, used for export.
    All,
}

impl QueryWindow {
    /// `0` means the whole history.
    pub fn from_secs(seconds: u64) -> Self {
        if seconds == 0 {
            QueryWindow::All
        } else {
            QueryWindow::Last(Duration::from_secs(seconds))
        }
    }
}
