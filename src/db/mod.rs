mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

use thiserror::Error;

pub use connection::Database;
pub use models::{
    ColumnLayout, ConfigEntry, ErrorLog, ExportLog, QueryWindow, Severity, StoredSample, TableLayout,
};

/// Failures callers may want to tell apart; everything else is carried as
/// `anyhow` context.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to initialize sample store at {0}")]
    Init(String),

    #[error("reading rejected by store: {0}")]
    InvalidReading(#[from] crate::models::ReadingError),

    #[error("database worker is not running")]
    WorkerGone,
}
