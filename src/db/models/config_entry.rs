use chrono::{DateTime, Utc};
use serde::Serialize;

/// One `Configuration` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub parameter_name: String,
    pub value: String,
    pub last_updated: DateTime<Utc>,
}
