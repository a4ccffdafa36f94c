pub mod config_entry;
pub mod logs;
pub mod sample;
pub mod schema;

pub use config_entry::ConfigEntry;
pub use logs::{ErrorLog, ExportLog, Severity};
pub use sample::{QueryWindow, StoredSample};
pub use schema::{ColumnLayout, TableLayout};
