use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_datetime},
    models::ConfigEntry,
};

fn row_to_entry(row: &Row) -> Result<ConfigEntry, rusqlite::Error> {
    let last_updated: String = row.get("last_updated")?;

    Ok(ConfigEntry {
        parameter_name: row.get("parameter_name")?,
        value: row.get("value")?,
        last_updated: parse_datetime(&last_updated, "last_updated").map_err(conversion_error)?,
    })
}

impl Database {
    /// All configuration rows, ordered by name.
    pub async fn get_configuration(&self) -> Result<Vec<ConfigEntry>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT parameter_name, value, last_updated
                 FROM Configuration
                 ORDER BY parameter_name ASC",
            )?;

            let entries = stmt
                .query_map([], row_to_entry)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(entries)
        })
        .await
    }

    pub async fn get_configuration_value(&self, name: &str) -> Result<Option<ConfigEntry>> {
        let name = name.to_string();
        self.execute(move |conn| {
            let entry = conn
                .query_row(
                    "SELECT parameter_name, value, last_updated
                     FROM Configuration
                     WHERE parameter_name = ?1",
                    params![name],
                    row_to_entry,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    /// Writes one parameter and stamps `last_updated`. Callers validate the
    /// value; unknown names are inserted as new rows.
    pub async fn set_configuration_value(&self, name: &str, value: &str) -> Result<ConfigEntry> {
        let name = name.to_string();
        let value = value.to_string();
        let now = Utc::now();
        let stamp = format_timestamp(now);

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO Configuration (parameter_name, value, last_updated)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(parameter_name) DO UPDATE SET
                     value = excluded.value,
                     last_updated = excluded.last_updated",
                params![name, value, stamp],
            )
            .with_context(|| format!("failed to update configuration key {name}"))?;

            Ok(ConfigEntry {
                parameter_name: name,
                value,
                last_updated: parse_datetime(&stamp, "last_updated")?,
            })
        })
        .await
    }
}
