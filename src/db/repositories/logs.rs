use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_datetime, to_i64, to_u64},
    models::{ErrorLog, ExportLog, Severity},
};

fn row_to_export_log(row: &Row) -> Result<ExportLog, rusqlite::Error> {
    let timestamp: String = row.get("timestamp")?;
    let record_count: i64 = row.get("record_count")?;

    Ok(ExportLog {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp").map_err(conversion_error)?,
        file_path: row.get("file_path")?,
        export_format: row.get("export_format")?,
        record_count: to_u64(record_count, "record_count").map_err(conversion_error)?,
    })
}

fn row_to_error_log(row: &Row) -> Result<ErrorLog, rusqlite::Error> {
    let timestamp: String = row.get("timestamp")?;
    let severity: String = row.get("severity")?;

    Ok(ErrorLog {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp, "timestamp").map_err(conversion_error)?,
        error_message: row.get("error_message")?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| conversion_error(anyhow!("unknown severity '{severity}'")))?,
    })
}

impl Database {
    pub async fn record_export(
        &self,
        file_path: &str,
        export_format: &str,
        record_count: u64,
    ) -> Result<i64> {
        let file_path = file_path.to_string();
        let export_format = export_format.to_string();
        let record_count = to_i64(record_count)?;
        let stamp = format_timestamp(Utc::now());

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO ExportLogs (timestamp, file_path, export_format, record_count)
                 VALUES (?1, ?2, ?3, ?4)",
                params![stamp, file_path, export_format, record_count],
            )
            .with_context(|| "failed to record export")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn list_exports(&self) -> Result<Vec<ExportLog>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, file_path, export_format, record_count
                 FROM ExportLogs
                 ORDER BY id DESC",
            )?;
            let logs = stmt
                .query_map([], row_to_export_log)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }

    pub async fn record_error(&self, message: &str, severity: Severity) -> Result<()> {
        let message = message.to_string();
        let stamp = format_timestamp(Utc::now());

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO ErrorLogs (timestamp, error_message, severity)
                 VALUES (?1, ?2, ?3)",
                params![stamp, message, severity.as_str()],
            )
            .with_context(|| "failed to record error log")?;
            Ok(())
        })
        .await
    }

    /// Newest first.
    pub async fn recent_errors(&self, limit: u32) -> Result<Vec<ErrorLog>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, error_message, severity
                 FROM ErrorLogs
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let logs = stmt
                .query_map(params![limit], row_to_error_log)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }
}
