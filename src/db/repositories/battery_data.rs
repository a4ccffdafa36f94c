use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_datetime, to_u64},
    models::{QueryWindow, StoredSample},
    StoreError,
};
use crate::models::{reading::validate_core, Reading};

const SELECT_COLUMNS: &str = "SELECT id, timestamp, cell1_voltage, cell2_voltage, cell3_voltage,
        temperature, state_of_charge
 FROM BatteryData";

fn row_to_sample(row: &Row) -> Result<StoredSample, rusqlite::Error> {
    let timestamp_str: String = row.get(1)?;
    let timestamp = parse_datetime(&timestamp_str, "timestamp").map_err(conversion_error)?;

    Ok(StoredSample {
        id: row.get(0)?,
        timestamp,
        cell_voltages: [row.get(2)?, row.get(3)?, row.get(4)?],
        temperature: row.get(5)?,
        state_of_charge: row.get(6)?,
    })
}

fn select_since(conn: &Connection, cutoff: Option<String>) -> Result<Vec<StoredSample>> {
    let samples = match cutoff {
        Some(cutoff) => {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![cutoff], row_to_sample)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, id ASC"))?;
            let rows = stmt
                .query_map([], row_to_sample)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(samples)
}

impl Database {
    /// Appends one reading and returns its row id.
    ///
    /// Readings outside the domain bounds are rejected with
    /// [`StoreError::InvalidReading`]; nothing is clamped here.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<i64> {
        let cells = reading.cell_voltages();
        validate_core(&cells, reading.temperature(), reading.state_of_charge())
            .map_err(StoreError::from)?;

        let timestamp = format_timestamp(reading.timestamp());
        let temperature = reading.temperature();
        let state_of_charge = reading.state_of_charge();

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO BatteryData (
                    timestamp,
                    cell1_voltage,
                    cell2_voltage,
                    cell3_voltage,
                    temperature,
                    state_of_charge
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    timestamp,
                    cells[0],
                    cells[1],
                    cells[2],
                    temperature,
                    state_of_charge,
                ],
            )
            .with_context(|| "failed to insert battery sample")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Rows inside `window`, oldest first.
    pub async fn query_window(&self, window: QueryWindow) -> Result<Vec<StoredSample>> {
        let cutoff = match window {
            QueryWindow::All => None,
            QueryWindow::Last(duration) => chrono::Duration::from_std(duration)
                .ok()
                .and_then(|delta| Utc::now().checked_sub_signed(delta))
                .map(format_timestamp),
        };

        self.execute(move |conn| select_since(conn, cutoff))
            .await
            .context("failed to query battery samples")
    }

    /// Deletes every sample; the schema stays in place.
    pub async fn clear_readings(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM BatteryData", [])
                .with_context(|| "failed to clear battery samples")?;
            Ok(removed)
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM BatteryData", [], |row| row.get(0))?;
            to_u64(count, "row count")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reading_at(
        timestamp: chrono::DateTime<Utc>,
        cells: [f64; 3],
        temperature: f64,
        soc: f64,
    ) -> Reading {
        Reading::new(timestamp, cells, temperature, None, soc, None).unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_window_returns_row() {
        let db = Database::open_in_memory().unwrap();
        let inserted_at = Utc::now() - chrono::Duration::seconds(1);
        let reading = reading_at(inserted_at, [3.6, 3.6, 3.6], 25.0, 80.0);

        db.insert_reading(&reading).await.unwrap();

        let rows = db
            .query_window(QueryWindow::Last(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.cell_voltages, [3.6, 3.6, 3.6]);
        assert_eq!(row.temperature, 25.0);
        assert_eq!(row.state_of_charge, 80.0);
        assert!(row.timestamp >= Utc::now() - chrono::Duration::seconds(60));
        assert!((row.timestamp - inserted_at).num_microseconds().unwrap().abs() < 1);
    }

    #[tokio::test]
    async fn test_window_is_ordered_and_floats_exact() {
        let db = Database::open_in_memory().unwrap();
        let base = Utc::now() - chrono::Duration::seconds(30);
        let values = [
            ([3.123456789012345, 0.1 + 0.2, 4.2], 21.123456789, 12.3456789),
            ([3.7, 3.70000000000001, 3.69999999999999], -12.5, 99.99999999),
            ([0.0, 1e-12, 4.19], 149.999, 0.000001),
        ];

        // Insert out of chronological order on purpose.
        for (offset, (cells, temp, soc)) in [2i64, 0, 1].into_iter().zip(values.iter()) {
            let ts = base + chrono::Duration::seconds(offset);
            db.insert_reading(&reading_at(ts, *cells, *temp, *soc))
                .await
                .unwrap();
        }

        let rows = db.query_window(QueryWindow::from_secs(3600)).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        // Offsets were [2, 0, 1] so the ascending order is values[1], values[2], values[0].
        let expected = [&values[1], &values[2], &values[0]];
        for (row, (cells, temp, soc)) in rows.iter().zip(expected) {
            assert_eq!(row.cell_voltages, *cells);
            assert_eq!(row.temperature, *temp);
            assert_eq!(row.state_of_charge, *soc);
        }
    }

    #[tokio::test]
    async fn test_window_excludes_old_rows() {
        let db = Database::open_in_memory().unwrap();
        let old = Utc::now() - chrono::Duration::seconds(600);
        let fresh = Utc::now() - chrono::Duration::seconds(5);
        db.insert_reading(&reading_at(old, [3.6; 3], 25.0, 50.0))
            .await
            .unwrap();
        db.insert_reading(&reading_at(fresh, [3.7; 3], 26.0, 55.0))
            .await
            .unwrap();

        let recent = db.query_window(QueryWindow::from_secs(60)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].cell_voltages, [3.7; 3]);

        let all = db.query_window(QueryWindow::from_secs(0)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_count_and_clear() {
        let db = Database::open_in_memory().unwrap();
        let base = Utc::now();
        for i in 0..7 {
            let ts = base + chrono::Duration::milliseconds(i);
            db.insert_reading(&reading_at(ts, [3.6; 3], 25.0, 50.0))
                .await
                .unwrap();
        }

        assert_eq!(db.query_window(QueryWindow::All).await.unwrap().len(), 7);
        assert_eq!(db.count_readings().await.unwrap(), 7);

        assert_eq!(db.clear_readings().await.unwrap(), 7);
        assert!(db.query_window(QueryWindow::All).await.unwrap().is_empty());

        // Schema survives a clear.
        db.insert_reading(&reading_at(Utc::now(), [3.6; 3], 25.0, 50.0))
            .await
            .unwrap();
        assert_eq!(db.count_readings().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_huge_window_returns_everything() {
        let db = Database::open_in_memory().unwrap();
        db.insert_reading(&reading_at(Utc::now(), [3.6; 3], 25.0, 50.0))
            .await
            .unwrap();
        let rows = db
            .query_window(QueryWindow::Last(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
