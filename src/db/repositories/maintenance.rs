use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection};

use crate::db::{
    connection::Database,
    models::{ColumnLayout, TableLayout},
};

const BACKUP_STEM: &str = "battery_data_backup";
const MAX_NAME_ATTEMPTS: u32 = 100;

fn unique_backup_path(dir: &Path, stem: &str) -> Result<PathBuf> {
    for attempt in 0..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.db")
        } else {
            format!("{stem}_{attempt}.db")
        };
        let path = dir.join(name);
        if !path.exists() {
            return Ok(path);
        }
    }
    bail!("no free backup file name for {stem} in {}", dir.display())
}

fn read_table(conn: &Connection, name: String) -> Result<TableLayout> {
    let mut stmt = conn.prepare(
        r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?1) ORDER BY cid"#,
    )?;
    let columns = stmt
        .query_map(params![name], |row| {
            Ok(ColumnLayout {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to read columns of {name}"))?;

    Ok(TableLayout { name, columns })
}

impl Database {
    /// Writes a consistent copy of the store to
    /// `dir/battery_data_backup_YYYYMMDD_HHMMSS.db` and returns its path.
    /// Never overwrites an earlier backup.
    pub async fn backup_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create backup directory {}", dir.display()))?;

        let dir = dir.to_path_buf();
        let stem = format!("{BACKUP_STEM}_{}", Utc::now().format("%Y%m%d_%H%M%S"));

        let path = self
            .execute(move |conn| {
                let path = unique_backup_path(&dir, &stem)?;
                conn.execute("VACUUM INTO ?1", params![path.to_string_lossy()])
                    .with_context(|| format!("failed to write backup {}", path.display()))?;
                Ok(path)
            })
            .await?;

        info!("database backed up to {}", path.display());
        Ok(path)
    }

    /// User tables and their columns, ordered by table name.
    pub async fn schema_layout(&self) -> Result<Vec<TableLayout>> {
        self.execute(|conn| {
            let names = {
                let mut stmt = conn.prepare(
                    r"SELECT name FROM sqlite_master
                      WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
                      ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                names
            };

            names
                .into_iter()
                .map(|name| read_table(conn, name))
                .collect()
        })
        .await
    }
}
