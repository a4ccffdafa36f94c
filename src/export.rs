//! CSV export of the full sample history.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use thiserror::Error;

use crate::db::helpers::format_timestamp;
use crate::db::{Database, QueryWindow, StoredSample};

pub const CSV_HEADER: &str =
    "timestamp,cell1_voltage,cell2_voltage,cell3_voltage,temperature,state_of_charge";

const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no stored samples to export")]
    NoData,

    #[error("failed to write export file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("store error during export: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub records: u64,
}

/// Writes every stored sample to `bms_data_YYYYMMDD_HHMMSS.csv` in `dir` and
/// records the export. Nothing is written when the store is empty.
pub async fn export_csv(db: &Database, dir: &Path) -> Result<ExportSummary, ExportError> {
    let samples = db
        .query_window(QueryWindow::All)
        .await
        .map_err(ExportError::Store)?;
    if samples.is_empty() {
        return Err(ExportError::NoData);
    }

    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let stem = format!("bms_data_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let (path, file) = create_unique(dir, &stem)?;
    write_rows(file, &samples).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    let records = samples.len() as u64;
    db.record_export(&path.to_string_lossy(), "csv", records)
        .await
        .map_err(ExportError::Store)?;

    info!("exported {records} samples to {}", path.display());
    Ok(ExportSummary { path, records })
}

/// Never overwrites: a second export within the same second gets a suffix.
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File), ExportError> {
    let mut attempt = 0;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_{attempt}.csv")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                attempt += 1;
            }
            Err(source) => return Err(ExportError::Io { path, source }),
        }
    }
}

fn write_rows(file: File, samples: &[StoredSample]) -> io::Result<()> {
    let mut out = BufWriter::new(file);
    writeln!(out, "{CSV_HEADER}")?;
    for sample in samples {
        let [c1, c2, c3] = sample.cell_voltages;
        writeln!(
            out,
            "{},{c1},{c2},{c3},{},{}",
            format_timestamp(sample.timestamp),
            sample.temperature,
            sample.state_of_charge
        )?;
    }
    out.flush()
}
