pub mod acquisition;
pub mod alerts;
pub mod configuration;
pub mod db;
pub mod export;
pub mod models;
pub mod presentation;
pub mod settings;
pub mod telemetry;
pub mod updates;
pub mod utils;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use acquisition::AcquisitionController;
use configuration::MonitorConfig;
use db::{Database, QueryWindow, Severity};
use presentation::{ConsolePresenter, PresentationConsumer};
use settings::{resolve_path, SettingsStore, SourceKind};
use updates::update_channel;

const DB_FILE: &str = "database/battery_data.db";
const SETTINGS_FILE: &str = "settings.json";
const BACKUP_DIR: &str = "database/backups";

#[derive(Parser)]
#[command(name = "bms-monitor")]
#[command(about = "Battery cell telemetry monitor: sample, store, alert, export")]
#[command(version)]
struct Cli {
    /// Directory holding the database, settings, logs and exports
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Settings file (defaults to settings.json in the data directory)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log to stderr instead of the configured log file
    #[arg(long)]
    stderr: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire and display readings until Ctrl+C (default)
    Run,

    /// Write the full history to a timestamped CSV file
    Export {
        /// Target directory (defaults to the configured export directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Delete every stored sample
    Clear,

    /// Show or change monitoring parameters
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print stored samples from the recent window
    Tail {
        /// Window length in seconds; 0 prints the whole history
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },

    /// Print the most recent logged errors
    Errors {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Copy the database to a timestamped backup file
    Backup {
        /// Target directory (defaults to database/backups in the data directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print the tables and columns of the database
    Schema,

    /// Choose the telemetry source used by `run`
    Source {
        #[arg(value_enum)]
        kind: SourceKind,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

pub(crate) struct AppState {
    pub(crate) db: Database,
    pub(crate) settings: SettingsStore,
    pub(crate) data_dir: PathBuf,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(SETTINGS_FILE));
    let settings = SettingsStore::new(settings_path)?;

    let log_file = if cli.stderr {
        None
    } else {
        settings
            .current()
            .log_file
            .map(|path| resolve_path(&cli.data_dir, &path))
    };
    utils::init_logging(log_file.as_deref())?;
    info!("BMS monitor starting up...");
    if let Some(warning) = settings.load_warning() {
        warn!("{warning}");
    }

    let db = Database::new(cli.data_dir.join(DB_FILE))
        .context("failed to open battery database")?;
    let state = AppState {
        db,
        settings,
        data_dir: cli.data_dir,
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(dispatch(&state, cli.command.unwrap_or(Command::Run)))
}

async fn dispatch(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Run => run_monitor(state).await,
        Command::Export { dir } => {
            let dir = dir.unwrap_or_else(|| {
                resolve_path(&state.data_dir, &state.settings.current().export_dir)
            });
            let summary = export::export_csv(&state.db, &dir).await?;
            println!(
                "exported {} samples to {}",
                summary.records,
                summary.path.display()
            );
            Ok(())
        }
        Command::Clear => {
            let removed = state.db.clear_readings().await?;
            println!("removed {removed} samples");
            Ok(())
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                for entry in state.db.get_configuration().await? {
                    println!(
                        "{} = {} (updated {})",
                        entry.parameter_name, entry.value, entry.last_updated
                    );
                }
                Ok(())
            }
            ConfigAction::Set { key, value } => {
                MonitorConfig::update(&state.db, &key, &value).await?;
                println!("{key} = {}", value.trim());
                Ok(())
            }
        },
        Command::Tail { seconds } => {
            let samples = state.db.query_window(QueryWindow::from_secs(seconds)).await?;
            println!("{}", export::CSV_HEADER);
            for sample in &samples {
                let [c1, c2, c3] = sample.cell_voltages;
                println!(
                    "{},{c1:.3},{c2:.3},{c3:.3},{:.1},{:.1}",
                    db::helpers::format_timestamp(sample.timestamp),
                    sample.temperature,
                    sample.state_of_charge
                );
            }
            Ok(())
        }
        Command::Errors { limit } => {
            for entry in state.db.recent_errors(limit).await? {
                println!(
                    "{} [{}] {}",
                    entry.timestamp,
                    entry.severity.as_str(),
                    entry.error_message
                );
            }
            Ok(())
        }
        Command::Backup { dir } => {
            let dir = dir.unwrap_or_else(|| state.data_dir.join(BACKUP_DIR));
            let path = state.db.backup_to(&dir).await?;
            println!("backup written to {}", path.display());
            Ok(())
        }
        Command::Schema => {
            if let Some(path) = state.db.path() {
                println!("database: {}", path.display());
            }
            for table in state.db.schema_layout().await? {
                println!("{}", table.name);
                for column in &table.columns {
                    let mut flags = Vec::new();
                    if column.primary_key {
                        flags.push("PRIMARY KEY");
                    }
                    if column.not_null {
                        flags.push("NOT NULL");
                    }
                    let line = format!("  {} {} {}", column.name, column.decl_type, flags.join(" "));
                    println!("{}", line.trim_end());
                }
            }
            Ok(())
        }
        Command::Source { kind } => {
            let updated = state.settings.update(|settings| settings.source = kind)?;
            println!("telemetry source set to {:?}", updated.source);
            Ok(())
        }
    }
}

async fn run_monitor(state: &AppState) -> Result<()> {
    let config = MonitorConfig::load(&state.db).await?;
    let user = state.settings.current();

    let source = match telemetry::build_source(&user, config.sampling_interval) {
        Ok(source) => source,
        Err(err) => {
            let message = format!("Failed to initialise telemetry source: {err:#}");
            if let Err(log_err) = state.db.record_error(&message, Severity::Error).await {
                warn!("failed to record startup error: {log_err:?}");
            }
            return Err(err.context("failed to initialise telemetry source"));
        }
    };
    info!("telemetry source: {}", source.describe());

    let (tx, rx) = update_channel();
    let mut controller = AcquisitionController::new(source, state.db.clone(), tx, &config);
    let mut consumer = PresentationConsumer::new(
        ConsolePresenter::new(),
        rx,
        state.db.clone(),
        QueryWindow::from_secs(user.chart_window_secs),
        config.thresholds,
    );

    controller.start().await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {err}");
        }
        signal_token.cancel();
    });

    let report = consumer.run_until(shutdown).await;
    let outcome = controller.stop().await;
    let tail = consumer.drain_and_apply().await;

    info!(
        "BMS monitor shutting down: {:?}; {} UI updates applied, {} failed",
        outcome,
        report.applied + tail.applied,
        report.failed + tail.failed
    );
    Ok(())
}
