//! Command-line surface: subcommands for zone mutation, history
//! inspection/restore, and config inspection.

use clap::{Parser, Subcommand};
use log::{error, info};

use crate::archive::Archive;
use crate::config::ConfigFile;
use crate::coordinator::ZoneMutationCoordinator;
use crate::history::HistoryManager;
use crate::service::ServiceController;
use crate::zones::Zone;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "steadydnsd", about = "Backup, history and rollback engine for authoritative DNS zone edits")]
pub struct Cli {
    /// Path to the steadydns configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the configuration steadydnsd would run with.
    ExportConfig,
    /// Run the configured main-config validator against the running config.
    ConfigCheck,
    #[command(subcommand)]
    Zone(ZoneCommands),
    #[command(subcommand)]
    History(HistoryCommands),
}

#[derive(Subcommand)]
pub enum ZoneCommands {
    /// Create a zone from a JSON file describing it (serial is assigned).
    Create { zone_json: PathBuf },
    /// Update a zone from a JSON file describing its new desired state.
    Update { zone_json: PathBuf },
    /// Delete a zone and its config block.
    Delete { domain: String },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List every backup record currently in the archive.
    List,
    /// Restore on-disk state to what a given record captured.
    Restore { record_id: u64 },
    /// List protection files kept for rollback-of-rollback.
    Protections,
}

fn load_zone_input(path: &PathBuf) -> Result<Zone, String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("reading {path:?}: {e}"))?;
    serde_json::from_str(&contents).map_err(|e| format!("parsing {path:?}: {e}"))
}

pub async fn run(cli: Cli) -> Result<(), String> {
    let config = ConfigFile::try_from(cli.config.as_ref()).map_err(|e| e.to_string())?;

    match cli.command {
        Commands::ExportConfig => {
            println!("{}", config.as_json_pretty());
            Ok(())
        }
        Commands::ConfigCheck => {
            match &config.check_conf_command {
                Some(command) => {
                    crate::validator::validate_main_config(
                        command,
                        &config.main_config_path.display().to_string(),
                        config.subprocess_timeout_secs,
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                    println!("config ok");
                    Ok(())
                }
                None => {
                    println!("no check-conf command configured, skipping");
                    Ok(())
                }
            }
        }
        Commands::Zone(zone_command) => run_zone_command(config, zone_command).await,
        Commands::History(history_command) => run_history_command(config, history_command).await,
    }
}

async fn run_zone_command(config: ConfigFile, command: ZoneCommands) -> Result<(), String> {
    let history = Arc::new(HistoryManager::new(config.clone()));
    let service = Arc::new(ServiceController::new(config.clone()));
    history.set_reloader(service.clone()).await;
    let coordinator = ZoneMutationCoordinator::new(config, history, service);

    match command {
        ZoneCommands::Create { zone_json } => {
            let zone = load_zone_input(&zone_json)?;
            let created = coordinator.create_zone(zone).await.map_err(|e| e.to_string())?;
            info!("created zone {} with serial {}", created.domain, created.soa.serial);
            println!("{}", serde_json::to_string_pretty(&created).map_err(|e| e.to_string())?);
            Ok(())
        }
        ZoneCommands::Update { zone_json } => {
            let zone = load_zone_input(&zone_json)?;
            let updated = coordinator.update_zone(zone).await.map_err(|e| e.to_string())?;
            info!("updated zone {} to serial {}", updated.domain, updated.soa.serial);
            println!("{}", serde_json::to_string_pretty(&updated).map_err(|e| e.to_string())?);
            Ok(())
        }
        ZoneCommands::Delete { domain } => {
            coordinator.delete_zone(&domain).await.map_err(|e| e.to_string())?;
            info!("deleted zone {domain}");
            Ok(())
        }
    }
}

async fn run_history_command(config: ConfigFile, command: HistoryCommands) -> Result<(), String> {
    match command {
        HistoryCommands::List => {
            match Archive::open(&config.archive_path()).map_err(|e| e.to_string())? {
                None => println!("no backup history yet"),
                Some(archive) => {
                    for record in &archive.records {
                        println!(
                            "{}\t{}\t{}\t{}",
                            record.record_id, record.operation, record.domain, record.timestamp
                        );
                    }
                }
            }
            Ok(())
        }
        HistoryCommands::Restore { record_id } => {
            let history = HistoryManager::new(config.clone());
            let service = Arc::new(ServiceController::new(config));
            history.set_reloader(service).await;
            history.restore_backup(record_id).await.map_err(|e| e.to_string())?;
            info!("restored backup record {record_id}");
            Ok(())
        }
        HistoryCommands::Protections => {
            let history = HistoryManager::new(config);
            for path in history.list_protection_files().map_err(|e| e.to_string())? {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

pub fn report_error(err: &str) {
    error!("{err}");
    eprintln!("error: {err}");
}
