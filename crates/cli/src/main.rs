//! symvault command-line driver.
//!
//! Wires store configuration to the consistency and synchronization engines.
//! The process exits non-zero when a run accumulated errors or warnings.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::ExitCode;
use symvault_core::{CollisionResolutionMode, StorageConfig, StorageFormat};
use symvault_engine::{
    ConsistencyEngine, ConsistencyMode, ConsistencyOptions, SyncEngine, SyncOptions,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Symbol-store validation, repair and synchronization.
#[derive(Parser)]
#[command(name = "symvault", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "symvault.toml")]
    config: PathBuf,

    /// Maximum in-flight storage operations.
    #[arg(long, global = true, default_value_t = 32)]
    concurrency: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the store and report defects without changing anything.
    Validate {
        /// Also audit public/private classification of every key.
        #[arg(long)]
        audit_access: bool,
    },
    /// Repair fixable defects in place.
    Fix {
        #[arg(long)]
        audit_access: bool,
    },
    /// Repair fixable defects and remove unreferenced files.
    Delete {
        #[arg(long)]
        audit_access: bool,
    },
    /// Synchronize the configured source store into the target store.
    Upload {
        /// Target store format, used to bootstrap an empty target.
        #[arg(long, value_parser = parse_format, default_value = "normal")]
        format: StorageFormat,

        /// Collision policy for data files.
        #[arg(long, default_value = "terminate")]
        collision_mode: CollisionResolutionMode,

        /// Collision policy for weak-content-key artifacts.
        #[arg(long)]
        weak_collision_mode: Option<CollisionResolutionMode>,
    },
}

/// Store wiring loaded from the configuration file, overridable through
/// `SYMVAULT_`-prefixed environment variables.
#[derive(Debug, Deserialize)]
struct AppConfig {
    /// The store operated on (target of `upload`).
    store: StorageConfig,
    /// Source store for `upload`.
    source: Option<StorageConfig>,
    /// Backup store receiving pre-overwrite content.
    backup: Option<StorageConfig>,
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("SYMVAULT_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}

fn parse_format(s: &str) -> Result<StorageFormat, String> {
    match s {
        "normal" => Ok(StorageFormat::Normal),
        "lower-case" => Ok(StorageFormat::LowerCase),
        "upper-case" => Ok(StorageFormat::UpperCase),
        other => Err(format!(
            "unknown storage format {other:?}, expected normal, lower-case or upper-case"
        )),
    }
}

async fn run_consistency(
    config: &AppConfig,
    mode: ConsistencyMode,
    concurrency: usize,
    audit_access: bool,
) -> anyhow::Result<bool> {
    let storage = symvault_storage::from_config(&config.store).await?;
    let report = ConsistencyEngine::new(
        storage.as_ref(),
        ConsistencyOptions {
            mode,
            concurrency,
            audit_access,
        },
    )
    .run()
    .await?;
    storage.flush().await?;

    println!(
        "tags: {}, files: {}, deleted: {}, errors: {}, warnings: {}, fixes: {}",
        report.tags_processed(),
        report.files_scanned(),
        report.files_deleted(),
        report.stats.errors(),
        report.stats.warnings(),
        report.stats.fixes()
    );
    Ok(report.has_problems())
}

async fn run_upload(
    config: &AppConfig,
    concurrency: usize,
    format: StorageFormat,
    collision_mode: CollisionResolutionMode,
    weak_collision_mode: Option<CollisionResolutionMode>,
) -> anyhow::Result<bool> {
    let Some(source_config) = &config.source else {
        bail!("upload requires a [source] store in the configuration");
    };
    if collision_mode == CollisionResolutionMode::Overwrite && config.backup.is_none() {
        bail!("collision mode overwrite requires a [backup] store in the configuration");
    }

    let source = symvault_storage::from_config(source_config).await?;
    let target = symvault_storage::from_config(&config.store).await?;
    let backup = match &config.backup {
        Some(backup_config) => Some(symvault_storage::from_config(backup_config).await?),
        None => None,
    };

    let engine = SyncEngine::new(
        source.as_ref(),
        target.as_ref(),
        backup.as_deref(),
        SyncOptions {
            concurrency,
            target_format: format,
            collision_mode,
            weak_key_collision_mode: weak_collision_mode,
        },
    );
    let report = engine.run().await?;
    source.flush().await?;

    println!(
        "copied: {}, skipped: {}, errors: {}, warnings: {}",
        report.files_copied(),
        report.files_skipped(),
        report.stats.errors(),
        report.stats.warnings()
    );
    Ok(report.has_problems())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Command::Validate { audit_access } => {
            run_consistency(
                &config,
                ConsistencyMode::Validate,
                cli.concurrency,
                audit_access,
            )
            .await
        }
        Command::Fix { audit_access } => {
            run_consistency(&config, ConsistencyMode::Fix, cli.concurrency, audit_access).await
        }
        Command::Delete { audit_access } => {
            run_consistency(
                &config,
                ConsistencyMode::Delete,
                cli.concurrency,
                audit_access,
            )
            .await
        }
        Command::Upload {
            format,
            collision_mode,
            weak_collision_mode,
        } => {
            run_upload(
                &config,
                cli.concurrency,
                format,
                collision_mode,
                weak_collision_mode,
            )
            .await
        }
    };

    match outcome {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
