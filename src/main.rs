use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dbvault::backup::BackupManager;
use dbvault::cli::{handle_backup_command, BackupCommands};
use dbvault::config::{paths::VaultPaths, settings::Settings};
use dbvault::scheduler::BackupScheduler;
use dbvault::server::{self, AppState};

#[derive(Parser)]
#[command(
    name = "dbvault",
    author = "Kaylee Beyene",
    version,
    about = "Backup and restore lifecycle manager for database-backed services",
    long_about = "dbvault dumps a live database to plain SQL backups on demand or on a \
                  cron schedule, keeps a bounded history of them, verifies their \
                  structure, and restores one on explicit confirmation."
)]
struct Cli {
    /// Base directory for config.json and the default backup directory
    #[arg(long, global = true, env = "DBVAULT_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Backup(BackupCommands),

    /// Run the admin HTTP API and the backup scheduler
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a configuration file with the current settings
    Init,

    /// Show current configuration and paths
    Config,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, Some(Commands::Serve { .. }));
    init_tracing(if serving { "info" } else { "warn" });

    // Initialize paths and settings
    let paths = match cli.home {
        Some(home) => VaultPaths::with_base_dir(home),
        None => VaultPaths::new()?,
    };
    let settings = Settings::load(&paths)?;

    match cli.command {
        Some(Commands::Backup(cmd)) => {
            if cmd.needs_database() {
                settings.require_database_url()?;
            }
            let manager = BackupManager::from_settings(&settings, &paths);
            handle_backup_command(&manager, cmd).await?;
        }
        Some(Commands::Serve { host, port }) => {
            settings.require_database_url()?;

            let manager = Arc::new(BackupManager::from_settings(&settings, &paths));
            manager.store().ensure_directory()?;

            let scheduler = Arc::new(BackupScheduler::new(
                Arc::clone(&manager),
                &settings.schedule_config(),
            ));
            scheduler.start();

            let addr = format!(
                "{}:{}",
                host.unwrap_or_else(|| settings.server.host.clone()),
                port.unwrap_or(settings.server.port)
            );
            tracing::info!(
                backup_dir = %manager.store().root().display(),
                max_backups = manager.max_backups(),
                "dbvault {} starting",
                env!("CARGO_PKG_VERSION")
            );

            let state = AppState::new(manager, Arc::clone(&scheduler));
            server::serve(state, &addr, shutdown_signal()).await?;
            scheduler.stop();
        }
        Some(Commands::Init) => {
            settings.save(&paths)?;
            println!("Configuration written to: {}", paths.settings_file().display());
            println!();
            println!("Set the database connection with DATABASE_URL or database_url in that file.");
            println!("Run 'dbvault config' to review the settings.");
        }
        Some(Commands::Config) => {
            let schedule = settings.schedule_config();

            println!("dbvault Configuration");
            println!("=====================");
            println!("Config file:      {}", paths.settings_file().display());
            println!("Backup directory: {}", settings.backup_dir(&paths).display());
            println!();
            println!("Settings:");
            println!("  Max backups:      {}", settings.max_backups);
            println!("  Schedule:         {} ({})", schedule.schedule, schedule.schedule.describe());
            println!("  Schedule enabled: {}", schedule.enabled);
            println!(
                "  Database:         {}",
                if settings.database_url.trim().is_empty() { "not set" } else { "set" }
            );
            println!("  Dump command:     {}", settings.dump.program);
            println!("  Restore command:  {}", settings.restore.program);
            println!("  Safety backup:    {}", settings.safety_backup_before_restore);
            println!("  Admin API:        {}:{}", settings.server.host, settings.server.port);
        }
        None => {
            println!("dbvault - Database backup and restore manager");
            println!();
            println!("Run 'dbvault --help' for usage information.");
        }
    }

    Ok(())
}
