//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use clap::Subcommand;

use crate::backup::BackupManager;
use crate::display::backup::{format_backup_list, format_report, format_size, format_stats};
use crate::error::VaultResult;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Dump the database into a new backup
    Create,

    /// List all available backups
    List,

    /// Show backup count, size and age range
    Stats,

    /// Check that a backup looks like a complete dump
    Verify {
        /// Backup filename (use 'latest' for most recent)
        backup: String,
    },

    /// Overwrite the database from a backup
    Restore {
        /// Backup filename (use 'latest' for most recent)
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a backup
    Delete {
        /// Backup filename
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

impl BackupCommands {
    /// Whether the command talks to the database
    pub fn needs_database(&self) -> bool {
        matches!(self, Self::Create | Self::Restore { force: true, .. })
    }
}

/// Handle a backup command
pub async fn handle_backup_command(manager: &BackupManager, cmd: BackupCommands) -> VaultResult<()> {
    match cmd {
        BackupCommands::Create => {
            println!("Creating backup...");
            let outcome = manager.create().await?;
            println!("Backup created: {}", outcome.artifact.name);
            println!("Location: {}", outcome.artifact.path.display());
            println!("Size: {}", format_size(outcome.artifact.size_bytes));
            if !outcome.pruned.is_empty() {
                println!("Pruned {} old backup(s):", outcome.pruned.len());
                for name in &outcome.pruned {
                    println!("  {}", name);
                }
            }
        }

        BackupCommands::List => {
            let backups = manager.list()?;
            println!("{}", format_backup_list(&backups, chrono::Utc::now()));
            if backups.is_empty() {
                println!("Create one with: dbvault create");
            }
        }

        BackupCommands::Stats => {
            print!("{}", format_stats(&manager.stats()?));
        }

        BackupCommands::Verify { backup } => {
            let name = manager.resolve_name(&backup)?;
            let report = manager.verify(&name).await?;
            print!("{}", format_report(&report));
        }

        BackupCommands::Restore { backup, force } => {
            let name = manager.resolve_name(&backup)?;

            // Validate the backup first
            let report = manager.verify(&name).await?;
            print!("{}", format_report(&report));
            println!();

            if !force {
                println!("WARNING: This will overwrite ALL current data!");
                println!("To proceed, run again with --force flag:");
                println!("  dbvault restore {} --force", backup);
                return Ok(());
            }

            println!("Restoring from backup...");
            let outcome = manager.restore(&name, true).await?;
            if let Some(safety) = &outcome.safety_backup {
                println!("Pre-restore backup saved: {}", safety);
            }
            println!("Restore complete! ({} ms)", outcome.duration_ms);
        }

        BackupCommands::Delete { backup, force } => {
            if !force {
                // Resolve first so a bad name fails before the prompt text
                manager.download_path(&backup)?;
                println!("To delete {}, run again with --force flag:", backup);
                println!("  dbvault delete {} --force", backup);
                return Ok(());
            }

            manager.delete(&backup)?;
            println!("Deleted {}.", backup);
        }
    }

    Ok(())
}
