use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backup::BackupScope;
use crate::backup::record::Tier;

#[derive(Parser, Debug)]
#[command(name = "inventory-backup")]
#[command(about = "Backup and disaster recovery for the inventory database")]
#[command(version)]
pub struct Cli {
    /// Path to config.json
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take a backup now
    Create {
        /// What to back up
        #[arg(long = "type", value_enum, default_value = "database")]
        scope: BackupScope,
        /// Tier recorded in the backup name and used for retention
        #[arg(long, value_enum, default_value = "manual")]
        backup_type: Tier,
    },
    /// List backups, newest first
    List {
        #[arg(long, value_enum)]
        backup_type: Option<Tier>,
    },
    /// Restore the live database from a backup (latest database backup by default)
    Restore {
        #[arg(long)]
        backup_path: Option<PathBuf>,
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
        /// Restore even if the artifact no longer matches its recorded checksum
        #[arg(long)]
        skip_checksum: bool,
    },
    /// Verify one backup, or every backup when no path is given
    Verify {
        #[arg(long)]
        backup_path: Option<PathBuf>,
    },
    /// Delete backups past their retention period
    Cleanup {
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
    },
    /// Catalog summary
    Status,
    /// Upload every backup that has no offsite copy yet
    SyncOffsite,
    /// Run a disaster-recovery rehearsal
    TestDr {
        #[arg(long)]
        backup_path: Option<PathBuf>,
        /// Print the recovery plan before rehearsing
        #[arg(long)]
        show_plan: bool,
    },
    /// Run whatever the schedule says is due (call once a minute from cron or a timer)
    Tick {
        /// Evaluate the schedule at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}
