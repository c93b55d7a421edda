//! Inventory backup and disaster-recovery tool
//!
//! Creates, catalogs, verifies, prunes and restores backups of the inventory
//! database, and drives scheduled runs from an external timer.

// inventory-backup/src/main.rs
mod backup;
mod catalog;
mod cli;
mod config;
mod engine;
mod errors;
mod notify;
mod recovery;
mod restore;
mod retention;
mod scheduler;
mod utils;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use backup::record::{Tier, is_backup_name};
use backup::{BackupCreator, BackupScope};
use catalog::BackupCatalog;
use cli::{Cli, Commands};
use config::AppConfig;
use recovery::DisasterRecoveryOrchestrator;
use restore::RestoreExecutor;
use retention::RetentionManager;
use scheduler::Scheduler;
use utils::format_size;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    utils::setup_logging(cli.verbose);

    match run_app(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::load_from_json(&cli.config)
        .context(format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::debug!("Using backup directory {}", config.backup_dir.display());

    match cli.command {
        Commands::Create { scope, backup_type } => create(&config, scope, backup_type).await,
        Commands::List { backup_type } => list(&config, backup_type),
        Commands::Restore {
            backup_path,
            force,
            skip_checksum,
        } => restore(&config, backup_path, force, skip_checksum).await,
        Commands::Verify { backup_path } => verify(&config, backup_path),
        Commands::Cleanup { force } => cleanup(&config, force).await,
        Commands::Status => status(&config),
        Commands::SyncOffsite => sync_offsite(&config).await,
        Commands::TestDr {
            backup_path,
            show_plan,
        } => test_dr(&config, backup_path, show_plan).await,
        Commands::Tick { at } => tick(&config, at.unwrap_or_else(Utc::now)).await,
    }
}

async fn create(config: &AppConfig, scope: BackupScope, tier: Tier) -> Result<()> {
    let creator = BackupCreator::from_config(config).context("Failed to prepare backup")?;

    if matches!(scope, BackupScope::Database | BackupScope::All) {
        let record = creator.create(tier).await.context("Database backup failed")?;
        println!("✅ Database backup created: {}", record.local_path.display());
        println!(
            "   {} -> {} ({:.2}% saved), sha256 {}",
            format_size(record.original_size),
            format_size(record.compressed_size),
            record.compression_ratio,
            record.checksum
        );
        if let Some(offsite) = &record.offsite_path {
            println!("   offsite copy: {}", offsite);
        }
    }

    let wants_application = match scope {
        BackupScope::Application => true,
        BackupScope::All if creator.has_application_export() => true,
        BackupScope::All => {
            tracing::warn!("No application export sources configured, skipping application backup");
            false
        }
        BackupScope::Database => false,
    };
    if wants_application {
        let record = creator
            .create_application(tier)
            .await
            .context("Application backup failed")?;
        println!("✅ Application backup created: {}", record.local_path.display());
    }
    Ok(())
}

fn list(config: &AppConfig, tier: Option<Tier>) -> Result<()> {
    let records = BackupCatalog::new(&config.backup_dir)
        .list(tier)
        .context("Failed to read backup catalog")?;
    if records.is_empty() {
        println!("No backups found in {}", config.backup_dir.display());
        return Ok(());
    }

    println!(
        "{:<44} {:<8} {:<12} {:<20} {:>10}  {}",
        "NAME", "TIER", "TYPE", "CREATED (UTC)", "SIZE", "OFFSITE"
    );
    for record in &records {
        println!(
            "{:<44} {:<8} {:<12} {:<20} {:>10}  {}",
            record.name,
            record.tier,
            record.database_type,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_size(record.compressed_size),
            record.offsite_path.as_deref().unwrap_or("-")
        );
    }
    println!("{} backup(s)", records.len());
    Ok(())
}

async fn restore(config: &AppConfig, backup_path: Option<PathBuf>, force: bool, skip_checksum: bool) -> Result<()> {
    config.require_database()?;
    let path = match backup_path {
        Some(path) => resolve_backup_path(config, path)?,
        None => latest_database_backup(config)?,
    };
    let executor = RestoreExecutor::from_config(config)?;

    println!("🔄 Restore source: {}", path.display());
    println!("   Restore target: {}", executor.target_description());
    if skip_checksum {
        println!("   ⚠️ Checksum verification is disabled");
    }
    if !force && !confirm("This replaces the live database. Continue?")? {
        println!("Restore cancelled.");
        return Ok(());
    }

    let summary = executor
        .restore(&path, !skip_checksum)
        .await
        .context(format!("Restore from {} failed", path.display()))?;
    println!("✅ Restored {} in {:.1}s", summary.backup_name, summary.duration_secs);
    if let Some(copy) = &summary.safety_copy {
        println!("   Previous database saved to {}", copy.display());
    }
    Ok(())
}

fn latest_database_backup(config: &AppConfig) -> Result<PathBuf> {
    BackupCatalog::new(&config.backup_dir)
        .latest_restorable()?
        .map(|r| r.local_path)
        .context("No database backups found; pass --backup-path")
}

/// `--backup-path` accepts a file path or a bare backup name from `list`.
fn resolve_backup_path(config: &AppConfig, arg: PathBuf) -> Result<PathBuf> {
    if arg.exists() {
        return Ok(arg);
    }
    let name = arg.to_string_lossy();
    if is_backup_name(&name) {
        if let Some(record) = BackupCatalog::new(&config.backup_dir).find(&name)? {
            return Ok(record.local_path);
        }
    }
    Ok(arg)
}

fn verify(config: &AppConfig, backup_path: Option<PathBuf>) -> Result<()> {
    let catalog = BackupCatalog::new(&config.backup_dir);
    let paths: Vec<PathBuf> = match backup_path {
        Some(path) => vec![resolve_backup_path(config, path)?],
        None => catalog.list(None)?.into_iter().map(|r| r.local_path).collect(),
    };
    if paths.is_empty() {
        println!("No backups to verify.");
        return Ok(());
    }

    let mut failed = 0;
    for path in &paths {
        let report = catalog.verify_integrity(path);
        if report.is_valid() {
            println!(
                "✓ {} ({}, ~{} min to restore)",
                display_name(path),
                format_size(report.size_bytes),
                report.estimated_restore_minutes
            );
        } else {
            failed += 1;
            println!("✗ {}", display_name(path));
            for error in &report.errors {
                println!("    {}", error);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} backup(s) failed verification", failed, paths.len());
    }
    println!("All {} backup(s) verified.", paths.len());
    Ok(())
}

async fn cleanup(config: &AppConfig, force: bool) -> Result<()> {
    let manager = RetentionManager::from_config(config);
    let now = Utc::now();
    let expired = manager.expired(now).context("Failed to read backup catalog")?;
    if expired.is_empty() {
        println!("Nothing to clean up.");
        return Ok(());
    }

    println!("The following {} backup(s) are past retention:", expired.len());
    for record in &expired {
        println!(
            "  {} ({}, created {})",
            record.local_path.display(),
            record.tier,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if !force && !confirm("Delete them?")? {
        println!("Cleanup cancelled.");
        return Ok(());
    }

    let report = manager.cleanup(now).await?;
    println!("🗑️ Removed {} backup(s)", report.total_removed());
    for failure in &report.failures {
        println!("  ✗ {}: {}", failure.backup_name, failure.error);
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} backup(s) could not be removed", report.failures.len());
    }
    Ok(())
}

async fn sync_offsite(config: &AppConfig) -> Result<()> {
    let creator = BackupCreator::from_config(config).context("Failed to prepare offsite sync")?;
    let report = creator
        .sync_pending_offsite()
        .await
        .context("Offsite sync failed")?;

    if report.uploaded.is_empty() && report.failed.is_empty() {
        println!("Every backup already has an offsite copy.");
        return Ok(());
    }
    for name in &report.uploaded {
        println!("  ☁️ {}", name);
    }
    for (name, error) in &report.failed {
        println!("  ✗ {}: {}", name, error);
    }
    println!("Uploaded {} backup(s)", report.uploaded.len());
    if !report.is_clean() {
        anyhow::bail!("{} backup(s) are still local only", report.failed.len());
    }
    Ok(())
}

fn status(config: &AppConfig) -> Result<()> {
    let status = BackupCatalog::new(&config.backup_dir)
        .status()
        .context("Failed to read backup catalog")?;

    println!("📦 Backup status ({})", config.environment);
    println!("   Directory:     {}", config.backup_dir.display());
    println!("   Total backups: {}", status.total_backups);
    println!("   Total size:    {}", format_size(status.total_size));
    for (tier, count) in &status.counts_by_tier {
        println!("   {:<14} {}", format!("{}:", tier), count);
    }
    if let Some(latest) = &status.latest {
        println!("   Latest:        {} ({})", latest.name, latest.created_at.to_rfc3339());
    }
    if let Some(oldest) = &status.oldest {
        println!("   Oldest:        {} ({})", oldest.name, oldest.created_at.to_rfc3339());
    }
    Ok(())
}

async fn test_dr(config: &AppConfig, backup_path: Option<PathBuf>, show_plan: bool) -> Result<()> {
    let orchestrator = DisasterRecoveryOrchestrator::from_config(config);

    if show_plan {
        let plan = orchestrator.build_plan();
        println!(
            "📋 Recovery plan for {} (RTO {} min, RPO {} min)",
            plan.environment, plan.rto_minutes, plan.rpo_minutes
        );
        for step in &plan.steps {
            println!(
                "  {}. [{}] {} (~{} min, {})",
                step.step,
                if step.automated { "auto" } else { "manual" },
                step.action,
                step.estimated_minutes,
                step.responsible
            );
        }
        println!("  Estimated total: {} min", plan.total_estimated_minutes());
        println!();
    }

    let backup_path = backup_path
        .map(|path| resolve_backup_path(config, path))
        .transpose()?;
    let result = orchestrator.run_rehearsal(backup_path.as_deref()).await;
    println!("🧪 Rehearsal {}", result.test_id);
    for step in &result.steps {
        println!(
            "  {} {:<24} {:>6.2}s  {}",
            if step.success { "✓" } else { "✗" },
            step.name,
            step.duration_secs,
            step.message
        );
    }
    println!(
        "  {} completed, {} failed, {:.2}s total",
        result.steps_completed, result.steps_failed, result.total_duration_secs
    );

    if !result.success {
        anyhow::bail!("Disaster-recovery rehearsal failed");
    }
    Ok(())
}

async fn tick(config: &AppConfig, at: chrono::DateTime<Utc>) -> Result<()> {
    let scheduler = Scheduler::from_config(config).context("Failed to prepare scheduler")?;
    let report = scheduler.run_due(at).await;

    for action in &report.actions {
        println!(
            "{} {}: {}",
            if action.success { "✓" } else { "✗" },
            action.action,
            action.message
        );
    }
    if report.has_failures() {
        anyhow::bail!("{} scheduled action(s) failed", report.failures().count());
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Asks on stdin; only `y`/`yes` count as consent.
fn confirm(question: &str) -> Result<bool> {
    use std::io::{Write, stdin, stdout};

    print!("{} [y/N]: ", question);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
