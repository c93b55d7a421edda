//! Backup catalog, always rebuilt from what is on disk.

pub(crate) mod verification;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::record::{
    BackupRecord, DatabaseType, Tier, backup_name_from_path, is_backup_name, read_metadata,
};
use crate::errors::Result;
pub use verification::IntegrityReport;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatus {
    pub total_backups: usize,
    pub total_size: u64,
    pub counts_by_tier: BTreeMap<Tier, usize>,
    pub latest: Option<BackupRecord>,
    pub oldest: Option<BackupRecord>,
}

#[derive(Debug, Clone)]
pub struct BackupCatalog {
    backup_dir: PathBuf,
}

impl BackupCatalog {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// Every artifact with a valid sidecar, newest first, optionally limited to one tier.
    pub fn list(&self, tier: Option<Tier>) -> Result<Vec<BackupRecord>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts: HashMap<String, PathBuf> = HashMap::new();
        let mut sidecars = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = backup_name_from_path(&path).filter(|n| is_backup_name(n)) else {
                continue;
            };
            if file_name.ends_with(".gz") {
                artifacts.insert(name, path);
            } else if file_name.ends_with(".json") {
                sidecars.push(path);
            }
        }

        let mut records = Vec::new();
        for sidecar in sidecars {
            let metadata = match read_metadata(&sidecar) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("Skipping unreadable sidecar {}: {}", sidecar.display(), e);
                    continue;
                }
            };
            if tier.is_some_and(|t| t != metadata.backup_type) {
                continue;
            }
            match artifacts.remove(&metadata.backup_name) {
                Some(local_path) => records.push(BackupRecord::from_metadata(metadata, local_path)),
                None => tracing::warn!(
                    "Sidecar {} has no matching artifact, ignoring it",
                    sidecar.display()
                ),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
        Ok(records)
    }

    /// Newest backup a database restore can use; application exports are skipped.
    pub fn latest_restorable(&self) -> Result<Option<BackupRecord>> {
        Ok(self
            .list(None)?
            .into_iter()
            .find(|r| r.database_type != DatabaseType::Application))
    }

    pub fn find(&self, name: &str) -> Result<Option<BackupRecord>> {
        Ok(self.list(None)?.into_iter().find(|r| r.name == name))
    }

    pub fn verify_integrity(&self, path: &Path) -> IntegrityReport {
        let report = verification::verify_artifact(path);
        if report.is_valid() {
            tracing::info!("✓ {} passed integrity verification", path.display());
        } else {
            tracing::warn!(
                "✗ {} failed integrity verification: {}",
                path.display(),
                report.errors.join("; ")
            );
        }
        report
    }

    pub fn status(&self) -> Result<CatalogStatus> {
        let records = self.list(None)?;
        let mut counts_by_tier = BTreeMap::new();
        for record in &records {
            *counts_by_tier.entry(record.tier).or_insert(0) += 1;
        }

        Ok(CatalogStatus {
            total_backups: records.len(),
            total_size: records.iter().map(|r| r.compressed_size).sum(),
            counts_by_tier,
            latest: records.first().cloned(),
            oldest: records.last().cloned(),
        })
    }
}
