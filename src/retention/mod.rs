//! Tiered retention cleanup.

use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;

use crate::backup::offsite::OffsiteStore;
use crate::backup::record::{BackupRecord, Tier};
use crate::catalog::BackupCatalog;
use crate::config::AppConfig;
use crate::errors::Result;

/// Maximum age per tier. Manual and test backups have no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub hourly_hours: u32,
    pub daily_days: u32,
    pub weekly_weeks: u32,
    pub monthly_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            hourly_hours: 48,
            daily_days: 30,
            weekly_weeks: 12,
            monthly_months: 12,
        }
    }
}

impl RetentionPolicy {
    /// Backups of `tier` created before the returned instant are expired.
    pub fn cutoff(&self, tier: Tier, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match tier {
            Tier::Hourly => now.checked_sub_signed(Duration::hours(self.hourly_hours.into())),
            Tier::Daily => now.checked_sub_signed(Duration::days(self.daily_days.into())),
            Tier::Weekly => now.checked_sub_signed(Duration::weeks(self.weekly_weeks.into())),
            Tier::Monthly => now.checked_sub_months(Months::new(self.monthly_months)),
            Tier::Manual | Tier::Test => None,
        }
    }

    pub fn is_expired(&self, record: &BackupRecord, now: DateTime<Utc>) -> bool {
        self.cutoff(record.tier, now)
            .is_some_and(|cutoff| record.created_at < cutoff)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionFailure {
    pub backup_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub removed: BTreeMap<Tier, usize>,
    pub failures: Vec<RetentionFailure>,
}

impl RetentionReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

pub struct RetentionManager {
    catalog: BackupCatalog,
    policy: RetentionPolicy,
    offsite: Option<OffsiteStore>,
}

impl RetentionManager {
    pub fn new(catalog: BackupCatalog, policy: RetentionPolicy, offsite: Option<OffsiteStore>) -> Self {
        Self {
            catalog,
            policy,
            offsite,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            BackupCatalog::new(&config.backup_dir),
            config.retention,
            config.offsite.clone().map(OffsiteStore::new),
        )
    }

    /// What `cleanup(now)` would remove, oldest first.
    pub fn expired(&self, now: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let mut expired: Vec<BackupRecord> = self
            .catalog
            .list(None)?
            .into_iter()
            .filter(|r| self.policy.is_expired(r, now))
            .collect();
        expired.reverse();
        Ok(expired)
    }

    /// Deletes every expired backup. A failure on one record is reported and
    /// does not stop the others.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();

        for record in self.expired(now)? {
            match remove_local(&record) {
                Ok(()) => {
                    tracing::info!("🗑️ Removed expired {} backup {}", record.tier, record.name);
                    *report.removed.entry(record.tier).or_insert(0) += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to remove expired backup {}: {}", record.name, e);
                    report.failures.push(RetentionFailure {
                        backup_name: record.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            if let Some(offsite) = &self.offsite
                && let Err(e) = offsite.delete(&record.artifact_file_name()).await
            {
                tracing::warn!("⚠️ Offsite copy of {} not removed: {}", record.name, e);
            }
        }

        tracing::info!(
            "Retention cleanup removed {} backups ({} failures)",
            report.total_removed(),
            report.failures.len()
        );
        Ok(report)
    }
}

/// Sidecar goes first so a half-deleted pair drops out of the catalog.
fn remove_local(record: &BackupRecord) -> io::Result<()> {
    remove_if_present(&record.sidecar_path())?;
    remove_if_present(&record.local_path)
}

fn remove_if_present(path: &std::path::Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
