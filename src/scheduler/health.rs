// inventory-backup/src/scheduler/health.rs
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::catalog::BackupCatalog;
use crate::config::ScheduleConfig;
use crate::notify::Severity;
use crate::recovery::DisasterRecoveryOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_issue_count(issues: usize) -> Self {
        match issues {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            HealthStatus::Healthy => Severity::Ok,
            HealthStatus::Warning => Severity::Warning,
            HealthStatus::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub total_backups: usize,
    pub latest_backup_age_hours: Option<f64>,
    pub verified: usize,
    pub rehearsal_passed: Option<bool>,
}

/// Aggregates every problem it finds instead of stopping at the first one.
pub async fn check(
    catalog: &BackupCatalog,
    orchestrator: &DisasterRecoveryOrchestrator,
    schedule: &ScheduleConfig,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut issues = Vec::new();

    let records = match catalog.list(None) {
        Ok(records) => records,
        Err(e) => {
            issues.push(format!("catalog could not be read: {}", e));
            Vec::new()
        }
    };
    if records.is_empty() {
        issues.push("no backups present".to_string());
    }

    let latest_backup_age_hours = records.first().map(|latest| {
        let age = now - latest.created_at;
        if age > Duration::hours(schedule.stale_after_hours) {
            issues.push(format!(
                "latest backup {} is {} hours old (threshold {}h)",
                latest.name,
                age.num_hours(),
                schedule.stale_after_hours
            ));
        }
        age.num_minutes() as f64 / 60.0
    });

    let mut verified = 0;
    for record in records.iter().take(schedule.verify_recent) {
        let report = catalog.verify_integrity(&record.local_path);
        if report.is_valid() {
            verified += 1;
        } else {
            issues.push(format!(
                "backup {} failed integrity check: {}",
                record.name,
                report.errors.join("; ")
            ));
        }
    }

    let rehearsal_passed = if schedule.rehearse_in_health_check {
        let result = orchestrator.run_rehearsal(None).await;
        if !result.success {
            let failed: Vec<&str> = result
                .steps
                .iter()
                .filter(|s| !s.success)
                .map(|s| s.name.as_str())
                .collect();
            issues.push(format!("recovery rehearsal failed at: {}", failed.join(", ")));
        }
        Some(result.success)
    } else {
        None
    };

    let status = HealthStatus::from_issue_count(issues.len());
    match status {
        HealthStatus::Healthy => tracing::info!("💚 Backup health: healthy ({} backups)", records.len()),
        _ => tracing::warn!("Backup health: {:?} with {} issue(s)", status, issues.len()),
    }

    HealthReport {
        status,
        issues,
        total_backups: records.len(),
        latest_backup_age_hours,
        verified,
        rehearsal_passed,
    }
}
