//! Tick-driven scheduler.
//!
//! An external trigger (cron, systemd timer) calls `run_due` once a minute.
//! Whether anything is due is a pure function of the tick time and the
//! schedule, so ticks can be replayed and tested without a clock.

pub(crate) mod health;
pub(crate) mod lock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::BackupCreator;
use crate::backup::record::Tier;
use crate::catalog::BackupCatalog;
use crate::config::{AppConfig, ScheduleConfig};
use crate::errors::{BackupError, Result};
use crate::notify::{Notification, Notifier, Severity};
use crate::recovery::DisasterRecoveryOrchestrator;
use crate::retention::RetentionManager;
pub use health::{HealthReport, HealthStatus};
use lock::{TICK_LOCK_FILE, TickLock};

const STALE_TICK_LOCK: Duration = Duration::from_secs(6 * 3600);

fn at_time(now: DateTime<Utc>, hour: u32, minute: u32) -> bool {
    now.hour() == hour && now.minute() == minute
}

pub fn should_run_hourly(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.hourly_enabled && schedule.hourly_minutes.contains(&now.minute())
}

pub fn should_run_daily(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.daily_enabled && at_time(now, schedule.daily_hour, 0)
}

pub fn should_run_weekly(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.weekly_enabled
        && now.weekday() == schedule.weekly_weekday
        && at_time(now, schedule.weekly_hour, 0)
}

pub fn should_run_monthly(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.monthly_enabled && now.day() == schedule.monthly_day && at_time(now, schedule.monthly_hour, 0)
}

pub fn should_run_cleanup(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.cleanup_enabled && at_time(now, schedule.cleanup_hour, schedule.cleanup_minute)
}

pub fn should_run_health_check(schedule: &ScheduleConfig, now: DateTime<Utc>) -> bool {
    schedule.health_check_enabled && at_time(now, schedule.health_check_hour, schedule.health_check_minute)
}

/// The single backup tier a tick should take, highest priority first.
pub fn due_tier(schedule: &ScheduleConfig, now: DateTime<Utc>) -> Option<Tier> {
    if should_run_monthly(schedule, now) {
        Some(Tier::Monthly)
    } else if should_run_weekly(schedule, now) {
        Some(Tier::Weekly)
    } else if should_run_daily(schedule, now) {
        Some(Tier::Daily)
    } else if should_run_hourly(schedule, now) {
        Some(Tier::Hourly)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "tier")]
pub enum TickPhase {
    Idle,
    EvaluateDue,
    Running(Tier),
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_at: DateTime<Utc>,
    pub phases: Vec<TickPhase>,
    pub actions: Vec<ActionOutcome>,
    pub health: Option<HealthReport>,
}

impl TickReport {
    fn new(tick_at: DateTime<Utc>) -> Self {
        Self {
            tick_at,
            phases: vec![TickPhase::Idle],
            actions: Vec::new(),
            health: None,
        }
    }

    fn enter(&mut self, phase: TickPhase) {
        tracing::debug!("Tick {} -> {:?}", self.tick_at.to_rfc3339(), phase);
        self.phases.push(phase);
    }

    fn record(&mut self, action: impl Into<String>, outcome: std::result::Result<String, String>) {
        let (success, message) = match outcome {
            Ok(message) => (true, message),
            Err(message) => (false, message),
        };
        self.actions.push(ActionOutcome {
            action: action.into(),
            success,
            message,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.actions.iter().filter(|a| !a.success)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

pub struct Scheduler {
    schedule: ScheduleConfig,
    environment: String,
    creator: BackupCreator,
    retention: RetentionManager,
    catalog: BackupCatalog,
    orchestrator: DisasterRecoveryOrchestrator,
    notifier: Notifier,
    lock_path: PathBuf,
}

impl Scheduler {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            schedule: config.schedule.clone(),
            environment: config.environment.clone(),
            creator: BackupCreator::from_config(config)?,
            retention: RetentionManager::from_config(config),
            catalog: BackupCatalog::new(&config.backup_dir),
            orchestrator: DisasterRecoveryOrchestrator::from_config(config),
            notifier: Notifier::new(config.notifications.clone())?,
            lock_path: config.backup_dir.join(TICK_LOCK_FILE),
        })
    }

    /// Runs whatever is due at `now`. Never fails: every error is recorded in
    /// the report and reported to the operators.
    pub async fn run_due(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(now);
        report.enter(TickPhase::EvaluateDue);

        let tier = due_tier(&self.schedule, now);
        let cleanup_due = should_run_cleanup(&self.schedule, now);
        let health_due = should_run_health_check(&self.schedule, now);
        if tier.is_none() && !cleanup_due && !health_due {
            tracing::debug!("Nothing due at {}", now.to_rfc3339());
            report.enter(TickPhase::Idle);
            return report;
        }

        // Overlapping ticks would race on backup names and retention deletes.
        let _lock = match TickLock::acquire(&self.lock_path, STALE_TICK_LOCK) {
            Ok(lock) => lock,
            Err(e) => {
                self.record_failure(&mut report, "tick".to_string(), &e).await;
                report.enter(TickPhase::Idle);
                return report;
            }
        };

        if let Some(tier) = tier {
            report.enter(TickPhase::Running(tier));
            if self.creator.has_offsite() {
                self.run_offsite_catch_up(now, &mut report).await;
            }
            self.run_backup(tier, now, &mut report).await;
        } else {
            tracing::debug!("No backup tier due at {}", now.to_rfc3339());
        }

        if cleanup_due {
            self.run_cleanup(now, &mut report).await;
        }

        if health_due {
            self.run_health_check(now, &mut report).await;
        }

        report.enter(TickPhase::Idle);
        report
    }

    async fn run_backup(&self, tier: Tier, now: DateTime<Utc>, report: &mut TickReport) {
        let action = format!("backup:{}", tier);
        match self.creator.create_at(tier, now).await {
            Ok(record) => report.record(action, Ok(format!("created {}", record.name))),
            Err(e) => self.record_failure(report, action, &e).await,
        }

        if self.schedule.include_application && self.creator.has_application_export() {
            let action = format!("application_backup:{}", tier);
            match self.creator.create_application_at(tier, now).await {
                Ok(record) => report.record(action, Ok(format!("created {}", record.name))),
                Err(e) => self.record_failure(report, action, &e).await,
            }
        }
    }

    /// Uploads earlier backups whose offsite copy failed. The backup about to
    /// be taken uploads itself.
    async fn run_offsite_catch_up(&self, now: DateTime<Utc>, report: &mut TickReport) {
        match self.creator.sync_pending_offsite().await {
            Ok(sync) => {
                if !sync.is_clean() {
                    let mut notification = Notification::new(
                        "Backups are still missing their offsite copy",
                        Severity::Warning,
                        &self.environment,
                    )
                    .at(now);
                    for (name, error) in &sync.failed {
                        notification = notification.detail(name.clone(), error.clone());
                    }
                    self.notifier.send(&notification).await;
                }
                report.record(
                    "offsite_sync",
                    Ok(format!(
                        "uploaded {} pending backups, {} still local only",
                        sync.uploaded.len(),
                        sync.failed.len()
                    )),
                );
            }
            Err(e) => self.record_failure(report, "offsite_sync".to_string(), &e).await,
        }
    }

    async fn run_cleanup(&self, now: DateTime<Utc>, report: &mut TickReport) {
        match self.retention.cleanup(now).await {
            Ok(outcome) => {
                if !outcome.failures.is_empty() {
                    let mut notification = Notification::new(
                        "Retention cleanup left expired backups behind",
                        Severity::Warning,
                        &self.environment,
                    )
                    .at(now);
                    for failure in &outcome.failures {
                        notification = notification.detail(failure.backup_name.clone(), failure.error.clone());
                    }
                    self.notifier.send(&notification).await;
                }
                report.record(
                    "cleanup",
                    Ok(format!(
                        "removed {} expired backups, {} failures",
                        outcome.total_removed(),
                        outcome.failures.len()
                    )),
                );
            }
            Err(e) => self.record_failure(report, "cleanup".to_string(), &e).await,
        }
    }

    async fn run_health_check(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let health = health::check(&self.catalog, &self.orchestrator, &self.schedule, now).await;
        if health.status != HealthStatus::Healthy {
            let notification = Notification::new(
                format!("Backup health is {:?}", health.status).to_lowercase(),
                health.status.severity(),
                &self.environment,
            )
            .at(now)
            .detail("issues", health.issues.clone())
            .detail("total_backups", health.total_backups);
            self.notifier.send(&notification).await;
        }
        report.record(
            "health_check",
            Ok(format!("{:?} with {} issue(s)", health.status, health.issues.len())),
        );
        report.health = Some(health);
    }

    async fn record_failure(&self, report: &mut TickReport, action: String, error: &BackupError) {
        tracing::error!("❌ Scheduled {} failed: {}", action, error);
        let notification = Notification::new(
            format!("Scheduled {} failed", action),
            Severity::Critical,
            &self.environment,
        )
        .at(report.tick_at)
        .detail("error_kind", error.kind())
        .detail("error", error.to_string());
        self.notifier.send(&notification).await;
        report.record(action, Err(error.to_string()));
    }
}
