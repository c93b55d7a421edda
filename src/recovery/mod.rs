//! Disaster-recovery plan and rehearsals.
//!
//! A rehearsal never touches the live database. It restores the artifact into
//! a scratch directory, checks the inflated payload against the sidecar size
//! and the producing engine's signature, and projects the full recovery time
//! against the RTO. For server engines that proves the dump is complete and
//! well formed, not that the target server would accept it.

pub(crate) mod plan;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

use crate::backup::archive;
use crate::backup::record::{DatabaseType, read_metadata, sidecar_path_for};
use crate::catalog::BackupCatalog;
use crate::config::{AppConfig, RecoveryConfig};
use crate::engine::check_dump_signature;
use crate::errors::{BackupError, Result};
pub use plan::{RecoveryPlan, RecoveryStep};

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub name: String,
    pub success: bool,
    pub duration_secs: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryTestResult {
    pub test_id: Uuid,
    pub backup_path: Option<PathBuf>,
    pub test_started_at: DateTime<Utc>,
    pub test_completed_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub total_duration_secs: f64,
    pub success: bool,
}

impl RecoveryTestResult {
    #[cfg(test)]
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }
}

pub struct DisasterRecoveryOrchestrator {
    catalog: BackupCatalog,
    recovery: RecoveryConfig,
    environment: String,
}

impl DisasterRecoveryOrchestrator {
    pub fn new(catalog: BackupCatalog, recovery: RecoveryConfig, environment: impl Into<String>) -> Self {
        Self {
            catalog,
            recovery,
            environment: environment.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            BackupCatalog::new(&config.backup_dir),
            config.recovery.clone(),
            config.environment.clone(),
        )
    }

    pub fn build_plan(&self) -> RecoveryPlan {
        RecoveryPlan::build(&self.recovery, &self.environment)
    }

    /// Best-effort rehearsal: every step runs even when an earlier one failed.
    pub async fn run_rehearsal(&self, backup_path: Option<&Path>) -> RecoveryTestResult {
        let test_id = Uuid::new_v4();
        let test_started_at = Utc::now();
        let started = Instant::now();
        let mut steps = Vec::new();
        tracing::info!("🧪 Starting disaster-recovery rehearsal {}", test_id);

        let target = match backup_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let (selected, step) = timed("backup_selection", || self.select_latest());
                steps.push(step);
                selected
            }
        };

        let mut restore_minutes = None;
        let (_, step) = timed("backup_verification", || {
            let path = target.as_deref().ok_or_else(no_backup)?;
            let report = self.catalog.verify_integrity(path);
            restore_minutes = Some(report.estimated_restore_minutes);
            if report.is_valid() {
                Ok(((), format!("{} verified ({} bytes)", path.display(), report.size_bytes)))
            } else {
                Err(BackupError::integrity(report.errors.join("; ")))
            }
        });
        steps.push(step);

        let rehearsal_target = target.clone();
        let step = match tokio::task::spawn_blocking(move || {
            timed("restore_rehearsal", || {
                let path = rehearsal_target.as_deref().ok_or_else(no_backup)?;
                rehearse_restore(path).map(|msg| ((), msg))
            })
            .1
        })
        .await
        {
            Ok(step) => step,
            Err(e) => StepResult {
                name: "restore_rehearsal".to_string(),
                success: false,
                duration_secs: 0.0,
                message: format!("rehearsal task failed: {}", e),
            },
        };
        steps.push(step);

        let (_, step) = timed("recovery_time_objective", || {
            let minutes = restore_minutes
                .filter(|m| *m > 0)
                .ok_or_else(|| BackupError::restore("no restore estimate available"))?;
            let plan = self.build_plan();
            let projected = plan.estimate_with_restore(u32::try_from(minutes).unwrap_or(u32::MAX));
            if projected <= plan.rto_minutes {
                Ok(((), format!("projected {} min within RTO of {} min", projected, plan.rto_minutes)))
            } else {
                Err(BackupError::restore(format!(
                    "projected {} min exceeds RTO of {} min",
                    projected, plan.rto_minutes
                )))
            }
        });
        steps.push(step);

        let steps_completed = steps.iter().filter(|s| s.success).count();
        let steps_failed = steps.len() - steps_completed;
        let result = RecoveryTestResult {
            test_id,
            backup_path: target,
            test_started_at,
            test_completed_at: Utc::now(),
            steps_completed,
            steps_failed,
            total_duration_secs: started.elapsed().as_secs_f64(),
            success: steps_failed == 0,
            steps,
        };

        if result.success {
            tracing::info!("✅ Rehearsal {} passed all {} steps", test_id, steps_completed);
        } else {
            tracing::warn!(
                "⚠️ Rehearsal {} finished with {} failed step(s)",
                test_id,
                steps_failed
            );
        }
        match serde_json::to_string(&result) {
            Ok(json) => tracing::info!(target: "recovery", "{}", json),
            Err(e) => tracing::debug!("Could not serialize rehearsal result: {}", e),
        }
        result
    }

    fn select_latest(&self) -> Result<(PathBuf, String)> {
        let record = self
            .catalog
            .latest_restorable()?
            .ok_or_else(|| BackupError::restore("no database backups in the catalog"))?;
        let message = format!("selected {} ({})", record.name, record.created_at.to_rfc3339());
        Ok((record.local_path, message))
    }
}

fn no_backup() -> BackupError {
    BackupError::restore("no backup selected")
}

/// Runs one rehearsal step, turning its outcome into a [`StepResult`].
fn timed<T>(name: &str, step: impl FnOnce() -> Result<(T, String)>) -> (Option<T>, StepResult) {
    let started = Instant::now();
    let outcome = step();
    let duration_secs = started.elapsed().as_secs_f64();
    match outcome {
        Ok((value, message)) => {
            tracing::info!("  ✓ {}: {}", name, message);
            (
                Some(value),
                StepResult {
                    name: name.to_string(),
                    success: true,
                    duration_secs,
                    message,
                },
            )
        }
        Err(e) => {
            tracing::warn!("  ✗ {}: {}", name, e);
            (
                None,
                StepResult {
                    name: name.to_string(),
                    success: false,
                    duration_secs,
                    message: e.to_string(),
                },
            )
        }
    }
}

/// Inflates the artifact into a scratch directory and checks what comes out.
fn rehearse_restore(artifact: &Path) -> Result<String> {
    let metadata = read_metadata(&sidecar_path_for(artifact))
        .map_err(|e| BackupError::restore(format!("sidecar unavailable: {}", e)))?;
    let scratch = tempfile::tempdir()?;
    let payload = scratch.path().join(format!(
        "{}.{}",
        metadata.backup_name,
        metadata.database_type.extension()
    ));

    let size = archive::decompress_file(artifact, &payload)?;
    if metadata.database_type == DatabaseType::Application {
        return check_application_export(&payload).map(|entries| {
            format!("application export with {} entries unpacked in scratch space", entries)
        });
    }

    if size != metadata.original_size {
        return Err(BackupError::restore(format!(
            "payload is {} bytes, sidecar records {}",
            size, metadata.original_size
        )));
    }
    check_dump_signature(metadata.database_type, &payload)?;
    Ok(format!(
        "{} dump of {} bytes restored into scratch space and validated",
        metadata.database_type, size
    ))
}

fn check_application_export(tar_path: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(File::open(tar_path)?);
    let mut entries = 0;
    let mut has_manifest = false;
    for entry in archive.entries()? {
        let entry = entry?;
        entries += 1;
        if entry.path()?.file_name().is_some_and(|n| n == "manifest.json") {
            has_manifest = true;
        }
    }
    if !has_manifest {
        return Err(BackupError::restore("application export has no manifest.json"));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::application::ExportedRecordSet;
    use crate::backup::application::tests::StaticExporter;
    use crate::backup::record::Tier;
    use crate::backup::tests::Sandbox;
    use serde_json::json;
    use std::fs;

    #[tokio::test]
    async fn test_rehearsal_of_latest_backup_passes() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        sandbox.creator()?.create(Tier::Daily).await?;
        let live_before = fs::read(sandbox.live_db())?;

        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(None)
            .await;

        assert!(result.success, "{:?}", result.steps);
        let names: Vec<_> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "backup_selection",
                "backup_verification",
                "restore_rehearsal",
                "recovery_time_objective"
            ]
        );
        assert_eq!(result.steps_completed, 4);
        assert_eq!(fs::read(sandbox.live_db())?, live_before);
        Ok(())
    }

    #[tokio::test]
    async fn test_rehearsal_with_deleted_artifact_is_partial() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let record = sandbox.creator()?.create(Tier::Manual).await?;
        fs::remove_file(&record.local_path)?;

        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(Some(&record.local_path))
            .await;

        assert!(!result.success);
        assert!(result.step("backup_selection").is_none());
        assert!(!result.step("backup_verification").map(|s| s.success).unwrap_or(true));
        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.steps_completed + result.steps_failed, 3);
        assert!(result.test_completed_at >= result.test_started_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_rehearsal_on_empty_catalog_still_completes() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(None)
            .await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 4);
        assert_eq!(result.steps_failed, 4);
        assert!(result.backup_path.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_payload_fails_restore_rehearsal_only() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let record = sandbox.creator()?.create(Tier::Manual).await?;
        // Sidecar promises more bytes than the artifact holds.
        let sidecar = record.sidecar_path();
        let mut metadata = read_metadata(&sidecar)?;
        metadata.original_size += 1;
        crate::backup::record::write_metadata(sandbox.config.backup_dir.as_path(), &metadata)?;

        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(Some(&record.local_path))
            .await;

        assert!(result.step("backup_verification").is_some_and(|s| s.success));
        assert!(result.step("restore_rehearsal").is_some_and(|s| !s.success));
        assert!(result.step("recovery_time_objective").is_some_and(|s| s.success));
        assert_eq!(result.steps_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rto_too_tight_fails_objective() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        sandbox.config.recovery.rto_minutes = 30;
        let record = sandbox.creator()?.create(Tier::Manual).await?;

        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(Some(&record.local_path))
            .await;
        assert!(result.step("restore_rehearsal").is_some_and(|s| s.success));
        assert!(result.step("recovery_time_objective").is_some_and(|s| !s.success));
        Ok(())
    }

    #[tokio::test]
    async fn test_application_export_rehearsal() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let creator = sandbox.creator()?.with_exporter(Box::new(StaticExporter(vec![
            ExportedRecordSet {
                name: "custom_fields".to_string(),
                records: json!([{"key": "bin_location"}]),
            },
        ])));
        let record = creator.create_application(Tier::Manual).await?;

        let result = DisasterRecoveryOrchestrator::from_config(&sandbox.config)
            .run_rehearsal(Some(&record.local_path))
            .await;
        assert!(result.step("restore_rehearsal").is_some_and(|s| s.success), "{:?}", result.steps);
        Ok(())
    }
}
