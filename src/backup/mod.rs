pub(crate) mod application;
pub(crate) mod archive;
pub(crate) mod offsite;
pub(crate) mod record;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::Builder as TempFileBuilder;

use crate::catalog::BackupCatalog;
use crate::config::{AppConfig, ApplicationExportConfig};
use crate::engine::{DatabaseEngine, DumpStrategy};
use crate::errors::{BackupError, Result};
use crate::utils::setting::ensure_source_reachable;
use application::{JsonFileExporter, RecordExporter};
use offsite::OffsiteStore;
use record::{BackupMetadata, BackupRecord, DatabaseType, Tier};

/// What `create` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupScope {
    Database,
    Application,
    All,
}

/// Outcome of uploading backups that have no offsite copy yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OffsiteSyncReport {
    pub uploaded: Vec<String>,
    /// Backup name and the error that kept it local.
    pub failed: Vec<(String, String)>,
}

impl OffsiteSyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Produces compressed, checksummed artifacts with their sidecar metadata.
pub struct BackupCreator {
    backup_dir: PathBuf,
    environment: String,
    engine: Option<DatabaseEngine>,
    offsite: Option<OffsiteStore>,
    export: ApplicationExportConfig,
    exporter: Box<dyn RecordExporter + Send + Sync>,
}

impl BackupCreator {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let engine = config
            .database
            .as_ref()
            .map(DatabaseEngine::from_config)
            .transpose()?;

        Ok(Self {
            backup_dir: config.backup_dir.clone(),
            environment: config.environment.clone(),
            engine,
            offsite: config.offsite.clone().map(OffsiteStore::new),
            export: config.application_export.clone(),
            exporter: Box::new(JsonFileExporter::new(config.application_export.sources.clone())),
        })
    }

    #[cfg(test)]
    pub fn with_exporter(mut self, exporter: Box<dyn RecordExporter + Send + Sync>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn has_offsite(&self) -> bool {
        self.offsite.is_some()
    }

    pub fn has_application_export(&self) -> bool {
        !self.export.sources.is_empty()
    }

    pub async fn create(&self, tier: Tier) -> Result<BackupRecord> {
        self.create_at(tier, Utc::now()).await
    }

    /// Database backup stamped with `now`; the scheduler passes its tick time.
    pub async fn create_at(&self, tier: Tier, now: DateTime<Utc>) -> Result<BackupRecord> {
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| BackupError::config("No database configured; cannot create a database backup"))?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            BackupError::config(format!(
                "Failed to create backup directory {}: {}",
                self.backup_dir.display(),
                e
            ))
        })?;

        ensure_source_reachable(&engine).await?;

        let database_type = engine.database_type();
        let name = self.unique_name(tier, database_type, now);
        tracing::info!("🚀 Starting {} backup {} ({})", tier, name, database_type);

        // Dropping the staging dir removes any partial artifact on every error path.
        let staging = TempFileBuilder::new()
            .prefix(".staging-")
            .tempdir_in(&self.backup_dir)?;
        let staging_path = staging.path().to_path_buf();
        let job_name = name.clone();

        let metadata = tokio::task::spawn_blocking(move || {
            let dump_path = staging_path.join(format!("{}.{}", job_name, database_type.extension()));
            let original_size = engine.dump(&dump_path)?;

            let metadata = seal_artifact(&staging_path, &dump_path, original_size, |checksum, compressed_size| {
                BackupMetadata {
                    backup_name: job_name.clone(),
                    backup_type: tier,
                    created_at: now,
                    database_type,
                    checksum,
                    original_size,
                    compressed_size,
                    compression_ratio: record::compression_ratio(original_size, compressed_size),
                    offsite_path: None,
                }
            })?;
            fs::remove_file(&dump_path)?;
            Ok::<BackupMetadata, BackupError>(metadata)
        })
        .await??;

        let record = self.publish(staging.path(), metadata)?;
        drop(staging);

        tracing::info!(
            "✅ Backup {} written ({} -> {} bytes, {:.2}% saved)",
            record.name,
            record.original_size,
            record.compressed_size,
            record.compression_ratio
        );

        Ok(self.sync_offsite(record).await)
    }

    pub async fn create_application(&self, tier: Tier) -> Result<BackupRecord> {
        self.create_application_at(tier, Utc::now()).await
    }

    /// Exports non-secret application records into a `.tar.gz` artifact.
    pub async fn create_application_at(&self, tier: Tier, now: DateTime<Utc>) -> Result<BackupRecord> {
        fs::create_dir_all(&self.backup_dir)?;
        let name = self.unique_name(tier, DatabaseType::Application, now);
        tracing::info!("🚀 Starting {} application backup {}", tier, name);

        let staging = TempFileBuilder::new()
            .prefix(".staging-")
            .tempdir_in(&self.backup_dir)?;
        let export_dir = staging.path().join(&name);
        fs::create_dir_all(&export_dir)?;

        let sets = application::write_export(
            self.exporter.as_ref(),
            &self.export.redact_keys,
            &self.environment,
            &export_dir,
        )?;
        let original_size = archive::directory_size(&export_dir);

        let artifact = staging.path().join(format!("{}.{}.gz", name, DatabaseType::Application.extension()));
        let compressed_size = archive::create_tar_gz_archive(&export_dir, &artifact)?;
        let checksum = archive::sha256_file(&artifact)?;
        let metadata = BackupMetadata {
            backup_name: name,
            backup_type: tier,
            created_at: now,
            database_type: DatabaseType::Application,
            checksum,
            original_size,
            compressed_size,
            compression_ratio: record::compression_ratio(original_size, compressed_size),
            offsite_path: None,
        };
        record::write_metadata(staging.path(), &metadata)?;

        let record = self.publish(staging.path(), metadata)?;
        drop(staging);
        tracing::info!("✅ Application backup {} written with {} record sets", record.name, sets);

        Ok(self.sync_offsite(record).await)
    }

    /// Moves a sealed artifact and then its sidecar out of staging.
    /// The sidecar goes last so the catalog never sees a half-published pair.
    fn publish(&self, staging: &Path, metadata: BackupMetadata) -> Result<BackupRecord> {
        let artifact_name = metadata.artifact_file_name();
        let sidecar_name = metadata.sidecar_file_name();
        let local_path = self.backup_dir.join(&artifact_name);

        fs::rename(staging.join(&artifact_name), &local_path)?;
        if let Err(e) = fs::rename(staging.join(&sidecar_name), self.backup_dir.join(&sidecar_name)) {
            // An artifact without a sidecar is invisible to the catalog and to retention.
            if let Err(cleanup) = fs::remove_file(&local_path) {
                tracing::error!(
                    "❌ Failed to remove unpublished artifact {}: {}",
                    local_path.display(),
                    cleanup
                );
            }
            return Err(e.into());
        }
        sync_dir(&self.backup_dir);

        Ok(BackupRecord::from_metadata(metadata, local_path))
    }

    async fn sync_offsite(&self, mut record: BackupRecord) -> BackupRecord {
        if let Some(offsite) = &self.offsite {
            if let Err(e) = self.push_offsite(offsite, &mut record).await {
                // The local copy is authoritative; `sync_pending_offsite` retries later.
                tracing::warn!("⚠️ Backup {} has no recorded offsite copy: {}", record.name, e);
            }
        }
        record
    }

    /// Uploads the artifact and records the location in its sidecar.
    async fn push_offsite(&self, offsite: &OffsiteStore, record: &mut BackupRecord) -> Result<()> {
        let location = offsite.upload(&record.local_path).await?;
        tracing::info!("☁️ Offsite copy of {} stored at {}", record.name, location);
        record.offsite_path = Some(location.clone());

        let sidecar = record.sidecar_path();
        let mut metadata = record::read_metadata(&sidecar)?;
        metadata.offsite_path = Some(location);
        record::rewrite_metadata(&sidecar, &metadata)?;
        Ok(())
    }

    /// Uploads every cataloged backup whose sidecar records no offsite copy,
    /// oldest first. One failed upload does not stop the others.
    pub async fn sync_pending_offsite(&self) -> Result<OffsiteSyncReport> {
        let offsite = self
            .offsite
            .as_ref()
            .ok_or_else(|| BackupError::config("No offsite destination configured"))?;

        let mut pending: Vec<BackupRecord> = BackupCatalog::new(&self.backup_dir)
            .list(None)?
            .into_iter()
            .filter(|r| r.offsite_path.is_none())
            .collect();
        pending.reverse();
        tracing::info!("☁️ {} backups waiting for an offsite copy", pending.len());

        let mut report = OffsiteSyncReport::default();
        for mut record in pending {
            match self.push_offsite(offsite, &mut record).await {
                Ok(()) => report.uploaded.push(record.name),
                Err(e) => {
                    tracing::warn!("⚠️ Offsite catch-up for {} failed: {}", record.name, e);
                    report.failed.push((record.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn unique_name(&self, tier: Tier, database_type: DatabaseType, now: DateTime<Utc>) -> String {
        let base = record::backup_name(tier, database_type, now);
        let taken = |name: &str| {
            self.backup_dir.join(record::sidecar_file_name(name)).exists()
                || self
                    .backup_dir
                    .join(format!("{}.{}.gz", name, database_type.extension()))
                    .exists()
        };

        if !taken(&base) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", base, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Compresses `dump_path`, hashes the result and writes the sidecar into `staging`.
fn seal_artifact(
    staging: &Path,
    dump_path: &Path,
    original_size: u64,
    build: impl FnOnce(String, u64) -> BackupMetadata,
) -> Result<BackupMetadata> {
    let gz_path = dump_path.with_file_name(format!(
        "{}.gz",
        dump_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    ));
    let compressed_size = archive::compress_file(dump_path, &gz_path)?;
    let checksum = archive::sha256_file(&gz_path)?;
    tracing::debug!(
        "Compressed {} bytes into {} bytes, sha256 {}",
        original_size,
        compressed_size,
        checksum
    );

    let metadata = build(checksum, compressed_size);
    record::write_metadata(staging, &metadata)?;
    Ok(metadata)
}

fn sync_dir(dir: &Path) {
    // Directory fsync is not supported everywhere; the renames are still atomic.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::application::ExportedRecordSet;
    use crate::backup::application::tests::StaticExporter;
    use crate::config::{DatabaseConfig, OffsiteConfig, RawJsonConfig};
    use crate::engine::sqlite::tests::seed_database;
    use chrono::TimeZone;
    use serde_json::json;

    /// Sandbox with a small live SQLite database and a backup directory.
    pub(crate) struct Sandbox {
        pub dir: tempfile::TempDir,
        pub config: AppConfig,
    }

    impl Sandbox {
        pub fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let live = dir.path().join("inventory.sqlite3");
            seed_database(&live, 200)?;

            let mut config = AppConfig::from_raw(RawJsonConfig::default())?;
            config.backup_dir = dir.path().join("backups");
            config.environment = "test".to_string();
            config.database = Some(DatabaseConfig::Sqlite { path: live });
            Ok(Self { dir, config })
        }

        pub fn live_db(&self) -> PathBuf {
            self.dir.path().join("inventory.sqlite3")
        }

        pub fn creator(&self) -> anyhow::Result<BackupCreator> {
            Ok(BackupCreator::from_config(&self.config)?)
        }

        pub async fn backup_at(&self, tier: Tier, at: DateTime<Utc>) -> anyhow::Result<BackupRecord> {
            Ok(self.creator()?.create_at(tier, at).await?)
        }
    }

    fn staging_dirs(dir: &Path) -> usize {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_checksum_matches_artifact_right_after_creation() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let record = sandbox.creator()?.create(Tier::Manual).await?;

        assert_eq!(archive::sha256_file(&record.local_path)?, record.checksum);
        assert_eq!(record.original_size, fs::metadata(sandbox.live_db())?.len());
        assert_eq!(record.compressed_size, fs::metadata(&record.local_path)?.len());
        assert!(record.compression_ratio > 0.0);
        assert!(record.sidecar_path().exists());
        assert_eq!(staging_dirs(&sandbox.config.backup_dir), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_artifact_layout_and_sidecar_contents() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap();
        let record = sandbox.backup_at(Tier::Daily, at).await?;

        assert_eq!(
            record.local_path,
            sandbox.config.backup_dir.join("daily_sqlite_20240115_020000.sqlite3.gz")
        );
        let sidecar: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(record.sidecar_path())?)?;
        assert_eq!(sidecar["backup_name"], "daily_sqlite_20240115_020000");
        assert_eq!(sidecar["backup_type"], "daily");
        assert_eq!(sidecar["database_type"], "sqlite");
        assert_eq!(sidecar["created_at"], "2024-01-15T02:00:00Z");
        assert_eq!(sidecar["checksum"], json!(record.checksum));
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_backups_get_distinct_names() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap();
        let first = sandbox.backup_at(Tier::Hourly, at).await?;
        let second = sandbox.backup_at(Tier::Hourly, at).await?;
        assert_ne!(first.name, second.name);
        assert_eq!(second.name, "hourly_sqlite_20240115_020000_2");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_no_trace() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        // Not a SQLite file any more, so the dump step rejects it.
        fs::write(sandbox.live_db(), b"corrupted")?;

        let err = sandbox.creator()?.create(Tier::Daily).await.unwrap_err();
        assert!(matches!(err, BackupError::Dump(_)));

        let leftovers: Vec<_> = fs::read_dir(&sandbox.config.backup_dir)?
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
        Ok(())
    }

    #[tokio::test]
    async fn test_offsite_failure_does_not_fail_backup() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let blocker = sandbox.dir.path().join("offsite-is-a-file");
        fs::write(&blocker, b"x")?;
        sandbox.config.offsite = Some(OffsiteConfig::Directory(blocker));

        let mut creator = sandbox.creator()?;
        creator.offsite = creator
            .offsite
            .take()
            .map(|o| o.with_retry(1, std::time::Duration::from_millis(1)));

        let record = creator.create(Tier::Manual).await?;
        assert!(record.offsite_path.is_none());
        assert!(record.local_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_offsite_copy_is_recorded() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let offsite_dir = sandbox.dir.path().join("offsite");
        sandbox.config.offsite = Some(OffsiteConfig::Directory(offsite_dir.clone()));

        let record = sandbox.creator()?.create(Tier::Manual).await?;
        let expected = offsite_dir.join(record.artifact_file_name());
        assert_eq!(record.offsite_path, Some(expected.display().to_string()));
        assert_eq!(fs::read(&expected)?, fs::read(&record.local_path)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_offsite_location_is_persisted_in_sidecar() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let offsite_dir = sandbox.dir.path().join("offsite");
        sandbox.config.offsite = Some(OffsiteConfig::Directory(offsite_dir.clone()));

        let record = sandbox.creator()?.create(Tier::Daily).await?;

        let listed = BackupCatalog::new(&sandbox.config.backup_dir).list(None)?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].offsite_path, record.offsite_path);
        assert_eq!(
            listed[0].offsite_path,
            Some(offsite_dir.join(record.artifact_file_name()).display().to_string())
        );
        assert_eq!(archive::sha256_file(&listed[0].local_path)?, listed[0].checksum);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_backups_are_uploaded_later() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap();
        let first = sandbox.backup_at(Tier::Hourly, base).await?;
        let second = sandbox.backup_at(Tier::Hourly, base + chrono::Duration::hours(1)).await?;

        let offsite_dir = sandbox.dir.path().join("offsite");
        sandbox.config.offsite = Some(OffsiteConfig::Directory(offsite_dir.clone()));
        let creator = sandbox.creator()?;

        let report = creator.sync_pending_offsite().await?;
        assert_eq!(report.uploaded, vec![first.name.clone(), second.name.clone()]);
        assert!(report.is_clean());
        assert!(offsite_dir.join(first.artifact_file_name()).exists());

        let catalog = BackupCatalog::new(&sandbox.config.backup_dir);
        assert!(catalog.list(None)?.iter().all(|r| r.offsite_path.is_some()));
        assert!(creator.sync_pending_offsite().await?.uploaded.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_sync_reports_failures_and_requires_offsite() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        let record = sandbox.creator()?.create(Tier::Manual).await?;
        let err = sandbox.creator()?.sync_pending_offsite().await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));

        let blocker = sandbox.dir.path().join("offsite-is-a-file");
        fs::write(&blocker, b"x")?;
        sandbox.config.offsite = Some(OffsiteConfig::Directory(blocker));
        let mut creator = sandbox.creator()?;
        creator.offsite = creator
            .offsite
            .take()
            .map(|o| o.with_retry(1, std::time::Duration::from_millis(1)));

        let report = creator.sync_pending_offsite().await?;
        assert!(report.uploaded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, record.name);
        assert!(!report.is_clean());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_sidecar_publish_removes_artifact() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let creator = sandbox.creator()?;
        fs::create_dir_all(&sandbox.config.backup_dir)?;
        let staging = tempfile::tempdir_in(&sandbox.config.backup_dir)?;

        let metadata = BackupMetadata {
            backup_name: "manual_sqlite_20240115_020000".to_string(),
            backup_type: Tier::Manual,
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap(),
            database_type: DatabaseType::Sqlite,
            checksum: "00".repeat(32),
            original_size: 10,
            compressed_size: 4,
            compression_ratio: record::compression_ratio(10, 4),
            offsite_path: None,
        };
        // Artifact staged, sidecar missing, so the second rename fails.
        fs::write(staging.path().join(metadata.artifact_file_name()), b"gzip")?;

        assert!(creator.publish(staging.path(), metadata.clone()).is_err());
        assert!(!sandbox.config.backup_dir.join(metadata.artifact_file_name()).exists());
        assert!(BackupCatalog::new(&sandbox.config.backup_dir).list(None)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_application_backup_excludes_secrets() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let creator = sandbox.creator()?.with_exporter(Box::new(StaticExporter(vec![
            ExportedRecordSet {
                name: "store_settings".to_string(),
                records: json!([{"shop": "acme.myshopify.com", "access_token": "shpat_secret"}]),
            },
        ])));

        let record = creator.create_application(Tier::Manual).await?;
        assert_eq!(record.database_type, DatabaseType::Application);
        assert!(record.local_path.to_string_lossy().ends_with(".tar.gz"));
        assert_eq!(archive::sha256_file(&record.local_path)?, record.checksum);

        let unpacked = sandbox.dir.path().join("unpacked");
        let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(File::open(&record.local_path)?));
        tarball.unpack(&unpacked)?;
        let settings = fs::read_to_string(unpacked.join("store_settings.json"))?;
        assert!(settings.contains("acme.myshopify.com"));
        assert!(!settings.contains("shpat_secret"));
        assert!(unpacked.join("manifest.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_backup_requires_database_config() -> anyhow::Result<()> {
        let mut sandbox = Sandbox::new()?;
        sandbox.config.database = None;
        let err = sandbox.creator()?.create(Tier::Manual).await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
        Ok(())
    }
}
