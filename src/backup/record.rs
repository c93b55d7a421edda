// inventory-backup/src/backup/record.rs
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::errors::{BackupError, Result};

/// Backup classification governing schedule and retention.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Manual,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Test,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Manual,
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Manual => "manual",
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Test => "test",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        Tier::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| BackupError::config(format!("Unknown backup tier: {}", s)))
    }
}

/// Tag stored in the sidecar describing what produced the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
    Mysql,
    Application,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Postgresql => "postgresql",
            DatabaseType::Mysql => "mysql",
            DatabaseType::Application => "application",
        }
    }

    /// Extension of the uncompressed payload, before `.gz`.
    pub fn extension(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite3",
            DatabaseType::Postgresql | DatabaseType::Mysql => "sql",
            DatabaseType::Application => "tar",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sidecar document written next to every artifact as `<name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_name: String,
    pub backup_type: Tier,
    pub created_at: DateTime<Utc>,
    pub database_type: DatabaseType,
    pub checksum: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    /// Set once a copy has been uploaded; older sidecars omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsite_path: Option<String>,
}

impl BackupMetadata {
    pub fn artifact_file_name(&self) -> String {
        format!("{}.{}.gz", self.backup_name, self.database_type.extension())
    }

    pub fn sidecar_file_name(&self) -> String {
        sidecar_file_name(&self.backup_name)
    }
}

/// A durable backup as reconstructed from disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    pub name: String,
    pub tier: Tier,
    pub database_type: DatabaseType,
    pub created_at: DateTime<Utc>,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub checksum: String,
    pub local_path: PathBuf,
    pub offsite_path: Option<String>,
}

impl BackupRecord {
    pub fn from_metadata(metadata: BackupMetadata, local_path: PathBuf) -> Self {
        Self {
            name: metadata.backup_name,
            tier: metadata.backup_type,
            database_type: metadata.database_type,
            created_at: metadata.created_at,
            original_size: metadata.original_size,
            compressed_size: metadata.compressed_size,
            compression_ratio: metadata.compression_ratio,
            checksum: metadata.checksum,
            local_path,
            offsite_path: metadata.offsite_path,
        }
    }

    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path_for(&self.local_path)
    }

    pub fn artifact_file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.{}.gz", self.name, self.database_type.extension()))
    }
}

/// Builds `<tier>_<database_type>_<YYYYMMDD_HHMMSS>`.
pub fn backup_name(tier: Tier, database_type: DatabaseType, at: DateTime<Utc>) -> String {
    format!("{}_{}_{}", tier, database_type, at.format("%Y%m%d_%H%M%S"))
}

/// True for names produced by [`backup_name`], including `_n` collision suffixes.
pub fn is_backup_name(name: &str) -> bool {
    static BACKUP_NAME_RE: OnceLock<Regex> = OnceLock::new();
    BACKUP_NAME_RE
        .get_or_init(|| {
            Regex::new(
                r"^(manual|hourly|daily|weekly|monthly|test)_(sqlite|postgresql|mysql|application)_\d{8}_\d{6}(_\d+)?$",
            )
            .expect("backup name pattern is valid")
        })
        .is_match(name)
}

pub fn sidecar_file_name(backup_name: &str) -> String {
    format!("{}.json", backup_name)
}

/// Backup name encoded in an artifact file name (everything before the first dot).
pub fn backup_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

pub fn sidecar_path_for(artifact: &Path) -> PathBuf {
    let name = backup_name_from_path(artifact).unwrap_or_default();
    artifact.with_file_name(sidecar_file_name(&name))
}

pub fn compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let ratio = (1.0 - compressed_size as f64 / original_size as f64) * 100.0;
    (ratio * 100.0).round() / 100.0
}

pub fn read_metadata(sidecar: &Path) -> Result<BackupMetadata> {
    let content = fs::read_to_string(sidecar)?;
    let metadata: BackupMetadata = serde_json::from_str(&content)?;
    Ok(metadata)
}

/// Writes the sidecar into `dir` and fsyncs it. Callers publish it with a rename.
pub fn write_metadata(dir: &Path, metadata: &BackupMetadata) -> Result<PathBuf> {
    let path = dir.join(metadata.sidecar_file_name());
    let mut file = File::create(&path)?;
    file.write_all(serde_json::to_string_pretty(metadata)?.as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

/// Replaces a published sidecar: the new document is written to a temp file in
/// the same directory, fsynced, then renamed over the old one.
pub fn rewrite_metadata(sidecar: &Path, metadata: &BackupMetadata) -> Result<()> {
    let dir = match sidecar.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".sidecar-")
        .tempfile_in(dir)?;
    temp.write_all(serde_json::to_string_pretty(metadata)?.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(sidecar).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_name_layout() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap();
        assert_eq!(
            backup_name(Tier::Daily, DatabaseType::Postgresql, at),
            "daily_postgresql_20240115_020000"
        );
    }

    #[test]
    fn test_sidecar_path_strips_all_extensions() {
        let artifact = Path::new("/var/backups/weekly_sqlite_20240107_020000.sqlite3.gz");
        assert_eq!(
            sidecar_path_for(artifact),
            PathBuf::from("/var/backups/weekly_sqlite_20240107_020000.json")
        );
    }

    #[test]
    fn test_recognises_backup_names() {
        assert!(is_backup_name("daily_sqlite_20240115_020000"));
        assert!(is_backup_name("hourly_postgresql_20240115_020000_3"));
        assert!(!is_backup_name("config"));
        assert!(!is_backup_name("yearly_sqlite_20240115_020000"));
        assert!(!is_backup_name("daily_sqlite_2024011_020000"));
    }

    #[test]
    fn test_tier_parse_is_case_insensitive() -> anyhow::Result<()> {
        assert_eq!("Monthly".parse::<Tier>()?, Tier::Monthly);
        assert!("yearly".parse::<Tier>().is_err());
        Ok(())
    }

    #[test]
    fn test_sidecar_uses_wire_names() -> anyhow::Result<()> {
        let metadata = BackupMetadata {
            backup_name: "hourly_mysql_20240115_023000".to_string(),
            backup_type: Tier::Hourly,
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 2, 30, 0).unwrap(),
            database_type: DatabaseType::Mysql,
            checksum: "ab".repeat(32),
            original_size: 1000,
            compressed_size: 250,
            compression_ratio: compression_ratio(1000, 250),
            offsite_path: None,
        };
        let value = serde_json::to_value(&metadata)?;
        assert_eq!(value["backup_type"], "hourly");
        assert_eq!(value["database_type"], "mysql");
        assert_eq!(value["created_at"], "2024-01-15T02:30:00Z");
        assert_eq!(value["compression_ratio"], 75.0);
        assert!(value.get("offsite_path").is_none());
        Ok(())
    }

    #[test]
    fn test_rewrite_replaces_sidecar_and_keeps_older_format_readable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sidecar = dir.path().join("daily_sqlite_20240115_020000.json");
        fs::write(
            &sidecar,
            r#"{"backup_name":"daily_sqlite_20240115_020000","backup_type":"daily","created_at":"2024-01-15T02:00:00Z","database_type":"sqlite","checksum":"00","original_size":10,"compressed_size":5,"compression_ratio":50.0}"#,
        )?;
        let mut metadata = read_metadata(&sidecar)?;
        assert_eq!(metadata.offsite_path, None);

        metadata.offsite_path = Some("s3://bucket/backups/daily_sqlite_20240115_020000.sqlite3.gz".to_string());
        rewrite_metadata(&sidecar, &metadata)?;

        assert_eq!(read_metadata(&sidecar)?, metadata);
        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }
}
