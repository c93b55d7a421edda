// inventory-backup/src/config/mod.rs
use chrono::Weekday;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::application::check_record_set_name;
use crate::errors::{BackupError, Result};
use crate::retention::RetentionPolicy;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDatabaseConfig {
    pub engine: Option<String>,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRetentionConfig {
    pub hourly_hours: Option<u32>,
    pub daily_days: Option<u32>,
    pub weekly_weeks: Option<u32>,
    pub monthly_months: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_dir: Option<PathBuf>,
    pub environment: Option<String>,
    pub database: Option<JsonDatabaseConfig>,
    pub retention: Option<JsonRetentionConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub offsite_dir: Option<PathBuf>,
    pub notifications: Option<NotificationConfig>,
    pub schedule: Option<ScheduleConfig>,
    pub disaster_recovery: Option<RecoveryConfig>,
    pub application_export: Option<ApplicationExportConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OffsiteConfig {
    S3(SpacesConfig),
    Directory(PathBuf),
}

/// Connection descriptor for the host application's database.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseConfig {
    Sqlite { path: PathBuf },
    Postgresql { url: String },
    Mysql { url: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Chat webhook receiving a JSON POST per notification.
    pub webhook_url: Option<String>,
    pub email_to: Vec<String>,
    pub email_from: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hourly_enabled: bool,
    pub daily_enabled: bool,
    pub weekly_enabled: bool,
    pub monthly_enabled: bool,
    pub hourly_minutes: Vec<u32>,
    pub daily_hour: u32,
    pub weekly_weekday: Weekday,
    pub weekly_hour: u32,
    pub monthly_day: u32,
    pub monthly_hour: u32,
    pub cleanup_enabled: bool,
    pub cleanup_hour: u32,
    pub cleanup_minute: u32,
    pub health_check_enabled: bool,
    pub health_check_hour: u32,
    pub health_check_minute: u32,
    /// Latest backup older than this makes the health check complain.
    pub stale_after_hours: i64,
    /// How many of the newest backups the health check re-verifies.
    pub verify_recent: usize,
    pub rehearse_in_health_check: bool,
    /// Also take an application backup whenever a scheduled tier runs.
    pub include_application: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly_enabled: true,
            daily_enabled: true,
            weekly_enabled: true,
            monthly_enabled: true,
            hourly_minutes: vec![0, 30],
            daily_hour: 2,
            weekly_weekday: Weekday::Sun,
            weekly_hour: 2,
            monthly_day: 1,
            monthly_hour: 2,
            cleanup_enabled: true,
            cleanup_hour: 3,
            cleanup_minute: 0,
            health_check_enabled: true,
            health_check_hour: 8,
            health_check_minute: 0,
            stale_after_hours: 26,
            verify_recent: 3,
            rehearse_in_health_check: true,
            include_application: false,
        }
    }
}

impl ScheduleConfig {
    fn validate(&self) -> Result<()> {
        let hours = [
            ("daily_hour", self.daily_hour),
            ("weekly_hour", self.weekly_hour),
            ("monthly_hour", self.monthly_hour),
            ("cleanup_hour", self.cleanup_hour),
            ("health_check_hour", self.health_check_hour),
        ];
        for (field, value) in hours {
            if value > 23 {
                return Err(BackupError::config(format!("schedule.{} must be 0-23, got {}", field, value)));
            }
        }
        let minutes = self
            .hourly_minutes
            .iter()
            .map(|m| ("hourly_minutes", *m))
            .chain([
                ("cleanup_minute", self.cleanup_minute),
                ("health_check_minute", self.health_check_minute),
            ]);
        for (field, value) in minutes {
            if value > 59 {
                return Err(BackupError::config(format!("schedule.{} must be 0-59, got {}", field, value)));
            }
        }
        // Restricted to days every month has.
        if !(1..=28).contains(&self.monthly_day) {
            return Err(BackupError::config(format!(
                "schedule.monthly_day must be 1-28, got {}",
                self.monthly_day
            )));
        }
        if self.stale_after_hours <= 0 {
            return Err(BackupError::config("schedule.stale_after_hours must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub rto_minutes: u32,
    pub rpo_minutes: u32,
    pub incident_commander: String,
    pub database_admin: String,
    pub platform_engineer: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rto_minutes: 240,
            rpo_minutes: 60,
            incident_commander: "Incident Commander".to_string(),
            database_admin: "Database Administrator".to_string(),
            platform_engineer: "Platform Engineer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationExportConfig {
    /// Record set name -> JSON export produced by the host application.
    pub sources: BTreeMap<String, PathBuf>,
    /// Keys stripped from every exported object, matched case-insensitively as substrings.
    pub redact_keys: Vec<String>,
}

impl Default for ApplicationExportConfig {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            redact_keys: [
                "access_token",
                "token",
                "password",
                "secret",
                "api_key",
                "credential",
                "private_key",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup_dir: PathBuf,
    pub environment: String,
    pub database: Option<DatabaseConfig>,
    pub retention: RetentionPolicy,
    pub offsite: Option<OffsiteConfig>,
    pub notifications: NotificationConfig,
    pub schedule: ScheduleConfig,
    pub recovery: RecoveryConfig,
    pub application_export: ApplicationExportConfig,
}

const DEFAULT_BACKUP_DIR: &str = "./backups";

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            BackupError::config(format!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let mut raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).map_err(|e| {
            BackupError::config(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        raw_json_config.apply_env_overrides();
        Self::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let backup_dir = raw
            .backup_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        if backup_dir.as_os_str().is_empty() {
            return Err(BackupError::config("backup_dir cannot be empty in config.json."));
        }
        if backup_dir.exists() && !backup_dir.is_dir() {
            return Err(BackupError::config(format!(
                "backup_dir {} exists but is not a directory",
                backup_dir.display()
            )));
        }

        let database = raw.database.as_ref().map(parse_database_config).transpose()?;

        let retention = match &raw.retention {
            Some(r) => {
                let defaults = RetentionPolicy::default();
                RetentionPolicy {
                    hourly_hours: r.hourly_hours.unwrap_or(defaults.hourly_hours),
                    daily_days: r.daily_days.unwrap_or(defaults.daily_days),
                    weekly_weeks: r.weekly_weeks.unwrap_or(defaults.weekly_weeks),
                    monthly_months: r.monthly_months.unwrap_or(defaults.monthly_months),
                }
            }
            None => RetentionPolicy::default(),
        };

        let schedule = raw.schedule.clone().unwrap_or_default();
        schedule.validate()?;

        let application_export = raw.application_export.clone().unwrap_or_default();
        for name in application_export.sources.keys() {
            check_record_set_name(name)?;
        }

        Ok(AppConfig {
            backup_dir,
            environment: raw
                .environment
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "production".to_string()),
            database,
            retention,
            offsite: parse_offsite_config(&raw),
            notifications: raw.notifications.clone().unwrap_or_default(),
            schedule,
            recovery: raw.disaster_recovery.clone().unwrap_or_default(),
            application_export,
        })
    }

    pub fn require_database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| BackupError::config("database must be set in config.json for this operation"))
    }
}

impl RawJsonConfig {
    /// Environment (and `.env`) values win over config.json.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("BACKUP_DIR") {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Ok(environment) = env::var("BACKUP_ENVIRONMENT") {
            self.environment = Some(environment);
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database = Some(database_from_url(&url));
        }
        if let Ok(webhook) = env::var("BACKUP_WEBHOOK_URL") {
            self.notifications
                .get_or_insert_with(NotificationConfig::default)
                .webhook_url = Some(webhook);
        }
    }
}

/// Infers the engine from a connection URL scheme (`sqlite:///path`, `postgres://`, `mysql://`).
fn database_from_url(url: &str) -> JsonDatabaseConfig {
    let scheme = url.split("://").next().unwrap_or_default().to_ascii_lowercase();
    match scheme.as_str() {
        "sqlite" => JsonDatabaseConfig {
            engine: Some("sqlite".to_string()),
            path: Some(PathBuf::from(url.trim_start_matches("sqlite://"))),
            url: None,
        },
        other => JsonDatabaseConfig {
            engine: Some(other.to_string()),
            path: None,
            url: Some(url.to_string()),
        },
    }
}

fn parse_database_config(raw: &JsonDatabaseConfig) -> Result<DatabaseConfig> {
    let engine = raw
        .engine
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase())
        .ok_or_else(|| BackupError::config("database.engine must be set in config.json"))?;

    let require_url = || {
        raw.url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| BackupError::config(format!("database.url must be set for engine {}", engine)))
    };

    match engine.as_str() {
        "sqlite" | "sqlite3" => {
            let path = raw
                .path
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| BackupError::config("database.path must be set for engine sqlite"))?;
            Ok(DatabaseConfig::Sqlite { path })
        }
        "postgres" | "postgresql" => Ok(DatabaseConfig::Postgresql { url: require_url()? }),
        "mysql" | "mariadb" => Ok(DatabaseConfig::Mysql { url: require_url()? }),
        other => Err(BackupError::config(format!("Unsupported database engine: {}", other))),
    }
}

fn parse_offsite_config(raw: &RawJsonConfig) -> Option<OffsiteConfig> {
    let spaces_config = raw.s3_storage.as_ref().and_then(|s3_raw| {
        if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
            s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
            s3_raw.region.as_ref().filter(|s| !s.is_empty()),
            s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
            s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
            s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
        ) {
            Some(SpacesConfig {
                bucket_name: bucket.clone(),
                region: region.clone(),
                access_key_id: key_id.clone(),
                secret_access_key: secret.clone(),
                endpoint_url: endpoint.clone(),
                folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
            })
        } else {
            tracing::warn!(
                "S3 configuration is present in config.json but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty. S3 offsite copies will be disabled."
            );
            None
        }
    });

    match (spaces_config, raw.offsite_dir.as_ref()) {
        (Some(spaces), Some(dir)) => {
            tracing::warn!(
                "Both s3_storage and offsite_dir are configured; using S3 and ignoring {}",
                dir.display()
            );
            Some(OffsiteConfig::S3(spaces))
        }
        (Some(spaces), None) => Some(OffsiteConfig::S3(spaces)),
        (None, Some(dir)) if !dir.as_os_str().is_empty() => Some(OffsiteConfig::Directory(dir.clone())),
        _ => None,
    }
}
