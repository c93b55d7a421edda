use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Restore operation failed: {0}")]
    Restore(String),

    // Never fatal to a backup: callers downgrade it to a warning.
    #[error("Offsite sync failed: {0}")]
    OffsiteSync(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Command execution failed: {stderr}")]
    Command { stdout: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn dump(msg: impl Into<String>) -> Self {
        Self::Dump(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    pub fn offsite(msg: impl Into<String>) -> Self {
        Self::OffsiteSync(msg.into())
    }

    /// Short machine-friendly label used in notifications and tick reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Dump(_) => "dump",
            Self::Compression(_) => "compression",
            Self::Integrity(_) => "integrity",
            Self::Restore(_) => "restore",
            Self::OffsiteSync(_) => "offsite_sync",
            Self::Scheduling(_) => "scheduling",
            Self::Notification(_) => "notification",
            Self::Command { .. } => "command",
            Self::Io(_) => "io",
            Self::SerdeJson(_) => "json",
            Self::Reqwest(_) => "http",
            Self::Join(_) => "task",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
