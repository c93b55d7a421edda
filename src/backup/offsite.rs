// inventory-backup/src/backup/offsite.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use std::time::Duration;

use crate::config::{OffsiteConfig, SpacesConfig};
use crate::errors::{BackupError, Result};

const UPLOAD_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Secondary copy of every artifact, kept outside the backup host.
#[derive(Debug, Clone)]
pub struct OffsiteStore {
    config: OffsiteConfig,
    attempts: u32,
    retry_delay: Duration,
}

impl OffsiteStore {
    pub fn new(config: OffsiteConfig) -> Self {
        Self {
            config,
            attempts: UPLOAD_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Where `file_name` lives (or would live) offsite.
    pub fn location_for(&self, file_name: &str) -> String {
        match &self.config {
            OffsiteConfig::S3(spaces) => format!("s3://{}/{}", spaces.bucket_name, s3_key(spaces, file_name)),
            OffsiteConfig::Directory(dir) => dir.join(file_name).display().to_string(),
        }
    }

    /// Uploads with bounded retries. Returns the offsite location.
    pub async fn upload(&self, local: &Path) -> Result<String> {
        let file_name = file_name_of(local)?;
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            let outcome = match &self.config {
                OffsiteConfig::S3(spaces) => upload_file_to_s3(spaces, local, &s3_key(spaces, &file_name)).await,
                OffsiteConfig::Directory(dir) => copy_to_directory(dir, local, &file_name).await,
            };
            match outcome {
                Ok(()) => return Ok(self.location_for(&file_name)),
                Err(e) => {
                    tracing::warn!(
                        "Offsite upload of {} failed (attempt {}/{}): {}",
                        file_name,
                        attempt,
                        self.attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(BackupError::offsite(format!(
            "giving up on {} after {} attempts: {}",
            file_name,
            self.attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub async fn delete(&self, file_name: &str) -> Result<()> {
        match &self.config {
            OffsiteConfig::S3(spaces) => delete_file_from_s3(spaces, &s3_key(spaces, file_name)).await,
            OffsiteConfig::Directory(dir) => {
                let target = dir.join(file_name);
                tokio::fs::remove_file(&target).await.map_err(|e| {
                    BackupError::offsite(format!("Failed to delete {}: {}", target.display(), e))
                })
            }
        }
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| BackupError::offsite(format!("{} has no file name", path.display())))
}

fn s3_key(spaces: &SpacesConfig, file_name: &str) -> String {
    match &spaces.folder_prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file_name),
        None => file_name.to_string(),
    }
}

async fn copy_to_directory(dir: &Path, local: &Path, file_name: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let partial = dir.join(format!(".{}.partial", file_name));
    tokio::fs::copy(local, &partial).await?;
    tokio::fs::rename(&partial, dir.join(file_name)).await?;
    Ok(())
}

async fn s3_client(spaces_config: &SpacesConfig) -> s3::Client {
    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&spaces_config.endpoint_url)
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None, // session_token
            None, // expiry
            "Static",
        ))
        .load()
        .await;

    s3::Client::new(&sdk_config)
}

/// Uploads a file to an S3-compatible object storage service (like DigitalOcean Spaces).
async fn upload_file_to_s3(spaces_config: &SpacesConfig, file_path: &Path, s3_key: &str) -> Result<()> {
    tracing::info!(
        "Uploading {} to S3 bucket {} with key {}",
        file_path.display(),
        spaces_config.bucket_name,
        s3_key
    );

    let client = s3_client(spaces_config).await;
    let body = ByteStream::from_path(file_path).await.map_err(|e| {
        BackupError::offsite(format!(
            "Failed to create ByteStream from file {}: {}",
            file_path.display(),
            e
        ))
    })?;

    client
        .put_object()
        .bucket(&spaces_config.bucket_name)
        .key(s3_key)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            BackupError::offsite(format!(
                "Failed to upload {} to bucket {}: {}",
                file_path.display(),
                spaces_config.bucket_name,
                e
            ))
        })?;

    tracing::info!("✅ Uploaded {} to s3://{}/{}", file_path.display(), spaces_config.bucket_name, s3_key);
    Ok(())
}

async fn delete_file_from_s3(spaces_config: &SpacesConfig, s3_key: &str) -> Result<()> {
    let client = s3_client(spaces_config).await;
    client
        .delete_object()
        .bucket(&spaces_config.bucket_name)
        .key(s3_key)
        .send()
        .await
        .map_err(|e| {
            BackupError::offsite(format!(
                "Failed to delete s3://{}/{}: {}",
                spaces_config.bucket_name, s3_key, e
            ))
        })?;
    Ok(())
}
