// inventory-backup/src/scheduler/lock.rs
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::errors::{BackupError, Result};

pub const TICK_LOCK_FILE: &str = ".tick.lock";

/// Held for the duration of a tick that has work to do. Removed on drop.
#[derive(Debug)]
pub struct TickLock {
    path: PathBuf,
}

impl TickLock {
    /// Fails with a scheduling error while another tick holds the lock.
    /// A lock older than `stale_after` belongs to a crashed run and is taken over.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut took_over = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    return Ok(Self { path: path.to_path_buf() });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !took_over => {
                    let age = lock_age(path)?;
                    if age < stale_after {
                        return Err(BackupError::Scheduling(format!(
                            "another tick is still running (lock {} held for {}s)",
                            path.display(),
                            age.as_secs()
                        )));
                    }
                    tracing::warn!(
                        "⚠️ Taking over stale tick lock {} ({}s old)",
                        path.display(),
                        age.as_secs()
                    );
                    match fs::remove_file(path) {
                        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                    took_over = true;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(BackupError::Scheduling(format!(
                        "tick lock {} was re-acquired by another run",
                        path.display()
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for TickLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release tick lock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_age(path: &Path) -> Result<Duration> {
    let modified = match fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Duration::MAX),
        Err(e) => return Err(e.into()),
    };
    Ok(SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SIX_HOURS: Duration = Duration::from_secs(6 * 3600);

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("backups").join(TICK_LOCK_FILE);

        let held = TickLock::acquire(&path, SIX_HOURS)?;
        let err = TickLock::acquire(&path, SIX_HOURS).unwrap_err();
        assert_eq!(err.kind(), "scheduling");

        drop(held);
        assert!(!path.exists());
        let _again = TickLock::acquire(&path, SIX_HOURS)?;
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_taken_over() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(TICK_LOCK_FILE);
        fs::write(&path, "4242\n")?;
        OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now() - Duration::from_secs(7 * 3600))?;

        let lock = TickLock::acquire(&path, SIX_HOURS)?;
        assert_ne!(fs::read_to_string(&path)?, "4242\n");
        drop(lock);
        assert!(!path.exists());
        Ok(())
    }
}
