// inventory-backup/src/engine/sqlite.rs
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{DumpStrategy, RestoreContext, RestoreOutcome, file_size};
use crate::backup::record::DatabaseType;
use crate::errors::{BackupError, Result};

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
const BACKUP_PAGES_PER_STEP: i32 = 256;

/// Files SQLite keeps next to the main database. A stale one left beside a
/// restored database would be replayed over it on the next open.
const COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// File-based engine. Dumps go through SQLite's online backup API so pages
/// still in the write-ahead log are included.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    path: PathBuf,
}

impl SqliteEngine {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets the live database aside before it is replaced: WAL contents are
    /// checkpointed, the main file is copied and its companion files are moved
    /// next to the copy.
    fn snapshot_live(&self, ctx: &RestoreContext) -> Result<PathBuf> {
        fs::create_dir_all(&ctx.safety_dir)?;
        if let Err(e) = checkpoint(&self.path) {
            // Damaged live files are still copied byte for byte below.
            tracing::warn!("Could not checkpoint live database {}: {}", self.path.display(), e);
        }

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "database".to_string());
        let copy = ctx
            .safety_dir
            .join(format!("{}.pre_restore_{}.sqlite3", stem, ctx.timestamp));
        fs::copy(&self.path, &copy).map_err(|e| {
            BackupError::restore(format!(
                "Failed to snapshot live database to {}: {}",
                copy.display(),
                e
            ))
        })?;

        for suffix in COMPANION_SUFFIXES {
            let live_side = companion(&self.path, suffix);
            if !live_side.exists() {
                continue;
            }
            if suffix != "-shm" {
                fs::copy(&live_side, companion(&copy, suffix))?;
            }
            remove_if_present(&live_side)?;
            tracing::debug!("Moved {} aside", live_side.display());
        }

        tracing::info!("🛟 Safety copy of live database written to {}", copy.display());
        Ok(copy)
    }
}

fn has_sqlite_header(path: &Path) -> Result<bool> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// `<db>-wal`, `<db>-shm` and friends.
fn companion(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn online_backup(source: &Path, dest: &Path) -> rusqlite::Result<()> {
    let src = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut dst = Connection::open(dest)?;
    {
        let backup = Backup::new(&src, &mut dst)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, Duration::from_millis(50), None)?;
    }
    // The copy must not depend on a -wal file that is never archived.
    dst.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
    Ok(())
}

fn checkpoint(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
}

impl DumpStrategy for SqliteEngine {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn preflight(&self) -> Result<()> {
        if !self.path.is_file() {
            return Err(BackupError::config(format!(
                "SQLite database not found: {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn dump(&self, dest: &Path) -> Result<u64> {
        self.preflight()
            .map_err(|e| BackupError::dump(e.to_string()))?;
        if !has_sqlite_header(&self.path)? {
            return Err(BackupError::dump(format!(
                "{} is not a SQLite database",
                self.path.display()
            )));
        }

        tracing::info!("Backing up SQLite database {} to {}", self.path.display(), dest.display());
        online_backup(&self.path, dest).map_err(|e| {
            BackupError::dump(format!(
                "Online backup of {} to {} failed: {}",
                self.path.display(),
                dest.display(),
                e
            ))
        })?;
        File::open(dest)?.sync_all()?;
        file_size(dest)
    }

    fn staging_dir(&self) -> Option<PathBuf> {
        // Same filesystem as the live file, so the final rename is atomic.
        self.path.parent().map(|p| {
            if p.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                p.to_path_buf()
            }
        })
    }

    fn restore(&self, dump: &Path, ctx: &RestoreContext) -> Result<RestoreOutcome> {
        self.validate_dump(dump)?;

        let safety_copy = if self.path.exists() {
            Some(self.snapshot_live(ctx)?)
        } else {
            tracing::warn!("Live database {} does not exist yet, nothing to snapshot", self.path.display());
            None
        };

        File::open(dump)?.sync_all()?;
        fs::rename(dump, &self.path).map_err(|e| {
            BackupError::restore(format!(
                "Failed to move restored database into place at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(RestoreOutcome { safety_copy })
    }

    fn validate_dump(&self, dump: &Path) -> Result<()> {
        check_dump_signature(dump)
    }
}

pub(crate) fn check_dump_signature(dump: &Path) -> Result<()> {
    if !has_sqlite_header(dump)? {
        return Err(BackupError::restore(format!(
            "{} does not contain a SQLite database",
            dump.display()
        )));
    }
    Ok(())
}
