//! Database engines supported by the backup subsystem.
//!
//! Every engine implements [`DumpStrategy`]; [`DatabaseEngine`] is the closed
//! set the rest of the crate dispatches on.

pub(crate) mod mysql;
pub(crate) mod postgres;
pub(crate) mod sqlite;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::backup::record::DatabaseType;
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};

pub use mysql::MysqlEngine;
pub use postgres::PostgresEngine;
pub use sqlite::SqliteEngine;

/// Where a restore may park files it produces along the way.
#[derive(Debug, Clone)]
pub struct RestoreContext {
    pub safety_dir: PathBuf,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreOutcome {
    /// Copy of the live database taken before it was replaced. SQLite keeps the
    /// old file, MySQL a pre-restore mysqldump snapshot.
    pub safety_copy: Option<PathBuf>,
}

/// Common interface of every supported engine.
pub trait DumpStrategy {
    fn database_type(&self) -> DatabaseType;

    /// Checks that the engine's tools and target are reachable before any work starts.
    fn preflight(&self) -> Result<()>;

    /// Writes an uncompressed dump to `dest`. Returns its size in bytes.
    fn dump(&self, dest: &Path) -> Result<u64>;

    /// Directory the decompressed dump should be staged in before `restore`.
    fn staging_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Applies a decompressed dump to the live database. A failed restore leaves
    /// the previous contents in place.
    fn restore(&self, dump: &Path, ctx: &RestoreContext) -> Result<RestoreOutcome>;

    /// Checks that a decompressed dump looks like something this engine produced.
    fn validate_dump(&self, dump: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum DatabaseEngine {
    Sqlite(SqliteEngine),
    Postgres(PostgresEngine),
    Mysql(MysqlEngine),
}

impl DatabaseEngine {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        match config {
            DatabaseConfig::Sqlite { path } => Ok(Self::Sqlite(SqliteEngine::new(path.clone()))),
            DatabaseConfig::Postgresql { url } => Ok(Self::Postgres(PostgresEngine::new(url)?)),
            DatabaseConfig::Mysql { url } => Ok(Self::Mysql(MysqlEngine::new(url)?)),
        }
    }

    fn strategy(&self) -> &dyn DumpStrategy {
        match self {
            Self::Sqlite(engine) => engine,
            Self::Postgres(engine) => engine,
            Self::Mysql(engine) => engine,
        }
    }
}

impl DumpStrategy for DatabaseEngine {
    fn database_type(&self) -> DatabaseType {
        self.strategy().database_type()
    }

    fn preflight(&self) -> Result<()> {
        self.strategy().preflight()
    }

    fn dump(&self, dest: &Path) -> Result<u64> {
        self.strategy().dump(dest)
    }

    fn staging_dir(&self) -> Option<PathBuf> {
        self.strategy().staging_dir()
    }

    fn restore(&self, dump: &Path, ctx: &RestoreContext) -> Result<RestoreOutcome> {
        self.strategy().restore(dump, ctx)
    }

    fn validate_dump(&self, dump: &Path) -> Result<()> {
        self.strategy().validate_dump(dump)
    }
}

/// Checks a decompressed payload against the signature of the engine that
/// produced it, without needing a connection to that engine.
pub fn check_dump_signature(database_type: DatabaseType, dump: &Path) -> Result<()> {
    match database_type {
        DatabaseType::Sqlite => sqlite::check_dump_signature(dump),
        DatabaseType::Postgresql => postgres::check_dump_signature(dump),
        DatabaseType::Mysql => mysql::check_dump_signature(dump),
        DatabaseType::Application => Err(BackupError::restore(format!(
            "{} is an application export, not a database dump",
            dump.display()
        ))),
    }
}

/// Runs an external client tool, turning a non-zero exit into [`BackupError::Command`].
pub(crate) fn run_command(command: &mut Command) -> Result<Output> {
    let output = command.output()?;
    if !output.status.success() {
        return Err(BackupError::Command {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: format!(
                "{} ({})",
                String::from_utf8_lossy(&output.stderr).trim(),
                output.status
            ),
        });
    }
    Ok(output)
}

/// Reads the first few KiB of a text dump and looks for any of `markers`.
pub(crate) fn head_contains(path: &Path, markers: &[&str]) -> Result<bool> {
    let mut head = Vec::with_capacity(4096);
    File::open(path)?.take(4096).read_to_end(&mut head)?;
    let text = String::from_utf8_lossy(&head);
    Ok(markers.iter().any(|m| text.contains(m)))
}

pub(crate) fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
