// inventory-backup/src/engine/postgres.rs
use std::path::{Path, PathBuf};
use std::process::Command;
use url::Url;

use super::{DumpStrategy, RestoreContext, RestoreOutcome, file_size, head_contains, run_command};
use crate::backup::record::DatabaseType;
use crate::errors::{BackupError, Result};
use crate::utils::find_executable;

/// Server engine driven through `pg_dump` and `psql`.
#[derive(Debug, Clone)]
pub struct PostgresEngine {
    url: String,
}

impl PostgresEngine {
    pub fn new(url: &str) -> Result<Self> {
        get_db_name_from_url(url)?;
        Ok(Self { url: url.to_string() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn pg_dump(&self) -> Result<PathBuf> {
        find_executable("pg_dump")
    }

    fn psql(&self) -> Result<PathBuf> {
        find_executable("psql")
    }
}

/// Extracts the database name from a PostgreSQL connection URL.
pub fn get_db_name_from_url(db_url: &str) -> Result<String> {
    let parsed_url = Url::parse(db_url)
        .map_err(|e| BackupError::config(format!("Invalid database URL format: {}", e)))?;
    let path = parsed_url.path().trim_start_matches('/');
    if path.is_empty() {
        Err(BackupError::config(format!(
            "Database name not found in URL path for host {}",
            parsed_url.host_str().unwrap_or("unknown_host")
        )))
    } else {
        Ok(path.to_string())
    }
}

impl DumpStrategy for PostgresEngine {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    fn preflight(&self) -> Result<()> {
        self.pg_dump()?;
        self.psql()?;
        Ok(())
    }

    fn dump(&self, dest: &Path) -> Result<u64> {
        let pg_dump_path = self.pg_dump().map_err(|e| BackupError::dump(e.to_string()))?;
        let db_name = get_db_name_from_url(&self.url)?;
        tracing::info!("Dumping PostgreSQL database {} with pg_dump...", db_name);

        // --clean lets the dump be replayed over an existing schema inside one transaction.
        run_command(
            Command::new(&pg_dump_path)
                .arg("--clean")
                .arg("--if-exists")
                .arg("--no-owner")
                .arg("--no-privileges")
                .arg("-f")
                .arg(dest)
                .arg(&self.url),
        )
        .map_err(|e| BackupError::dump(format!("pg_dump for database {} failed: {}", db_name, e)))?;

        tracing::info!("✓ Database {} dumped successfully via pg_dump", db_name);
        file_size(dest)
    }

    fn restore(&self, dump: &Path, _ctx: &RestoreContext) -> Result<RestoreOutcome> {
        let psql_path = self.psql().map_err(|e| BackupError::restore(e.to_string()))?;
        let db_name = get_db_name_from_url(&self.url)?;
        tracing::info!("Applying {} to {} in a single transaction", dump.display(), db_name);

        run_command(
            Command::new(psql_path)
                .arg("-X") // Do not read psqlrc
                .arg("-q")
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("--single-transaction")
                .arg("-d")
                .arg(&self.url)
                .arg("-f")
                .arg(dump),
        )
        .map_err(|e| {
            BackupError::restore(format!(
                "psql rolled back the restore of {} into {}: {}",
                dump.display(),
                db_name,
                e
            ))
        })?;

        Ok(RestoreOutcome::default())
    }

    fn validate_dump(&self, dump: &Path) -> Result<()> {
        check_dump_signature(dump)
    }
}

pub(crate) fn check_dump_signature(dump: &Path) -> Result<()> {
    if !head_contains(dump, &["PostgreSQL database dump"])? {
        return Err(BackupError::restore(format!(
            "{} is not a pg_dump script",
            dump.display()
        )));
    }
    Ok(())
}
