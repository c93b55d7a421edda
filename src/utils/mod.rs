pub mod setting;

use std::path::PathBuf;
use which::which;

use crate::errors::{BackupError, Result};

/// Finds a database client tool (pg_dump, psql, mysqldump, sendmail...) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        BackupError::config(format!(
            "{} executable not found in PATH. Please ensure the client tools are installed and in your PATH.",
            name
        ))
    })
}

/// Configures the global tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`. With `BACKUP_LOG_FILE` set, logs are
/// appended to that file in a detailed format; otherwise they go to stderr in
/// a compact one so they never mix with command output on stdout.
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("BACKUP_LOG_FILE").ok().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("⚠️ Cannot open log file {}: {}, logging to stderr", path, e);
                None
            }
        }
    });

    if let Some(file) = log_file {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .compact()
            .init();
    }
}

/// `1536` -> `1.5 KiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn test_missing_executable_is_a_configuration_error() {
        let err = find_executable("definitely-not-a-real-backup-tool").unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }
}
