// inventory-backup/src/catalog/verification.rs
use serde::Serialize;
use std::path::Path;

use crate::backup::archive;
use crate::backup::record::{read_metadata, sidecar_path_for};

/// Compressed bytes a restore is assumed to chew through per minute.
const RESTORE_BYTES_PER_MINUTE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub file_exists: bool,
    pub metadata_exists: bool,
    pub checksum_valid: bool,
    pub readable: bool,
    pub estimated_restore_minutes: u64,
    pub size_bytes: u64,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.file_exists && self.metadata_exists && self.checksum_valid && self.readable
    }
}

pub fn estimate_restore_minutes(size_bytes: u64) -> u64 {
    size_bytes.div_ceil(RESTORE_BYTES_PER_MINUTE).max(1)
}

/// Recomputes the checksum, checks the sidecar and inflates the first block.
///
/// Every problem is recorded in the report rather than raised, so one bad
/// artifact never stops a sweep over the catalog.
pub fn verify_artifact(path: &Path) -> IntegrityReport {
    let mut report = IntegrityReport {
        file_exists: path.is_file(),
        ..Default::default()
    };

    if report.file_exists {
        match std::fs::metadata(path) {
            Ok(meta) => {
                report.size_bytes = meta.len();
                report.estimated_restore_minutes = estimate_restore_minutes(meta.len());
            }
            Err(e) => report.errors.push(format!("Cannot stat artifact: {}", e)),
        }
    } else {
        report
            .errors
            .push(format!("Backup file not found: {}", path.display()));
    }

    let sidecar = sidecar_path_for(path);
    let metadata = if sidecar.is_file() {
        report.metadata_exists = true;
        match read_metadata(&sidecar) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                report
                    .errors
                    .push(format!("Sidecar {} is unreadable: {}", sidecar.display(), e));
                None
            }
        }
    } else {
        report
            .errors
            .push(format!("Metadata file not found: {}", sidecar.display()));
        None
    };

    if report.file_exists {
        if let Some(metadata) = &metadata {
            match archive::sha256_file(path) {
                Ok(actual) if actual == metadata.checksum => report.checksum_valid = true,
                Ok(actual) => report.errors.push(format!(
                    "Checksum mismatch: expected {}, got {}",
                    metadata.checksum, actual
                )),
                Err(e) => report.errors.push(format!("Failed to hash artifact: {}", e)),
            }
        }

        match archive::read_first_block(path) {
            Ok(_) => report.readable = true,
            Err(e) => report.errors.push(e.to_string()),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_estimate_has_a_floor() {
        assert_eq!(estimate_restore_minutes(0), 1);
        assert_eq!(estimate_restore_minutes(1024), 1);
        assert_eq!(estimate_restore_minutes(25 * 1024 * 1024), 3);
    }

    #[test]
    fn test_missing_everything() {
        let report = verify_artifact(Path::new("/nonexistent/daily_sqlite_20240101_020000.sqlite3.gz"));
        assert!(!report.file_exists);
        assert!(!report.metadata_exists);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 2);
    }
}
