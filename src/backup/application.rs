// inventory-backup/src/backup/application.rs
//! Application backups: non-secret configuration and domain definitions
//! (store settings, custom fields, workflow rules) exported by the host app.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{BackupError, Result};

/// One named collection of exported records.
#[derive(Debug, Clone)]
pub struct ExportedRecordSet {
    pub name: String,
    pub records: Value,
}

/// Read-only view over the host application's exportable records.
pub trait RecordExporter {
    fn export(&self) -> Result<Vec<ExportedRecordSet>>;
}

/// Reads JSON exports the host application drops on disk.
#[derive(Debug, Clone)]
pub struct JsonFileExporter {
    sources: BTreeMap<String, PathBuf>,
}

impl JsonFileExporter {
    pub fn new(sources: BTreeMap<String, PathBuf>) -> Self {
        Self { sources }
    }
}

impl RecordExporter for JsonFileExporter {
    fn export(&self) -> Result<Vec<ExportedRecordSet>> {
        self.sources
            .iter()
            .map(|(name, path)| {
                let content = fs::read_to_string(path).map_err(|e| {
                    BackupError::dump(format!(
                        "Failed to read application export {} from {}: {}",
                        name,
                        path.display(),
                        e
                    ))
                })?;
                let records: Value = serde_json::from_str(&content).map_err(|e| {
                    BackupError::dump(format!("Application export {} is not valid JSON: {}", name, e))
                })?;
                Ok(ExportedRecordSet {
                    name: name.clone(),
                    records,
                })
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ExportManifest<'a> {
    exported_at: String,
    environment: &'a str,
    record_sets: BTreeMap<String, usize>,
    redacted_fields: usize,
}

/// Removes every object key that contains one of `deny` (case-insensitive).
/// Returns how many fields were dropped.
pub fn redact_secrets(value: &mut Value, deny: &[String]) -> usize {
    match value {
        Value::Object(map) => {
            let doomed: Vec<String> = map
                .keys()
                .filter(|k| {
                    let key = k.to_ascii_lowercase();
                    deny.iter().any(|d| key.contains(&d.to_ascii_lowercase()))
                })
                .cloned()
                .collect();
            let mut removed = doomed.len();
            for key in doomed {
                map.remove(&key);
            }
            removed += map.values_mut().map(|v| redact_secrets(v, deny)).sum::<usize>();
            removed
        }
        Value::Array(items) => items.iter_mut().map(|v| redact_secrets(v, deny)).sum(),
        _ => 0,
    }
}

fn record_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

/// Record sets become `<name>.json` inside the export, next to `manifest.json`.
/// Names are limited to ASCII letters, digits, `_` and `-` so they can neither
/// leave the export directory nor overwrite the manifest.
pub fn check_record_set_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BackupError::config("Application record set name cannot be empty"));
    }
    if name.eq_ignore_ascii_case("manifest") {
        return Err(BackupError::config("Application record set name 'manifest' is reserved"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(BackupError::config(format!(
            "Application record set name {:?} may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Writes the redacted export plus a manifest into `dest_dir`.
pub fn write_export(
    exporter: &dyn RecordExporter,
    deny: &[String],
    environment: &str,
    dest_dir: &Path,
) -> Result<usize> {
    let sets = exporter.export()?;
    if sets.is_empty() {
        return Err(BackupError::dump("No application record sets configured for export"));
    }

    let mut record_sets = BTreeMap::new();
    let mut redacted_fields = 0;
    for mut set in sets {
        check_record_set_name(&set.name)?;
        if record_sets.contains_key(&set.name) {
            return Err(BackupError::config(format!(
                "Application record set {} is exported twice",
                set.name
            )));
        }
        redacted_fields += redact_secrets(&mut set.records, deny);
        record_sets.insert(set.name.clone(), record_count(&set.records));
        let path = dest_dir.join(format!("{}.json", set.name));
        fs::write(&path, serde_json::to_vec_pretty(&set.records)?)?;
    }

    if redacted_fields > 0 {
        tracing::info!("🔒 Removed {} secret fields from application export", redacted_fields);
    }

    let total = record_sets.len();
    let manifest = ExportManifest {
        exported_at: chrono::Utc::now().to_rfc3339(),
        environment,
        record_sets,
        redacted_fields,
    };
    fs::write(dest_dir.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;
    Ok(total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ApplicationExportConfig;
    use serde_json::json;

    pub(crate) struct StaticExporter(pub Vec<ExportedRecordSet>);

    impl RecordExporter for StaticExporter {
        fn export(&self) -> Result<Vec<ExportedRecordSet>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_redaction_strips_tokens_at_any_depth() {
        let deny = ApplicationExportConfig::default().redact_keys;
        let mut store = json!({
            "shop_domain": "acme.myshopify.com",
            "access_token": "shpat_123",
            "settings": {
                "low_stock_threshold": 5,
                "webhook_secret": "abc",
                "integrations": [{"name": "erp", "API_KEY": "k"}]
            }
        });

        let removed = redact_secrets(&mut store, &deny);

        assert_eq!(removed, 3);
        assert_eq!(
            store,
            json!({
                "shop_domain": "acme.myshopify.com",
                "settings": {
                    "low_stock_threshold": 5,
                    "integrations": [{"name": "erp"}]
                }
            })
        );
    }

    #[test]
    fn test_write_export_produces_manifest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let exporter = StaticExporter(vec![
            ExportedRecordSet {
                name: "store_settings".to_string(),
                records: json!([{"shop": "acme", "password": "hunter2"}]),
            },
            ExportedRecordSet {
                name: "workflow_rules".to_string(),
                records: json!([{"id": 1}, {"id": 2}]),
            },
        ]);
        let deny = ApplicationExportConfig::default().redact_keys;

        let sets = write_export(&exporter, &deny, "staging", dir.path())?;
        assert_eq!(sets, 2);

        let manifest: Value = serde_json::from_slice(&fs::read(dir.path().join("manifest.json"))?)?;
        assert_eq!(manifest["environment"], "staging");
        assert_eq!(manifest["record_sets"]["workflow_rules"], 2);
        assert_eq!(manifest["redacted_fields"], 1);

        let settings = fs::read_to_string(dir.path().join("store_settings.json"))?;
        assert!(!settings.contains("hunter2"));
        Ok(())
    }

    #[test]
    fn test_record_set_names_stay_inside_the_export() {
        for good in ["store_settings", "custom-fields", "Rules2"] {
            assert!(check_record_set_name(good).is_ok(), "{}", good);
        }
        for bad in ["", "manifest", "Manifest", "../escape", "nested/set", "win\\set", ".hidden", "a..b", "a b"] {
            let err = check_record_set_name(bad).unwrap_err();
            assert!(matches!(err, BackupError::Configuration(_)), "{}", bad);
        }
    }

    #[test]
    fn test_write_export_refuses_unsafe_names() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("export");
        fs::create_dir_all(&dest)?;

        for name in ["manifest", "../outside"] {
            let exporter = StaticExporter(vec![ExportedRecordSet {
                name: name.to_string(),
                records: json!([{"id": 1}]),
            }]);
            assert!(write_export(&exporter, &[], "staging", &dest).is_err());
        }
        assert!(!root.path().join("outside.json").exists());
        assert!(!dest.join("manifest.json").exists());
        Ok(())
    }

    #[test]
    fn test_file_exporter_reports_invalid_json() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fields.json");
        fs::write(&path, b"{not json")?;
        let exporter = JsonFileExporter::new(BTreeMap::from([("custom_fields".to_string(), path)]));
        assert!(matches!(exporter.export(), Err(BackupError::Dump(_))));
        Ok(())
    }
}
