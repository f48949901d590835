//! Record sources: where the engine pulls its snapshot from

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::record::Record;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid record in {origin}: {reason}")]
    InvalidRecord { origin: String, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Read-only access to the records being indexed
pub trait RecordSource: Send + Sync {
    /// Snapshot of every current record
    fn list_all(&self) -> Result<Vec<Record>, SourceError>;

    /// Resolve records by id; unknown ids are skipped, order is unspecified
    fn fetch(&self, ids: &[i64]) -> Result<Vec<Record>, SourceError> {
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| wanted.contains(&r.id))
            .collect())
    }
}

/// In-memory source, mostly for embedding callers and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl RecordSource for MemorySource {
    fn list_all(&self) -> Result<Vec<Record>, SourceError> {
        Ok(self.records.clone())
    }
}

/// Records stored as JSON or YAML files
///
/// `root` is either a single file or a directory searched recursively.
/// Each file holds an array of objects or `{"records": [...]}`.
pub struct FileRecordSource {
    root: PathBuf,
    id_field: String,
}

impl FileRecordSource {
    pub fn new(root: impl Into<PathBuf>, id_field: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            id_field: id_field.into(),
        }
    }

    fn record_files(&self) -> Vec<PathBuf> {
        if self.root.is_file() {
            return vec![self.root.clone()];
        }

        // Hidden entries (e.g. a `.recsearch/` index directory) are skipped
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_record_file(p))
            .collect();
        files.sort();
        files
    }

    fn load_file(&self, path: &Path) -> Result<Vec<Record>, SourceError> {
        let content = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_err = |reason: String| SourceError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        let value: serde_json::Value = match extension(path).as_deref() {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
            }
            _ => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };

        let items = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut obj) => match obj.remove("records") {
                Some(serde_json::Value::Array(items)) => items,
                _ => return Err(parse_err("expected an array or {\"records\": [...]}".into())),
            },
            serde_json::Value::Null => Vec::new(),
            _ => return Err(parse_err("expected an array or {\"records\": [...]}".into())),
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let origin = format!("{}#{}", path.display(), i);
                let serde_json::Value::Object(obj) = item else {
                    return Err(SourceError::InvalidRecord {
                        origin,
                        reason: "record is not an object".into(),
                    });
                };
                Record::from_json_object(obj, &self.id_field).ok_or_else(|| {
                    SourceError::InvalidRecord {
                        origin,
                        reason: format!("missing or non-integer '{}'", self.id_field),
                    }
                })
            })
            .collect()
    }
}

impl RecordSource for FileRecordSource {
    fn list_all(&self) -> Result<Vec<Record>, SourceError> {
        if !self.root.exists() {
            return Err(SourceError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "record source missing"),
            });
        }

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for file in self.record_files() {
            let loaded = self.load_file(&file)?;
            debug!("Loaded {} records from {}", loaded.len(), file.display());
            for record in loaded {
                if seen.insert(record.id) {
                    records.push(record);
                } else {
                    warn!("Duplicate record id {} in {}, keeping first", record.id, file.display());
                }
            }
        }
        Ok(records)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_record_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("json" | "yaml" | "yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::FieldValue;
    use tempfile::TempDir;

    #[test]
    fn test_memory_fetch_skips_unknown() {
        let source = MemorySource::new(vec![Record::new(1), Record::new(2)]);
        let fetched = source.fetch(&[2, 99]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, 2);
    }

    #[test]
    fn test_file_source_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("ammo.json"),
            r#"[{"am_id": 1, "am_name": "A1", "country": "中国"}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("more.yaml"),
            "records:\n  - am_id: 2\n    am_name: B2\n    country: 美国\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = FileRecordSource::new(dir.path(), "am_id");
        let records = source.list_all().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[1].get("country"), Some(&FieldValue::Text("美国".into())));
    }

    #[test]
    fn test_file_source_rejects_missing_id() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), r#"[{"name": "x"}]"#).unwrap();

        let source = FileRecordSource::new(dir.path(), "id");
        let err = source.list_all().unwrap_err();
        assert!(matches!(err, SourceError::InvalidRecord { .. }));
    }

    #[test]
    fn test_file_source_missing_root() {
        let source = FileRecordSource::new("/tmp/definitely/not/here", "id");
        assert!(matches!(source.list_all(), Err(SourceError::Io { .. })));
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"[{"id": 1, "name": "first"}, {"id": 1, "name": "second"}]"#,
        )
        .unwrap();

        let records = FileRecordSource::new(dir.path(), "id").list_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some(&FieldValue::Text("first".into())));
    }
}
