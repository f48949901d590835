//! CLI subcommands

pub mod index;
pub mod inspect;
pub mod search;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use unicode_width::UnicodeWidthChar;

use record_search::core::config::Config;
use record_search::core::source::{FileRecordSource, RecordSource};
use record_search::core::sqlite::SqliteRecordSource;
use record_search::search::VectorizerBackend;

/// Everything a command needs: config, record source, backend
pub struct Workspace {
    pub config: Config,
    pub source: Arc<dyn RecordSource>,
    /// Set when the source is a SQLite table, for SQL-side filtering
    pub sqlite: Option<Arc<SqliteRecordSource>>,
}

impl Workspace {
    pub fn open(
        config_path: Option<&Path>,
        source: Option<PathBuf>,
        table: Option<String>,
    ) -> Result<Self> {
        let mut config = Config::load(config_path)?;
        if let Some(source) = source {
            config.source = source;
        }
        if table.is_some() {
            config.table = table;
        }

        if config.source_is_sqlite() {
            let Some(table) = config.table.clone() else {
                bail!(
                    "SQLite source {} needs a table (--table or `table:` in config)",
                    config.source.display()
                );
            };
            let sqlite = Arc::new(SqliteRecordSource::new(
                &config.source,
                table,
                &config.id_field,
            ));
            return Ok(Self {
                source: sqlite.clone(),
                sqlite: Some(sqlite),
                config,
            });
        }

        let source = Arc::new(FileRecordSource::new(&config.source, &config.id_field));
        Ok(Self {
            config,
            source,
            sqlite: None,
        })
    }

    /// Pick the backend once for this process
    pub fn backend(&self) -> VectorizerBackend {
        VectorizerBackend::select(self.config.preferred_model.as_deref())
    }

    pub fn index_prefix(&self) -> &Path {
        &self.config.index_prefix
    }
}

/// Cut `text` to `max` terminal columns (CJK counts double)
pub fn truncate_columns(text: &str, max: usize) -> String {
    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > max {
            out.push_str("...");
            return out;
        }
        width += w;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_columns() {
        assert_eq!(truncate_columns("abc", 5), "abc");
        assert_eq!(truncate_columns("中国弹药", 4), "中国...");
        assert_eq!(truncate_columns("ab中", 3), "ab...");
    }
}
