use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "recsearch.yaml";

/// Runtime configuration, all fields optional in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory/file of JSON or YAML records, or a SQLite database
    pub source: PathBuf,
    /// Table to read when `source` is a SQLite database
    pub table: Option<String>,
    pub id_field: String,
    pub index_prefix: PathBuf,
    /// Dense model to try first (e.g. `htp-384`); sparse when unavailable
    pub preferred_model: Option<String>,
    pub recall_multiplier: usize,
    pub default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: PathBuf::from("records"),
            table: None,
            id_field: "id".to_string(),
            index_prefix: PathBuf::from(".recsearch/index"),
            preferred_model: None,
            recall_multiplier: 5,
            default_limit: 5,
        }
    }
}

impl Config {
    /// Load `path`, or the default file if present, or built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(content)?;
        config.recall_multiplier = config.recall_multiplier.max(1);
        config.default_limit = config.default_limit.max(1);
        Ok(config)
    }

    /// SQLite sources are recognised by extension
    pub fn source_is_sqlite(&self) -> bool {
        matches!(
            self.source
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .as_deref(),
            Some("db" | "sqlite" | "sqlite3")
        )
    }
}
