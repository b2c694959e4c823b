//! Store configuration
//!
//! Consumed by the host runtime's config loader; also loadable directly from
//! a TOML file. Example:
//!
//! ```toml
//! table_prefix = "vs_"
//! flush_threshold = 25
//! flush_min_interval_ms = 1000
//! flush_max_interval_ms = 60000
//!
//! [backend]
//! kind = "sqlite"
//! path = "vars.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which durable backend the store writes to
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// No persistence; collections stay in-process
    #[default]
    None,
    /// Debounced whole-namespace snapshots to a JSON file
    Json { path: PathBuf },
    /// Write-through SQLite storage
    Sqlite { path: PathBuf },
    /// Write-through MySQL storage (requires the `mysql` cargo feature)
    Mysql { url: String },
}

/// Full store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    /// Prefix shared by all backend table names
    pub table_prefix: String,
    /// JSON flush: modifications needed before a debounced flush
    pub flush_threshold: u64,
    /// JSON flush: guard interval a burst of mutations must outlast
    pub flush_min_interval_ms: u64,
    /// JSON flush: staleness bound, flush regardless of the counter
    pub flush_max_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::None,
            table_prefix: "vs_".to_string(),
            flush_threshold: 25,
            flush_min_interval_ms: 1_000,
            flush_max_interval_ms: 60_000,
        }
    }
}

impl StoreConfig {
    pub fn flush_min_interval(&self) -> Duration {
        Duration::from_millis(self.flush_min_interval_ms)
    }

    pub fn flush_max_interval(&self) -> Duration {
        Duration::from_millis(self.flush_max_interval_ms)
    }

    /// The table prefix is spliced into SQL unquoted, so it must be a plain
    /// identifier fragment.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        let prefix = &self.table_prefix;
        let valid = !prefix.is_empty()
            && prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(crate::Error::Format(format!(
                "table prefix must be a plain identifier, got {:?}",
                prefix
            )));
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("varstore.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
