use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VaultError};

pub const DEFAULT_NOTES_DIR: &str = "notes";
pub const DEFAULT_AUTHOR: &str = "mdvault";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_TIMEOUT_SECS: f64 = 5.0;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Upper bound for `batch_timeout_secs`: one day.
pub const MAX_BATCH_TIMEOUT_SECS: f64 = 86_400.0;

/// How note mutations reach the vector index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStrategy {
    /// Embed synchronously inside the mutating call; no queue.
    Immediate,
    /// Queue tasks and flush whenever the queue reaches the batch size.
    #[default]
    Batch,
    /// Queue tasks and let a worker thread flush them.
    Background,
}

impl std::fmt::Display for IndexingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Batch => write!(f, "batch"),
            Self::Background => write!(f, "background"),
        }
    }
}

impl std::str::FromStr for IndexingStrategy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "batch" => Ok(Self::Batch),
            "background" => Ok(Self::Background),
            _ => Err(VaultError::configuration(
                "parse_indexing_strategy",
                format!("Invalid indexing strategy: {}", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub strategy: IndexingStrategy,
    pub batch_size: usize,
    pub batch_timeout_secs: f64,
    pub poll_interval_ms: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            strategy: IndexingStrategy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl IndexingConfig {
    /// Unrepresentable values (negative, NaN, infinite, overflowing) fall
    /// back to the default timeout.
    pub fn batch_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.batch_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_BATCH_TIMEOUT_SECS))
    }

    /// Never zero, so the worker cannot spin.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Vault settings. Loaded from YAML or built in code, then optionally
/// overridden from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub vault_path: PathBuf,
    /// Subdirectory of the vault root where notes land when the filename has
    /// no directory part.
    pub default_notes_dir: String,
    pub default_author: String,
    pub vector_search_enabled: bool,
    pub indexing: IndexingConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::new(),
            default_notes_dir: DEFAULT_NOTES_DIR.to_string(),
            default_author: DEFAULT_AUTHOR.to_string(),
            vector_search_enabled: true,
            indexing: IndexingConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        Self {
            vault_path: vault_path.into(),
            ..Self::default()
        }
    }

    /// Read a YAML config file. Missing keys fall back to defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            VaultError::configuration(
                "load_config",
                format!("Failed to read config {}: {}", path.display(), e),
            )
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            VaultError::configuration(
                "load_config",
                format!("Failed to parse config {}: {}", path.display(), e),
            )
        })
    }

    /// Apply environment overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MDVAULT_DEFAULT_AUTHOR` | `default_author` |
    /// | `MDVAULT_NOTES_DIR` | `default_notes_dir` |
    /// | `MDVAULT_VECTOR_SEARCH` | `vector_search_enabled` (`false`/`0` disables) |
    /// | `MDVAULT_INDEXING_STRATEGY` | `indexing.strategy` |
    /// | `MDVAULT_BATCH_SIZE` | `indexing.batch_size` |
    /// | `MDVAULT_BATCH_TIMEOUT_SECS` | `indexing.batch_timeout_secs` |
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(author) = std::env::var("MDVAULT_DEFAULT_AUTHOR") {
            self.default_author = author;
        }
        if let Ok(dir) = std::env::var("MDVAULT_NOTES_DIR") {
            self.default_notes_dir = dir;
        }
        if let Ok(v) = std::env::var("MDVAULT_VECTOR_SEARCH") {
            self.vector_search_enabled = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("MDVAULT_INDEXING_STRATEGY") {
            self.indexing.strategy = v.parse()?;
        }
        if let Ok(v) = std::env::var("MDVAULT_BATCH_SIZE") {
            self.indexing.batch_size = v.parse().map_err(|_| {
                VaultError::configuration("load_config", format!("Invalid MDVAULT_BATCH_SIZE: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("MDVAULT_BATCH_TIMEOUT_SECS") {
            self.indexing.batch_timeout_secs = v.parse().map_err(|_| {
                VaultError::configuration(
                    "load_config",
                    format!("Invalid MDVAULT_BATCH_TIMEOUT_SECS: {}", v),
                )
            })?;
        }
        Ok(self)
    }

    pub fn with_default_author(mut self, author: &str) -> Self {
        self.default_author = author.to_string();
        self
    }

    pub fn with_notes_dir(mut self, dir: &str) -> Self {
        self.default_notes_dir = dir.to_string();
        self
    }

    pub fn with_vector_search(mut self, enabled: bool) -> Self {
        self.vector_search_enabled = enabled;
        self
    }

    pub fn with_strategy(mut self, strategy: IndexingStrategy) -> Self {
        self.indexing.strategy = strategy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.indexing.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout_secs(mut self, secs: f64) -> Self {
        self.indexing.batch_timeout_secs = secs;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.indexing.poll_interval_ms = ms;
        self
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.vault_path.join(&self.default_notes_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.vault_path.is_dir() {
            return Err(VaultError::configuration(
                "validate_config",
                format!("Vault root does not exist: {}", self.vault_path.display()),
            ));
        }
        let notes_dir = Path::new(&self.default_notes_dir);
        if notes_dir.is_absolute()
            || notes_dir.components().any(|c| matches!(c, Component::ParentDir))
        {
            return Err(VaultError::configuration(
                "validate_config",
                format!("Notes directory must stay inside the vault: {}", self.default_notes_dir),
            ));
        }
        if self.indexing.batch_size == 0 {
            return Err(VaultError::configuration(
                "validate_config",
                "batch_size must be at least 1",
            ));
        }
        let timeout = self.indexing.batch_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_BATCH_TIMEOUT_SECS {
            return Err(VaultError::configuration(
                "validate_config",
                format!(
                    "batch_timeout_secs must be in (0, {}], got {}",
                    MAX_BATCH_TIMEOUT_SECS, timeout
                ),
            ));
        }
        if self.indexing.poll_interval_ms == 0 {
            return Err(VaultError::configuration(
                "validate_config",
                "poll_interval_ms must be at least 1",
            ));
        }
        Ok(())
    }
}
