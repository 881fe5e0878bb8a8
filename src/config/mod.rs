use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::key::IdentityKey;
use crate::logging::LoggingConfig;
use crate::record_set::STATUS_COLUMN;
use crate::store::RecordStore;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory that relative source files are resolved against
    pub data_directory: PathBuf,
    pub status_column: String,
}

/// One scraping target: where its store lives and what identifies its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub file: PathBuf,
    pub key: IdentityKey,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_directory: get_data_directory(),
            status_column: STATUS_COLUMN.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            debug!("No configuration file at {}, using defaults", config_path.display());
            let mut config = Self::default();
            ConfigOverrides::apply(&mut config);
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;

        ConfigOverrides::apply(&mut config);
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.status_column.is_empty() {
            return Err(anyhow::anyhow!("store.status_column must not be empty"));
        }

        for (i, source) in self.sources.iter().enumerate() {
            if source.name.is_empty() {
                return Err(anyhow::anyhow!("Source #{} has no name", i + 1));
            }
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(anyhow::anyhow!("Source '{}' is defined twice", source.name));
            }
            if source.file.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("Source '{}' has no file", source.name));
            }
            if source.key.fields().iter().any(|f| f.eq_ignore_ascii_case(&self.store.status_column)) {
                return Err(anyhow::anyhow!(
                    "Source '{}' uses the status column '{}' as a key field",
                    source.name,
                    self.store.status_column
                ));
            }
        }

        Ok(())
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow::anyhow!("Unknown source '{}'", name))
    }

    /// Store for a configured source
    pub fn store_for(&self, name: &str) -> Result<RecordStore> {
        let source = self.source(name)?;
        let store = self.store_at(self.resolve(&source.file), source.key.clone())?;
        Ok(store.with_source(source.name.clone()))
    }

    /// Store at an explicit path, using the configured status column.
    /// Fails when the key names the status column.
    pub fn store_at(&self, path: impl Into<PathBuf>, key: IdentityKey) -> Result<RecordStore> {
        let store = RecordStore::new(path, key).with_status_column(self.store.status_column.clone());
        store
            .empty_set()
            .check_key()
            .with_context(|| format!("Cannot use key '{}' for {}", store.key(), store.path().display()))?;
        Ok(store)
    }

    /// Resolve a source file against the data directory
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.store.data_directory.join(file)
        }
    }
}

/// Get the default data directory
fn get_data_directory() -> PathBuf {
    directories::ProjectDirs::from("com", "lstore", "listing-store")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Get the configuration file path
pub fn get_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "lstore", "listing-store")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Environment-based configuration overrides
pub struct ConfigOverrides;

impl ConfigOverrides {
    /// Apply environment variable overrides to configuration
    pub fn apply(config: &mut AppConfig) {
        Self::apply_from(config, |name| std::env::var(name).ok());
    }

    fn apply_from<F>(config: &mut AppConfig, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("LSTORE_DATA_DIR") {
            config.store.data_directory = PathBuf::from(dir);
        }

        if let Some(column) = var("LSTORE_STATUS_COLUMN") {
            config.store.status_column = column;
        }

        if let Some(level) = var("LSTORE_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
