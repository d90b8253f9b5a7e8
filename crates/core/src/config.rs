//! Reader configuration
//!
//! One TOML document with a table per subsystem:
//!
//! ```toml
//! [cache]
//! max_bytes = 268435456
//!
//! [scheduler]
//! max_concurrency = 2
//! task_timeout_secs = 30.0
//!
//! [tiles]
//! tile_size = 256
//! overscan_ratio = 1.0
//! ```
//!
//! Missing tables and keys fall back to their defaults.

use crate::error::{ReaderError, ReaderResult};
use pdf_reader_cache::CacheConfig;
use pdf_reader_render::TileConfig;
use pdf_reader_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for every subsystem of the reader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub tiles: TileConfig,
}

impl ReaderConfig {
    /// Default location of the configuration file.
    ///
    /// - macOS: ~/Library/Application Support/pdf-reader/config.toml
    /// - Linux: ~/.config/pdf-reader/config.toml
    /// - Windows: %APPDATA%\pdf-reader\config.toml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("pdf-reader").join("config.toml"),
            None => PathBuf::from("pdf-reader.toml"),
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ReaderResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| ReaderError::io(path, err))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(contents: &str) -> ReaderResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path` if it exists, otherwise the defaults, then
    /// applies environment overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> ReaderResult<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ReaderResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| ReaderError::io(parent, err))?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|err| ReaderError::io(path, err))
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> ReaderResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// Environment variables:
    /// - `PDF_READER_CACHE_MB`, `PDF_READER_TEXT_PAGES`: see [`CacheConfig::from_env`]
    /// - `PDF_READER_MAX_CONCURRENCY`: concurrent backend calls
    pub fn with_env_overrides(mut self) -> ReaderResult<Self> {
        self.cache = self.cache.with_env_overrides()?;
        if let Ok(value) = std::env::var("PDF_READER_MAX_CONCURRENCY") {
            let max = value.trim().parse::<usize>().map_err(|_| {
                pdf_reader_cache::ConfigError::InvalidValue {
                    key: "PDF_READER_MAX_CONCURRENCY".to_string(),
                    value: value.clone(),
                }
            })?;
            self.scheduler = self.scheduler.with_max_concurrency(max);
        }
        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> ReaderResult<()> {
        self.cache.validate()?;
        if self.tiles.tile_size == 0 {
            return Err(invalid("tiles.tile_size", self.tiles.tile_size));
        }
        if !self.tiles.overscan_ratio.is_finite() || self.tiles.overscan_ratio < 0.0 {
            return Err(invalid("tiles.overscan_ratio", self.tiles.overscan_ratio));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(invalid(
                "scheduler.max_concurrency",
                self.scheduler.max_concurrency,
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ReaderError {
    pdf_reader_cache::ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}
