//! Cache configuration
//!
//! The page cache has a single byte budget shared by every open document.
//! Configuration can be created programmatically, deserialized as part of a
//! larger settings file, or overridden from environment variables.

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

/// Configuration for the page cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Global byte budget across all documents
    pub max_bytes: usize,
    /// Maximum number of pages of extracted text kept per document
    pub max_text_pages: usize,
    /// Fixed memory estimate charged for one page of text
    pub text_entry_bytes: usize,
    /// Fraction of raw RGBA size charged when no encoded size is known
    pub estimated_compression_ratio: f64,
    /// Maximum width difference for a page lookup to count as a hit
    pub width_tolerance: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * MB,
            max_text_pages: 100,
            text_entry_bytes: 10 * 1024,
            estimated_compression_ratio: 0.08,
            width_tolerance: 1.0,
        }
    }
}

impl CacheConfig {
    /// Sets the byte budget in megabytes, saturating at `usize::MAX`.
    pub fn with_max_mb(mut self, mb: usize) -> Self {
        self.max_bytes = mb.saturating_mul(MB);
        self
    }

    /// Sets the byte budget in bytes.
    pub fn with_max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Sets the per-document text page limit.
    pub fn with_max_text_pages(mut self, pages: usize) -> Self {
        self.max_text_pages = pages;
        self
    }

    /// Sets the fixed text entry estimate.
    pub fn with_text_entry_bytes(mut self, bytes: usize) -> Self {
        self.text_entry_bytes = bytes;
        self
    }

    /// Sets the fallback compression ratio.
    pub fn with_compression_ratio(mut self, ratio: f64) -> Self {
        self.estimated_compression_ratio = ratio;
        self
    }

    /// Returns the byte budget in megabytes.
    pub fn max_mb(&self) -> usize {
        self.max_bytes / MB
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `PDF_READER_CACHE_MB`: cache budget in MB (default: 512)
    /// - `PDF_READER_TEXT_PAGES`: text pages kept per document (default: 100)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides to this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(mb) = env_usize("PDF_READER_CACHE_MB")? {
            self.max_bytes = mb.checked_mul(MB).ok_or_else(|| ConfigError::InvalidValue {
                key: "PDF_READER_CACHE_MB".to_string(),
                value: mb.to_string(),
            })?;
        }
        if let Some(pages) = env_usize("PDF_READER_TEXT_PAGES")? {
            self.max_text_pages = pages;
        }
        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.estimated_compression_ratio > 0.0 && self.estimated_compression_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "estimated_compression_ratio".to_string(),
                value: self.estimated_compression_ratio.to_string(),
            });
        }
        if self.width_tolerance.is_nan() || self.width_tolerance < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "width_tolerance".to_string(),
                value: self.width_tolerance.to_string(),
            });
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur while building a cache configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
