//! Errors raised by the reader core outside of individual render requests.

use pdf_reader_cache::{ConfigError, DocumentId};
use std::path::PathBuf;

/// Configuration and document lifecycle failures
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Reading or writing a file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for [`crate::ReaderConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A configuration value is out of range
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No open document with this id
    #[error("document not open: {0}")]
    DocumentNotOpen(DocumentId),

    /// A document with this id is already open
    #[error("document already open: {0}")]
    DocumentAlreadyOpen(DocumentId),
}

impl ReaderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReaderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for reader core operations
pub type ReaderResult<T> = Result<T, ReaderError>;
