//! PDF Reader Cache Library
//!
//! Memory-bounded cache of rendered pages, rendered tiles and extracted text,
//! shared by every open document under a single byte budget.

pub mod config;
pub mod page_cache;
pub mod types;

pub use config::{CacheConfig, ConfigError};
pub use page_cache::{CacheStats, CacheWriter, PageCache};
pub use types::{
    estimate_bytes, Annotation, Bookmark, CachedPage, CachedTile, DocumentId, PageText, PdfInfo,
    PdfRect, TextItem, TileRect,
};
