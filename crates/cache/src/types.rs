//! Cached artifact types
//!
//! Pixel payloads are reference counted so a cache hit hands out a cheap
//! clone instead of copying image data.

use bytes::Bytes;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of an open document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Arc<str>);

impl DocumentId {
    /// Create an id from any string
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Estimate the memory footprint of a pixel payload
///
/// Uses the encoded byte length when known, otherwise a fraction of the raw
/// RGBA size reflecting expected lossy compression.
pub fn estimate_bytes(
    encoded_len: Option<usize>,
    width: u32,
    height: u32,
    compression_ratio: f64,
) -> usize {
    match encoded_len {
        Some(len) => len,
        None => {
            let raw = width as f64 * height as f64 * 4.0;
            (raw * compression_ratio).round() as usize
        }
    }
}

/// A rendered full page
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    /// Width in device pixels
    pub width: u32,

    /// Height in device pixels
    pub height: u32,

    /// Row-major RGBA8 pixels
    pub pixels: Bytes,

    /// Encoded (compressed) size of the payload, if the backend reported it
    pub encoded_len: Option<usize>,
}

impl CachedPage {
    /// Create a page from raw RGBA pixels
    pub fn new(width: u32, height: u32, pixels: Bytes) -> Self {
        Self {
            width,
            height,
            pixels,
            encoded_len: None,
        }
    }

    /// Attach the encoded payload length used for memory accounting
    pub fn with_encoded_len(mut self, encoded_len: usize) -> Self {
        self.encoded_len = Some(encoded_len);
        self
    }

    /// Estimated memory footprint
    pub fn memory_size(&self, compression_ratio: f64) -> usize {
        estimate_bytes(self.encoded_len, self.width, self.height, compression_ratio)
    }
}

/// Rectangle of a tile in page pixel coordinates at its target width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

impl fmt::Display for TileRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}x{}", self.x, self.y, self.width, self.height)
    }
}

/// A rendered tile, decoded once and shared with paint surfaces
#[derive(Debug, Clone)]
pub struct CachedTile {
    /// Position and size within the page
    pub rect: TileRect,

    /// Decoded bitmap ready to paint
    pub bitmap: Arc<RgbaImage>,

    /// Encoded (compressed) size of the payload, if the backend reported it
    pub encoded_len: Option<usize>,
}

impl CachedTile {
    pub fn new(rect: TileRect, bitmap: RgbaImage) -> Self {
        Self {
            rect,
            bitmap: Arc::new(bitmap),
            encoded_len: None,
        }
    }

    /// Attach the encoded payload length used for memory accounting
    pub fn with_encoded_len(mut self, encoded_len: usize) -> Self {
        self.encoded_len = Some(encoded_len);
        self
    }

    /// Estimated memory footprint
    pub fn memory_size(&self, compression_ratio: f64) -> usize {
        estimate_bytes(
            self.encoded_len,
            self.bitmap.width(),
            self.bitmap.height(),
            compression_ratio,
        )
    }
}

/// A run of extracted text with its bounding box in PDF units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Extracted text for one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub items: Vec<TextItem>,

    /// Page width in PDF units
    pub width: f32,

    /// Page height in PDF units
    pub height: f32,
}

/// Document-level page information
///
/// `width`/`height` are the first page's size in PDF units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub page_count: u32,
    pub width: f32,
    pub height: f32,
}

/// Outline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub title: String,

    /// Target page, if the entry points into the document
    pub page_index: Option<u32>,

    #[serde(default)]
    pub children: Vec<Bookmark>,
}

/// Annotation rectangle in PDF units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Annotation snapshot as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub page_index: u32,

    /// Annotation subtype such as `highlight` or `text`
    pub subtype: String,
    pub rect: PdfRect,

    #[serde(default)]
    pub contents: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub color: Option<String>,
}
