//! Binary payloads returned by the rendering backend
//!
//! Page payload: big-endian `u32` width, big-endian `u32` height, then
//! row-major RGBA8 pixels.
//!
//! Tile payload: big-endian `i32` x, y, width, height, then row-major RGBA8
//! pixels of the tile.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use image::RgbaImage;
use pdf_reader_cache::{CachedPage, CachedTile, TileRect};
use pdf_reader_scheduler::RenderError;

/// Length of the page payload header in bytes
pub const PAGE_HEADER_LEN: usize = 8;

/// Length of the tile payload header in bytes
pub const TILE_HEADER_LEN: usize = 16;

/// Malformed backend payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload is {len} bytes, shorter than the {needed}-byte header")]
    Truncated { len: usize, needed: usize },

    #[error("payload carries {actual} pixel bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("negative tile header field {field} = {value}")]
    NegativeField { field: &'static str, value: i32 },

    #[error("dimensions {width}x{height} overflow the address space")]
    Overflow { width: u32, height: u32 },
}

impl From<WireError> for RenderError {
    fn from(err: WireError) -> Self {
        RenderError::backend(err)
    }
}

fn rgba_len(width: u32, height: u32) -> Result<usize, WireError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(WireError::Overflow { width, height })
}

/// Decode a page payload without copying the pixel data
pub fn decode_page(payload: Bytes) -> Result<CachedPage, WireError> {
    if payload.len() < PAGE_HEADER_LEN {
        return Err(WireError::Truncated {
            len: payload.len(),
            needed: PAGE_HEADER_LEN,
        });
    }

    let mut header = &payload[..PAGE_HEADER_LEN];
    let width = header.get_u32();
    let height = header.get_u32();

    let expected = rgba_len(width, height)?;
    let actual = payload.len() - PAGE_HEADER_LEN;
    if actual != expected {
        return Err(WireError::LengthMismatch { expected, actual });
    }

    Ok(CachedPage::new(
        width,
        height,
        payload.slice(PAGE_HEADER_LEN..),
    ))
}

/// Encode a page payload
pub fn encode_page(width: u32, height: u32, pixels: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PAGE_HEADER_LEN + pixels.len());
    buf.put_u32(width);
    buf.put_u32(height);
    buf.put_slice(pixels);
    buf.freeze()
}

fn non_negative(field: &'static str, value: i32) -> Result<u32, WireError> {
    u32::try_from(value).map_err(|_| WireError::NegativeField { field, value })
}

/// Decode a tile payload into a ready-to-paint bitmap
pub fn decode_tile(payload: &[u8]) -> Result<CachedTile, WireError> {
    if payload.len() < TILE_HEADER_LEN {
        return Err(WireError::Truncated {
            len: payload.len(),
            needed: TILE_HEADER_LEN,
        });
    }

    let mut header = &payload[..TILE_HEADER_LEN];
    let x = non_negative("x", header.get_i32())?;
    let y = non_negative("y", header.get_i32())?;
    let width = non_negative("width", header.get_i32())?;
    let height = non_negative("height", header.get_i32())?;

    let expected = rgba_len(width, height)?;
    let pixels = &payload[TILE_HEADER_LEN..];
    if pixels.len() != expected {
        return Err(WireError::LengthMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let bitmap = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or(
        WireError::LengthMismatch {
            expected,
            actual: pixels.len(),
        },
    )?;
    Ok(CachedTile::new(TileRect::new(x, y, width, height), bitmap))
}

/// Encode a tile payload
///
/// Header fields are clamped to `i32::MAX`.
pub fn encode_tile(rect: TileRect, pixels: &[u8]) -> Bytes {
    let field = |value: u32| i32::try_from(value).unwrap_or(i32::MAX);
    let mut buf = BytesMut::with_capacity(TILE_HEADER_LEN + pixels.len());
    buf.put_i32(field(rect.x));
    buf.put_i32(field(rect.y));
    buf.put_i32(field(rect.width));
    buf.put_i32(field(rect.height));
    buf.put_slice(pixels);
    buf.freeze()
}
