//! PDF Reader Render Library
//!
//! Rendering backend interface, backend payload codecs, page geometry and
//! viewport-driven tile planning.

pub mod backend;
pub mod geometry;
pub mod tile;
pub mod wire;

pub use backend::{BackendError, BackendResult, RenderBackend};
pub use geometry::{PageGeometry, PageLayout, DEFAULT_PAGE_GAP};
pub use tile::{
    enumerate_tiles, FrameThrottle, PageViewport, PlaceholderRequest, TileBandTracker,
    TileConfig, TileCoordinator, TilePlan, TileRequest, VisibleBand, TILE_SIZE,
};
pub use wire::{decode_page, decode_tile, encode_page, encode_tile, WireError};
