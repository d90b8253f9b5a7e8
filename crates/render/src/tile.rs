//! Viewport-driven tile planning
//!
//! Decides which fixed-size rectangles of a page to request, and at what
//! priority, for the page's current position in the scroll viewport. The
//! page is rendered in two tiers: a low-resolution placeholder of the whole
//! page, requested once, and full-resolution tiles for the band around the
//! viewport.

use crate::geometry::PageGeometry;
use pdf_reader_cache::TileRect;
use pdf_reader_scheduler::Priority;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Tile edge length in CSS pixels
pub const TILE_SIZE: u32 = 256;

/// Tile planning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Tile edge length in CSS pixels, scaled by the device pixel ratio
    pub tile_size: u32,
    /// Overscan margin above and below the viewport, as a multiple of its height
    pub overscan_ratio: f32,
    /// Minimum raw viewport edge movement (device pixels) that counts as a change
    pub hysteresis_px: f32,
    /// Maximum width of the low-resolution placeholder
    pub placeholder_max_width: u32,
    pub visible_priority: u32,
    pub overscan_priority: u32,
    pub placeholder_priority: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            overscan_ratio: 1.0,
            hysteresis_px: 24.0,
            placeholder_max_width: 512,
            visible_priority: Priority::VISIBLE.value(),
            overscan_priority: Priority::OVERSCAN.value(),
            placeholder_priority: Priority::PLACEHOLDER.value(),
        }
    }
}

impl TileConfig {
    /// Tile edge length in device pixels
    pub fn device_tile_size(&self, dpr: f32) -> u32 {
        ((self.tile_size as f32 * dpr).round() as u32).max(1)
    }

    /// Width of the placeholder render for a page rendered at `render_width`
    pub fn placeholder_width(&self, render_width: u32) -> u32 {
        render_width.min(self.placeholder_max_width)
    }
}

/// Position of the scroll viewport relative to one page, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    /// Viewport top minus page top; negative while the page is below the fold
    pub top: f32,
    /// Client height of the scroll container
    pub height: f32,
    /// Display height of the page
    pub page_height: f32,
    /// Device pixel ratio
    pub dpr: f32,
}

impl PageViewport {
    pub fn new(
        scroll_top: f32,
        client_height: f32,
        page_top: f32,
        page_height: f32,
        dpr: f32,
    ) -> Self {
        Self {
            top: scroll_top - page_top,
            height: client_height,
            page_height,
            dpr,
        }
    }
}

/// Vertical band of a page to cover with tiles, in device pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleBand {
    /// Snapped start of the overscanned band (inclusive)
    pub start_y: u32,
    /// Snapped end of the overscanned band (exclusive)
    pub end_y: u32,
    /// Raw top edge of the strictly visible viewport
    pub viewport_top: f32,
    /// Raw bottom edge of the strictly visible viewport
    pub viewport_bottom: f32,
}

impl VisibleBand {
    /// Compute the band for a viewport
    ///
    /// The visible range is expanded by the overscan margin on both sides,
    /// clamped to the page, then snapped outward to tile boundaries.
    pub fn compute(viewport: &PageViewport, config: &TileConfig) -> Self {
        let dpr = viewport.dpr;
        let tile = config.device_tile_size(dpr) as f32;
        let overscan = viewport.height * config.overscan_ratio;

        let visible_top = (viewport.top - overscan).max(0.0);
        let visible_bottom = (viewport.top + viewport.height + overscan).min(viewport.page_height);

        let (start_y, end_y) = if visible_bottom > visible_top {
            let start = ((visible_top * dpr) / tile).floor() * tile;
            let end = ((visible_bottom * dpr) / tile).ceil() * tile;
            (start as u32, end as u32)
        } else {
            (0, 0)
        };

        Self {
            start_y,
            end_y,
            viewport_top: viewport.top * dpr,
            viewport_bottom: (viewport.top + viewport.height) * dpr,
        }
    }

    /// True when the page is nowhere near the viewport
    pub fn is_empty(&self) -> bool {
        self.end_y <= self.start_y
    }

    /// Whether a rectangle intersects the strictly visible viewport
    pub fn intersects_viewport(&self, rect: &TileRect) -> bool {
        rect.bottom() as f32 > self.viewport_top && (rect.y as f32) < self.viewport_bottom
    }
}

/// Accepts a new band only when it matters
///
/// A band is a change when its snapped range differs from the last accepted
/// one, or when either raw viewport edge moved more than the hysteresis
/// threshold.
#[derive(Debug, Clone)]
pub struct TileBandTracker {
    hysteresis_px: f32,
    last: Option<VisibleBand>,
}

impl TileBandTracker {
    pub fn new(hysteresis_px: f32) -> Self {
        Self {
            hysteresis_px,
            last: None,
        }
    }

    /// Record `band` if it is a change; returns whether it was accepted
    pub fn accept(&mut self, band: VisibleBand) -> bool {
        let changed = match &self.last {
            None => true,
            Some(last) => {
                last.start_y != band.start_y
                    || last.end_y != band.end_y
                    || (last.viewport_top - band.viewport_top).abs() > self.hysteresis_px
                    || (last.viewport_bottom - band.viewport_bottom).abs() > self.hysteresis_px
            }
        };
        if changed {
            self.last = Some(band);
        }
        changed
    }

    /// Last accepted band
    pub fn current(&self) -> Option<&VisibleBand> {
        self.last.as_ref()
    }

    /// Forget the last band so the next one is always accepted
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Coalesces scroll and resize events to one recompute per frame
///
/// # Example
///
/// ```
/// use pdf_reader_render::FrameThrottle;
///
/// let mut throttle = FrameThrottle::new();
/// assert!(throttle.on_event(10.0));   // schedule a frame
/// assert!(!throttle.on_event(12.0));  // already scheduled
/// assert_eq!(throttle.on_frame(), Some(12.0));
/// assert_eq!(throttle.on_frame(), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FrameThrottle<T> {
    pending: Option<T>,
}

impl<T> FrameThrottle<T> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Record the latest value; returns true if a frame must be scheduled
    pub fn on_event(&mut self, value: T) -> bool {
        self.pending.replace(value).is_none()
    }

    /// Take the value to process on this frame
    pub fn on_frame(&mut self) -> Option<T> {
        self.pending.take()
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }
}

/// One tile to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub rect: TileRect,
    pub priority: Priority,
}

/// Low-resolution full-page render to show under the tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderRequest {
    pub target_width: u32,
    pub priority: Priority,
}

/// Everything a page needs for its current viewport
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub page_index: u32,
    /// Target width shared by every tile of the plan
    pub target_width: u32,
    /// Present on the first plan for a page (and after a resize)
    pub placeholder: Option<PlaceholderRequest>,
    pub tiles: Vec<TileRequest>,
    pub band: VisibleBand,
}

/// Enumerate the tiles covering a band, clamped to the page bounds
pub fn enumerate_tiles(
    band: &VisibleBand,
    render_width: u32,
    render_height: u32,
    tile_size: u32,
    config: &TileConfig,
) -> Vec<TileRequest> {
    let tile_size = tile_size.max(1);
    let mut tiles = Vec::new();

    let mut y = band.start_y;
    while y < band.end_y && y < render_height {
        let height = tile_size.min(render_height - y);
        let mut x = 0;
        while x < render_width {
            let width = tile_size.min(render_width - x);
            let rect = TileRect::new(x, y, width, height);
            let priority = if band.intersects_viewport(&rect) {
                Priority(config.visible_priority)
            } else {
                Priority(config.overscan_priority)
            };
            tiles.push(TileRequest { rect, priority });
            x += tile_size;
        }
        y += tile_size;
    }

    tiles
}

/// Plans tile requests for one page as the viewport moves
#[derive(Debug, Clone)]
pub struct TileCoordinator {
    config: TileConfig,
    page_index: u32,
    geometry: PageGeometry,
    tracker: TileBandTracker,
    placeholder_sent: bool,
}

impl TileCoordinator {
    pub fn new(config: TileConfig, page_index: u32, geometry: PageGeometry) -> Self {
        let tracker = TileBandTracker::new(config.hysteresis_px);
        Self {
            config,
            page_index,
            geometry,
            tracker,
            placeholder_sent: false,
        }
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Tile edge length in device pixels for this page
    pub fn tile_size(&self) -> u32 {
        self.config.device_tile_size(self.geometry.dpr)
    }

    /// Placeholder request for this page, regardless of plan state
    pub fn placeholder_request(&self) -> PlaceholderRequest {
        PlaceholderRequest {
            target_width: self.config.placeholder_width(self.geometry.render_width),
            priority: Priority(self.config.placeholder_priority),
        }
    }

    /// Replace the page geometry after a zoom or resize
    ///
    /// A different render size invalidates the previous band and placeholder.
    pub fn set_geometry(&mut self, geometry: PageGeometry) {
        if geometry.render_width != self.geometry.render_width
            || geometry.render_height != self.geometry.render_height
            || geometry.dpr != self.geometry.dpr
        {
            self.tracker.reset();
            self.placeholder_sent = false;
        }
        self.geometry = geometry;
    }

    /// Plan requests for a viewport
    ///
    /// Returns `None` when the band did not change enough to matter.
    pub fn plan(&mut self, viewport: &PageViewport) -> Option<TilePlan> {
        let viewport = PageViewport {
            dpr: self.geometry.dpr,
            ..*viewport
        };
        let band = VisibleBand::compute(&viewport, &self.config);
        if !self.tracker.accept(band) {
            return None;
        }

        // A page far from the viewport keeps its placeholder for later.
        let placeholder = if self.placeholder_sent || band.is_empty() {
            None
        } else {
            self.placeholder_sent = true;
            Some(self.placeholder_request())
        };

        let tiles = enumerate_tiles(
            &band,
            self.geometry.render_width,
            self.geometry.render_height,
            self.tile_size(),
            &self.config,
        );
        trace!(
            page = self.page_index,
            start_y = band.start_y,
            end_y = band.end_y,
            tiles = tiles.len(),
            "planned tile band"
        );

        Some(TilePlan {
            page_index: self.page_index,
            target_width: self.geometry.render_width,
            placeholder,
            tiles,
            band,
        })
    }
}
