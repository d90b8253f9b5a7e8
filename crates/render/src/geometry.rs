//! Page sizing and vertical layout of a continuous document view
//!
//! CSS pixels are device-independent display units; device pixels are CSS
//! pixels multiplied by the device pixel ratio. Render requests are always
//! expressed in device pixels.

use std::ops::Range;

/// Vertical gap between consecutive pages, in CSS pixels
pub const DEFAULT_PAGE_GAP: f32 = 16.0;

/// Display and render size of one page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Display width in CSS pixels
    pub display_width: f32,
    /// Display height in CSS pixels
    pub display_height: f32,
    /// Render width in device pixels
    pub render_width: u32,
    /// Render height in device pixels
    pub render_height: u32,
    /// Device pixel ratio
    pub dpr: f32,
}

impl PageGeometry {
    /// Size a page to fill `display_width` CSS pixels
    ///
    /// The render width is floored to whole device pixels and the height
    /// follows from the PDF aspect ratio, so display height is derived from
    /// the render height rather than the other way round.
    ///
    /// # Example
    ///
    /// ```
    /// use pdf_reader_render::PageGeometry;
    ///
    /// // US Letter at 800 CSS px on a 2x display
    /// let geometry = PageGeometry::fit_width(800.0, 2.0, 612.0, 792.0);
    /// assert_eq!(geometry.render_width, 1600);
    /// assert_eq!(geometry.render_height, 2070);
    /// assert_eq!(geometry.display_height, 1035.0);
    /// ```
    pub fn fit_width(display_width: f32, dpr: f32, pdf_width: f32, pdf_height: f32) -> Self {
        let dpr = if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 };
        let render_width = (display_width.max(0.0) * dpr).floor() as u32;
        let render_height = if pdf_width > 0.0 {
            (render_width as f32 * (pdf_height / pdf_width)).floor() as u32
        } else {
            0
        };
        Self {
            display_width: render_width as f32 / dpr,
            display_height: render_height as f32 / dpr,
            render_width,
            render_height,
            dpr,
        }
    }

    /// Scale from PDF units to CSS pixels
    pub fn scale(&self, pdf_width: f32) -> f32 {
        if pdf_width > 0.0 {
            self.display_width / pdf_width
        } else {
            0.0
        }
    }
}

/// Vertical positions of every page in a continuous scroll view
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    tops: Vec<f32>,
    heights: Vec<f32>,
    gap: f32,
}

impl PageLayout {
    /// Layout from per-page display heights in CSS pixels
    pub fn new(heights: Vec<f32>, gap: f32) -> Self {
        let mut tops = Vec::with_capacity(heights.len());
        let mut offset = 0.0;
        for height in &heights {
            tops.push(offset);
            offset += height + gap;
        }
        Self { tops, heights, gap }
    }

    /// Layout of `page_count` pages of identical height
    pub fn uniform(page_count: u32, page_height: f32, gap: f32) -> Self {
        Self::new(vec![page_height; page_count as usize], gap)
    }

    pub fn page_count(&self) -> u32 {
        self.heights.len() as u32
    }

    /// Top offset of a page in CSS pixels
    pub fn page_top(&self, page_index: u32) -> Option<f32> {
        self.tops.get(page_index as usize).copied()
    }

    /// Display height of a page in CSS pixels
    pub fn page_height(&self, page_index: u32) -> Option<f32> {
        self.heights.get(page_index as usize).copied()
    }

    /// Scroll height of the whole document
    pub fn total_height(&self) -> f32 {
        match (self.tops.last(), self.heights.last()) {
            (Some(top), Some(height)) => top + height + self.gap,
            _ => 0.0,
        }
    }

    /// Page considered current at `scroll_top`
    ///
    /// The last page whose top is at or above `scroll_top + 1`.
    pub fn current_page(&self, scroll_top: f32) -> u32 {
        let position = self.tops.partition_point(|top| *top <= scroll_top + 1.0);
        position.saturating_sub(1) as u32
    }

    /// Pages intersecting `[scroll_top, scroll_top + client_height)`
    pub fn visible_pages(&self, scroll_top: f32, client_height: f32) -> Range<u32> {
        let bottom = scroll_top + client_height;
        let start = self
            .tops
            .iter()
            .zip(&self.heights)
            .position(|(top, height)| top + height > scroll_top)
            .unwrap_or(self.tops.len());
        let end = self.tops.partition_point(|top| *top < bottom).max(start);
        start as u32..end as u32
    }

    /// Scroll offset that brings a page to the top of the viewport
    pub fn scroll_offset_for(&self, page_index: u32) -> Option<f32> {
        self.page_top(page_index)
    }
}
