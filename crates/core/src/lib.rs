//! PDF Reader Core Library
//!
//! Composition root of the reader: per-document viewer state, the render
//! pipeline joining cache, scheduler and backend, document lifecycle, and
//! configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod telemetry;
pub mod viewer;

pub use config::ReaderConfig;
pub use context::{
    document_id_for, DiscardPositions, PageIndicator, PlanOutcome, ReaderContext,
    ReadingPosition, ReadingPositionSink,
};
pub use error::{ReaderError, ReaderResult};
pub use pipeline::{page_key, tile_key, PageDisplay, RenderPipeline, RequestState};
pub use telemetry::init_tracing;
pub use viewer::{
    next_zoom_in, next_zoom_out, SidebarPanel, Tool, ViewerState, ViewerStore, MAX_ZOOM,
    MIN_ZOOM, ZOOM_STEPS,
};
