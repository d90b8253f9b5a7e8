//! Rendering backend interface
//!
//! The backend owns the actual PDF engine. This crate only consumes it:
//! every call is asynchronous and reports failure through its return value.

use async_trait::async_trait;
use bytes::Bytes;
use pdf_reader_cache::{Annotation, Bookmark, DocumentId, PageText, PdfInfo, TileRect};
use pdf_reader_scheduler::RenderError;

/// Failure reported by the rendering backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend has no open document with this id
    #[error("document not open: {0}")]
    DocumentNotOpen(DocumentId),

    /// Page index past the end of the document
    #[error("page {page_index} out of range (document has {page_count} pages)")]
    PageOutOfRange { page_index: u32, page_count: u32 },

    /// Any other engine failure
    #[error("{0}")]
    Engine(String),
}

impl BackendError {
    pub fn engine(message: impl std::fmt::Display) -> Self {
        BackendError::Engine(message.to_string())
    }
}

impl From<BackendError> for RenderError {
    fn from(err: BackendError) -> Self {
        RenderError::backend(err)
    }
}

/// Result of a backend call
pub type BackendResult<T> = Result<T, BackendError>;

/// External rendering backend
///
/// `render_page` returns the page payload described in [`crate::wire`];
/// `render_tile` returns the tile payload.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Render a whole page at `target_width` device pixels
    async fn render_page(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
    ) -> BackendResult<Bytes>;

    /// Render one rectangle of a page rendered at `target_width`
    async fn render_tile(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        rect: TileRect,
    ) -> BackendResult<Bytes>;

    /// Page count and first-page size
    async fn fetch_pdf_info(&self, id: &DocumentId) -> BackendResult<PdfInfo>;

    /// Extracted text of one page
    async fn fetch_text_by_page(&self, id: &DocumentId, page_index: u32)
        -> BackendResult<PageText>;

    /// Document outline
    async fn fetch_bookmarks(&self, id: &DocumentId) -> BackendResult<Vec<Bookmark>>;

    /// Annotations on every page
    async fn fetch_annotations(&self, id: &DocumentId) -> BackendResult<Vec<Annotation>>;
}
