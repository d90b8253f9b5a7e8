//! Render pipeline
//!
//! Every request follows the same path: look in the [`PageCache`], and on a
//! miss submit a keyed task to the [`RenderScheduler`] that calls the
//! [`RenderBackend`] and decodes its payload. When the task settles the
//! result is written back to the cache, unless the requester cancelled in the
//! meantime. Identical in-flight requests share one backend call.

use pdf_reader_cache::{
    Annotation, Bookmark, CacheWriter, CachedPage, CachedTile, DocumentId, PageCache, PageText,
    PdfInfo, TileRect,
};
use pdf_reader_render::{wire, RenderBackend};
use pdf_reader_scheduler::{
    CancellationToken, Priority, RenderError, RenderResult, RenderScheduler,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{trace, warn};

/// Tri-state of one request as seen by a view
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState<T> {
    /// No data yet (also the state of a cancelled request)
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> RequestState<T> {
    /// Aborted requests stay loading; their requester is gone.
    pub fn from_result(result: RenderResult<T>) -> Self {
        match result {
            Ok(value) => RequestState::Ready(value),
            Err(RenderError::Aborted) => RequestState::Loading,
            Err(err) => RequestState::Failed(err.to_string()),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RequestState::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RequestState::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            RequestState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RequestState::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestState<U> {
        match self {
            RequestState::Loading => RequestState::Loading,
            RequestState::Ready(value) => RequestState::Ready(f(value)),
            RequestState::Failed(message) => RequestState::Failed(message),
        }
    }
}

impl<T> From<RenderResult<T>> for RequestState<T> {
    fn from(result: RenderResult<T>) -> Self {
        Self::from_result(result)
    }
}

/// What a page slot shows
#[derive(Debug, Clone, PartialEq)]
pub enum PageDisplay {
    /// Rendered at the requested width
    Ready(CachedPage),
    /// Another resolution of the same page, shown until the request lands
    Placeholder(CachedPage),
    Loading,
    /// Inline error shown in place of the page
    Error(String),
}

impl PageDisplay {
    /// Combine a page request with whatever stale rendering is at hand
    pub fn resolve(state: RequestState<CachedPage>, stale: Option<CachedPage>) -> Self {
        match (state, stale) {
            (RequestState::Ready(page), _) => PageDisplay::Ready(page),
            (RequestState::Failed(message), _) => PageDisplay::Error(message),
            (RequestState::Loading, Some(page)) => PageDisplay::Placeholder(page),
            (RequestState::Loading, None) => PageDisplay::Loading,
        }
    }

    /// Pixels to paint, if any
    pub fn page(&self) -> Option<&CachedPage> {
        match self {
            PageDisplay::Ready(page) | PageDisplay::Placeholder(page) => Some(page),
            _ => None,
        }
    }
}

/// Dedup key of a whole-page render
pub fn page_key(id: &DocumentId, page_index: u32, target_width: u32) -> String {
    format!("{id}:{page_index}:{target_width}")
}

/// Dedup key of a tile render
pub fn tile_key(id: &DocumentId, page_index: u32, target_width: u32, rect: TileRect) -> String {
    format!("{id}:{page_index}:{target_width}:{rect}")
}

/// Cache, scheduler and backend wired together
///
/// Cloning is cheap; clones share the same cache and scheduler.
#[derive(Clone)]
pub struct RenderPipeline {
    cache: PageCache,
    scheduler: RenderScheduler,
    backend: Arc<dyn RenderBackend>,
}

impl RenderPipeline {
    pub fn new(
        cache: PageCache,
        scheduler: RenderScheduler,
        backend: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            cache,
            scheduler,
            backend,
        }
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    /// Whole page rendered at `target_width` device pixels
    pub async fn page(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<CachedPage> {
        if let Some(page) = self.cache.get_page(id, page_index, target_width as f32) {
            return Ok(page);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(
                page_key(id, page_index, target_width),
                &token,
                priority,
                async move {
                    let payload = backend.render_page(&doc, page_index, target_width).await?;
                    let encoded_len = payload.len();
                    let page = wire::decode_page(payload)?;
                    Ok::<_, RenderError>(page.with_encoded_len(encoded_len))
                },
            )
            .await;

        self.settle(id, "page", &token, result, |cache, page| {
            cache.add_page(id, page_index, page.clone())
        })
    }

    /// Low-resolution full-page render shown under the tiles
    ///
    /// Served from any cached resolution of the page when one exists.
    pub async fn placeholder(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<CachedPage> {
        if let Some(page) = self.cache.get_any_page(id, page_index) {
            return Ok(page);
        }
        self.page(id, page_index, target_width, token, priority).await
    }

    /// One tile of a page rendered at `target_width`
    pub async fn tile(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        rect: TileRect,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<CachedTile> {
        if let Some(tile) = self.cache.get_tile(id, page_index, target_width, rect) {
            return Ok(tile);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(
                tile_key(id, page_index, target_width, rect),
                &token,
                priority,
                async move {
                    let payload = backend
                        .render_tile(&doc, page_index, target_width, rect)
                        .await?;
                    let tile = wire::decode_tile(&payload)?;
                    Ok::<_, RenderError>(tile.with_encoded_len(payload.len()))
                },
            )
            .await;

        self.settle(id, "tile", &token, result, |cache, tile| {
            cache.add_tile(id, page_index, target_width, tile.clone())
        })
    }

    /// Extracted text of one page
    pub async fn text(
        &self,
        id: &DocumentId,
        page_index: u32,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<Arc<PageText>> {
        if let Some(text) = self.cache.get_text(id, page_index) {
            return Ok(text);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(
                format!("{id}:{page_index}:text"),
                &token,
                priority,
                async move {
                    let text = backend.fetch_text_by_page(&doc, page_index).await?;
                    Ok::<_, RenderError>(Arc::new(text))
                },
            )
            .await;

        self.settle(id, "text", &token, result, |cache, text| {
            cache.add_text(id, page_index, Arc::clone(text))
        })
    }

    /// Page count and first-page size
    pub async fn info(
        &self,
        id: &DocumentId,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<PdfInfo> {
        if let Some(info) = self.cache.get_info(id) {
            return Ok(info);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(format!("{id}:info"), &token, priority, async move {
                Ok::<_, RenderError>(backend.fetch_pdf_info(&doc).await?)
            })
            .await;

        self.settle(id, "info", &token, result, |cache, info| {
            cache.set_info(id, *info)
        })
    }

    /// Document outline
    pub async fn bookmarks(
        &self,
        id: &DocumentId,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<Arc<Vec<Bookmark>>> {
        if let Some(bookmarks) = self.cache.get_bookmarks(id) {
            return Ok(bookmarks);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(format!("{id}:bookmarks"), &token, priority, async move {
                Ok::<_, RenderError>(Arc::new(backend.fetch_bookmarks(&doc).await?))
            })
            .await;

        self.settle(id, "bookmarks", &token, result, |cache, bookmarks| {
            cache.set_bookmarks(id, Arc::clone(bookmarks))
        })
    }

    /// Annotations on every page
    pub async fn annotations(
        &self,
        id: &DocumentId,
        token: CancellationToken,
        priority: Priority,
    ) -> RenderResult<Arc<Vec<Annotation>>> {
        if let Some(annotations) = self.cache.get_annotations(id) {
            return Ok(annotations);
        }

        let backend = Arc::clone(&self.backend);
        let doc = id.clone();
        let result = self
            .submit(format!("{id}:annotations"), &token, priority, async move {
                Ok::<_, RenderError>(Arc::new(backend.fetch_annotations(&doc).await?))
            })
            .await;

        self.settle(id, "annotations", &token, result, |cache, annotations| {
            cache.set_annotations(id, Arc::clone(annotations))
        })
    }

    async fn submit<T, Fut>(
        &self,
        key: String,
        token: &CancellationToken,
        priority: Priority,
        work: Fut,
    ) -> RenderResult<T>
    where
        T: Clone + Send + 'static,
        Fut: Future<Output = RenderResult<T>> + Send + 'static,
    {
        trace!(key = %key, %priority, "cache miss, scheduling");
        self.scheduler
            .enqueue_keyed(key, move || work, token.clone(), priority)
            .await
    }

    /// Write a settled result back and log failures
    ///
    /// A requester that cancelled while the task ran gets `Aborted` and the
    /// result is dropped, so a closed document never regains cache entries.
    /// The cancellation check and the write happen under one cache lock;
    /// closing cancels before it purges, so a purge can't slip in between.
    fn settle<T>(
        &self,
        id: &DocumentId,
        kind: &'static str,
        token: &CancellationToken,
        result: RenderResult<T>,
        store: impl FnOnce(&mut CacheWriter<'_>, &T),
    ) -> RenderResult<T> {
        match result {
            Ok(value) => {
                let mut writer = self.cache.write();
                if token.is_cancelled() {
                    trace!(document = %id, kind, "discarding result for cancelled request");
                    return Err(RenderError::Aborted);
                }
                store(&mut writer, &value);
                Ok(value)
            }
            Err(RenderError::Aborted) => Err(RenderError::Aborted),
            Err(err) => {
                warn!(document = %id, kind, error = %err, "render request failed");
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("cache", &self.cache)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
