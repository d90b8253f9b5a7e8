//! Reader context
//!
//! The composition root of the reader core. It owns the cache, the scheduler,
//! the viewer state store and the table of open documents, and ties document
//! open/close to all of them: viewer state exists exactly while a document is
//! open, and closing a document cancels its requests and releases its cached
//! memory before returning.

use crate::config::ReaderConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::pipeline::{RenderPipeline, RequestState};
use crate::viewer::{ViewerState, ViewerStore};
use parking_lot::Mutex;
use pdf_reader_cache::{CachedPage, CachedTile, DocumentId, PageCache, PdfInfo, TileRect};
use pdf_reader_render::{
    PageGeometry, PageLayout, RenderBackend, TileCoordinator, TilePlan, DEFAULT_PAGE_GAP,
};
use pdf_reader_scheduler::{CancellationRegistry, CancellationToken, Priority, RenderScheduler};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Last known reading position of a file
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingPosition {
    pub file_path: PathBuf,
    /// Zero-based page
    pub current_page: u32,
    pub last_opened: SystemTime,
}

/// Persistence collaborator that remembers reading positions
///
/// Write-only: the reader reports positions and never reads them back.
pub trait ReadingPositionSink: Send + Sync {
    fn save_position(&self, position: &ReadingPosition);
}

/// Sink that drops every position
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPositions;

impl ReadingPositionSink for DiscardPositions {
    fn save_position(&self, _position: &ReadingPosition) {}
}

/// "current / total" page indicator, one-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndicator {
    pub current: u32,
    pub total: u32,
}

impl fmt::Display for PageIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.current, self.total)
    }
}

/// Settled requests of one [`TilePlan`]
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub placeholder: Option<RequestState<CachedPage>>,
    /// Tiles in row-major order
    pub tiles: Vec<(TileRect, RequestState<CachedTile>)>,
}

impl PlanOutcome {
    /// Tiles that arrived
    pub fn ready_tiles(&self) -> impl Iterator<Item = &CachedTile> {
        self.tiles.iter().filter_map(|(_, state)| state.ready())
    }
}

struct OpenDocument {
    path: PathBuf,
    token: CancellationToken,
    opened_at: SystemTime,
    synced_page: Option<u32>,
}

/// Owner of every shared reader service
pub struct ReaderContext {
    config: ReaderConfig,
    pipeline: RenderPipeline,
    viewers: ViewerStore,
    documents: Mutex<HashMap<DocumentId, OpenDocument>>,
    requests: CancellationRegistry<(DocumentId, String)>,
    positions: Arc<dyn ReadingPositionSink>,
}

impl ReaderContext {
    pub fn new(
        config: ReaderConfig,
        backend: Arc<dyn RenderBackend>,
        positions: Arc<dyn ReadingPositionSink>,
    ) -> Self {
        let cache = PageCache::new(config.cache.clone());
        let scheduler = RenderScheduler::new(config.scheduler.clone());
        info!(
            cache_mb = config.cache.max_mb(),
            max_concurrency = config.scheduler.max_concurrency,
            "reader context created"
        );
        Self {
            pipeline: RenderPipeline::new(cache, scheduler, backend),
            viewers: ViewerStore::new(),
            documents: Mutex::new(HashMap::new()),
            requests: CancellationRegistry::new(),
            positions,
            config,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &PageCache {
        self.pipeline.cache()
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        self.pipeline.scheduler()
    }

    /// Every document's viewer state, open or not
    ///
    /// Mutating through the store directly creates state for unknown ids;
    /// prefer [`with_viewer`](Self::with_viewer).
    pub fn viewers(&self) -> &ViewerStore {
        &self.viewers
    }

    /// Apply a viewer-state change to an open document
    ///
    /// The document table stays locked while `change` runs, so a concurrent
    /// close either sees the change or makes this fail; state is never
    /// recreated for a closed document.
    pub fn with_viewer<R>(
        &self,
        id: &DocumentId,
        change: impl FnOnce(&ViewerStore, &DocumentId) -> R,
    ) -> ReaderResult<R> {
        let documents = self.documents.lock();
        if !documents.contains_key(id) {
            return Err(ReaderError::DocumentNotOpen(id.clone()));
        }
        Ok(change(&self.viewers, id))
    }

    /// Viewer state of an open document
    pub fn viewer_state(&self, id: &DocumentId) -> ReaderResult<ViewerState> {
        self.with_viewer(id, |viewers, id| viewers.get_state(id))
    }

    /// Start tracking a document
    ///
    /// Its cache entry is populated lazily by the first request.
    pub fn open_document(&self, id: DocumentId, path: impl Into<PathBuf>) -> ReaderResult<()> {
        let path = path.into();
        {
            let mut documents = self.documents.lock();
            if documents.contains_key(&id) {
                return Err(ReaderError::DocumentAlreadyOpen(id));
            }
            documents.insert(
                id.clone(),
                OpenDocument {
                    path: path.clone(),
                    token: CancellationToken::new(),
                    opened_at: SystemTime::now(),
                    synced_page: None,
                },
            );
        }
        self.viewers.get_state(&id);
        info!(document = %id, path = %path.display(), "document opened");
        Ok(())
    }

    /// Stop tracking a document and release everything held for it
    ///
    /// Outstanding requests are cancelled, the final reading position is
    /// reported, and the cache entry and viewer state are dropped before
    /// this returns.
    pub fn close_document(&self, id: &DocumentId) -> ReaderResult<()> {
        let document = self
            .documents
            .lock()
            .remove(id)
            .ok_or_else(|| ReaderError::DocumentNotOpen(id.clone()))?;

        document.token.cancel();
        let superseded = self.requests.cancel_where(|(doc, _)| doc == id);

        let state = self.viewers.get_state(id);
        self.positions.save_position(&ReadingPosition {
            file_path: document.path.clone(),
            current_page: state.current_page,
            last_opened: document.opened_at,
        });

        if self.cache().active_document().as_ref() == Some(id) {
            self.cache().set_active_document(None);
        }
        let released = self.cache().purge_document(id);
        self.viewers.remove_state(id);

        info!(
            document = %id,
            released_bytes = released,
            cancelled = superseded,
            "document closed"
        );
        Ok(())
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.documents.lock().contains_key(id)
    }

    /// Ids of every open document
    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.documents.lock().keys().cloned().collect()
    }

    /// File path a document was opened from
    pub fn document_path(&self, id: &DocumentId) -> Option<PathBuf> {
        self.documents.lock().get(id).map(|doc| doc.path.clone())
    }

    /// Mark the document in the foreground; its cache entries are protected
    /// from eviction caused by other documents
    pub fn set_active_document(&self, id: Option<&DocumentId>) -> ReaderResult<()> {
        if let Some(id) = id {
            self.ensure_open(id)?;
        }
        self.cache().set_active_document(id.cloned());
        debug!(document = ?id.map(DocumentId::as_str), "active document changed");
        Ok(())
    }

    pub fn active_document(&self) -> Option<DocumentId> {
        self.cache().active_document()
    }

    fn ensure_open(&self, id: &DocumentId) -> ReaderResult<()> {
        if self.is_open(id) {
            Ok(())
        } else {
            Err(ReaderError::DocumentNotOpen(id.clone()))
        }
    }

    /// Token for one request, cancelled when the document closes
    pub fn request_token(&self, id: &DocumentId) -> ReaderResult<CancellationToken> {
        self.documents
            .lock()
            .get(id)
            .map(|doc| doc.token.child_token())
            .ok_or_else(|| ReaderError::DocumentNotOpen(id.clone()))
    }

    /// Token for a logical request slot of a document
    ///
    /// Issuing a new token for the same slot cancels the previous one, so a
    /// newer request supersedes an older request for the same thing.
    pub fn supersede_token(
        &self,
        id: &DocumentId,
        slot: impl Into<String>,
    ) -> ReaderResult<CancellationToken> {
        self.ensure_open(id)?;
        Ok(self.requests.issue((id.clone(), slot.into())))
    }

    /// Forget a settled request slot without cancelling it
    pub fn release_token(&self, id: &DocumentId, slot: &str) -> bool {
        self.requests.release(&(id.clone(), slot.to_string()))
    }

    /// Push every changed reading position to the persistence collaborator
    ///
    /// Returns the number of positions reported.
    pub fn sync_reading_positions(&self) -> usize {
        let changed: Vec<ReadingPosition> = {
            let mut documents = self.documents.lock();
            documents
                .iter_mut()
                .filter_map(|(id, document)| {
                    let current_page = self.current_page(id)?;
                    if document.synced_page == Some(current_page) {
                        return None;
                    }
                    document.synced_page = Some(current_page);
                    Some(ReadingPosition {
                        file_path: document.path.clone(),
                        current_page,
                        last_opened: document.opened_at,
                    })
                })
                .collect()
        };

        for position in &changed {
            self.positions.save_position(position);
        }
        if !changed.is_empty() {
            debug!(reported = changed.len(), "reading positions synced");
        }
        changed.len()
    }

    fn current_page(&self, id: &DocumentId) -> Option<u32> {
        self.viewers
            .contains(id)
            .then(|| self.viewers.get_state(id).current_page)
    }

    /// One-based current page and page count, once the page count is known
    pub fn page_indicator(&self, id: &DocumentId) -> Option<PageIndicator> {
        let current = self.viewer_state(id).ok()?.current_page;
        let info = self.cache().get_info(id)?;
        Some(PageIndicator {
            current: current.saturating_add(1).min(info.page_count.max(1)),
            total: info.page_count,
        })
    }

    /// Fetch (or reuse) the document's page count and size
    pub async fn load_info(&self, id: &DocumentId) -> ReaderResult<RequestState<PdfInfo>> {
        let token = self.request_token(id)?;
        Ok(self.pipeline.info(id, token, Priority::VISIBLE).await.into())
    }

    /// Continuous layout of the document at `display_width` CSS pixels
    ///
    /// Every page is sized like the first one. Needs the document info.
    pub fn layout(&self, id: &DocumentId, display_width: f32, dpr: f32) -> Option<PageLayout> {
        let info = self.cache().get_info(id)?;
        let geometry = PageGeometry::fit_width(display_width, dpr, info.width, info.height);
        Some(PageLayout::uniform(
            info.page_count,
            geometry.display_height,
            DEFAULT_PAGE_GAP,
        ))
    }

    /// Tile coordinator for one page at the current zoom
    ///
    /// `base_width` is the fit-to-width size in CSS pixels before zoom.
    pub fn tile_coordinator(
        &self,
        id: &DocumentId,
        page_index: u32,
        base_width: f32,
        dpr: f32,
    ) -> Option<TileCoordinator> {
        let info = self.cache().get_info(id)?;
        if page_index >= info.page_count {
            return None;
        }
        let scale = self.viewer_state(id).ok()?.scale;
        let geometry = PageGeometry::fit_width(base_width * scale, dpr, info.width, info.height);
        Some(TileCoordinator::new(
            self.config.tiles.clone(),
            page_index,
            geometry,
        ))
    }

    /// Record a scroll position; updates the current page when it changed
    pub fn on_scroll(&self, id: &DocumentId, layout: &PageLayout, scroll_top: f32) -> bool {
        if layout.page_count() == 0 {
            return false;
        }
        self.with_viewer(id, |viewers, id| {
            viewers.set_current_page(id, layout.current_page(scroll_top))
        })
        .unwrap_or(false)
    }

    /// Request everything a tile plan asks for and wait for it to settle
    ///
    /// Tile failures are reported per tile; the placeholder stays usable.
    pub async fn render_plan(&self, id: &DocumentId, plan: &TilePlan) -> ReaderResult<PlanOutcome> {
        let token = self.request_token(id)?;

        let mut tasks = JoinSet::new();
        for request in &plan.tiles {
            let pipeline = self.pipeline.clone();
            let doc = id.clone();
            let token = token.clone();
            let (page_index, target_width) = (plan.page_index, plan.target_width);
            let (rect, priority) = (request.rect, request.priority);
            tasks.spawn(async move {
                let result = pipeline
                    .tile(&doc, page_index, target_width, rect, token, priority)
                    .await;
                (rect, RequestState::from_result(result))
            });
        }

        let placeholder = match plan.placeholder {
            Some(request) => {
                let result = self
                    .pipeline
                    .placeholder(
                        id,
                        plan.page_index,
                        request.target_width,
                        token.clone(),
                        request.priority,
                    )
                    .await;
                Some(RequestState::from_result(result))
            }
            None => None,
        };

        let mut tiles = Vec::with_capacity(plan.tiles.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tile) => tiles.push(tile),
                Err(err) => warn!(document = %id, error = %err, "tile request task failed"),
            }
        }
        tiles.sort_by_key(|(rect, _)| (rect.y, rect.x));

        Ok(PlanOutcome { placeholder, tiles })
    }

    /// Close every document and drop all queued work
    ///
    /// Returns the number of documents closed.
    pub fn shutdown(&self) -> usize {
        let dropped = self.scheduler().clear();
        let ids = self.open_documents();
        let mut closed = 0;
        for id in &ids {
            if self.close_document(id).is_ok() {
                closed += 1;
            }
        }
        self.requests.cancel_all();
        self.cache().clear();
        self.viewers.clear();
        info!(closed, dropped_tasks = dropped, "reader context shut down");
        closed
    }
}

impl fmt::Debug for ReaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderContext")
            .field("documents", &self.documents.lock().len())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Derive a document id from its file path
pub fn document_id_for(path: &Path) -> DocumentId {
    DocumentId::new(path.to_string_lossy())
}
