//! Memory-bounded multi-document page cache
//!
//! Holds rendered pages, rendered tiles and extracted text for every open
//! document under one global byte budget. Each document owns an entry with
//! its own running memory total and last-access stamp; the sum of the
//! per-document totals always equals the global total.
//!
//! When an insertion pushes the total over budget, whole artifacts are
//! evicted one at a time. Documents other than the protected one (the
//! active document, or the inserting document when none is active) are
//! drained first, least recently accessed document first and oldest artifact
//! first within a document. Only when no other document holds anything does
//! eviction reach into the protected document. A single artifact larger than
//! the budget is kept.

use crate::config::CacheConfig;
use crate::types::{
    Annotation, Bookmark, CachedPage, CachedTile, DocumentId, PageText, PdfInfo, TileRect,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identity of one cached artifact inside a document entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntryKey {
    Page { page: u32, width: u32, height: u32 },
    Tile { page: u32, target_width: u32, rect: TileRect },
    Text { page: u32 },
}

#[derive(Debug, Clone)]
enum Artifact {
    Page(CachedPage),
    Tile(CachedTile),
    Text(Arc<PageText>),
}

#[derive(Debug)]
struct Stored {
    artifact: Artifact,
    bytes: usize,
}

/// Per-document cache entry
#[derive(Debug, Default)]
struct DocumentEntry {
    /// Artifacts in insertion order (oldest first)
    items: IndexMap<EntryKey, Stored>,
    text_pages: usize,
    info: Option<PdfInfo>,
    bookmarks: Option<Arc<Vec<Bookmark>>>,
    annotations: Option<Arc<Vec<Annotation>>>,
    memory_bytes: usize,
    last_accessed: u64,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of documents with an entry
    pub documents: usize,

    /// Number of cached artifacts (pages, tiles and text pages)
    pub entries: usize,

    /// Total memory charged to cached artifacts (bytes)
    pub memory_used: usize,

    /// Byte budget
    pub memory_limit: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of artifacts evicted due to memory pressure
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (may exceed 1.0 during a tolerated overrun)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

struct CacheState {
    config: CacheConfig,
    documents: HashMap<DocumentId, DocumentEntry>,
    active: Option<DocumentId>,
    total_bytes: usize,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            documents: HashMap::new(),
            active: None,
            total_bytes: 0,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn entry_mut(&mut self, id: &DocumentId) -> &mut DocumentEntry {
        let now = self.tick();
        let entry = self.documents.entry(id.clone()).or_default();
        entry.last_accessed = now;
        entry
    }

    fn touch(&mut self, id: &DocumentId) {
        let now = self.tick();
        if let Some(entry) = self.documents.get_mut(id) {
            entry.last_accessed = now;
        }
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    fn entry_count(&self) -> usize {
        self.documents.values().map(|entry| entry.items.len()).sum()
    }

    /// Insert or replace an artifact and charge its size
    fn insert(&mut self, id: &DocumentId, key: EntryKey, artifact: Artifact, bytes: usize) {
        let entry = self.entry_mut(id);

        let mut released = 0;
        if let Some(previous) = entry.items.shift_remove(&key) {
            entry.memory_bytes -= previous.bytes;
            released = previous.bytes;
            if matches!(key, EntryKey::Text { .. }) {
                entry.text_pages -= 1;
            }
        }

        if matches!(key, EntryKey::Text { .. }) {
            entry.text_pages += 1;
        }
        entry.items.insert(key, Stored { artifact, bytes });
        entry.memory_bytes += bytes;

        self.total_bytes = self.total_bytes - released + bytes;
    }

    /// Remove one artifact from a document and release its size
    fn remove_at(&mut self, id: &DocumentId, index: usize) -> Option<usize> {
        let entry = self.documents.get_mut(id)?;
        let (key, stored) = entry.items.shift_remove_index(index)?;
        entry.memory_bytes -= stored.bytes;
        if matches!(key, EntryKey::Text { .. }) {
            entry.text_pages -= 1;
        }
        self.total_bytes -= stored.bytes;
        Some(stored.bytes)
    }

    /// Drop the oldest text pages of a document above the text limit
    fn trim_text(&mut self, id: &DocumentId) {
        let limit = self.config.max_text_pages;
        loop {
            let oldest = match self.documents.get(id) {
                Some(entry) if entry.text_pages > limit => entry
                    .items
                    .keys()
                    .position(|key| matches!(key, EntryKey::Text { .. })),
                _ => None,
            };
            let Some(index) = oldest else {
                break;
            };
            if self.remove_at(id, index).is_none() {
                break;
            }
            trace!(document = %id, "dropped oldest cached text page");
        }
    }

    /// Least recently accessed document with entries, skipping `protected`
    fn lru_document(&self, protected: Option<&DocumentId>) -> Option<DocumentId> {
        self.documents
            .iter()
            .filter(|(id, entry)| !entry.items.is_empty() && Some(*id) != protected)
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(id, _)| id.clone())
    }

    /// Evict artifacts until the total fits the budget
    fn evict(&mut self, inserting: Option<&DocumentId>) {
        let protected = self.active.clone().or_else(|| inserting.cloned());

        while self.total_bytes > self.config.max_bytes && self.entry_count() > 1 {
            let victim = self
                .lru_document(protected.as_ref())
                .or_else(|| self.lru_document(None));
            let Some(victim) = victim else {
                break;
            };
            match self.remove_at(&victim, 0) {
                Some(bytes) => {
                    self.evictions += 1;
                    debug!(
                        document = %victim,
                        bytes,
                        total = self.total_bytes,
                        budget = self.config.max_bytes,
                        "evicted cached artifact"
                    );
                }
                None => break,
            }
        }
    }
}

/// Memory-bounded cache of rendered pages, tiles and text
///
/// Cloning is cheap; clones share the same storage.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use pdf_reader_cache::{CacheConfig, CachedPage, DocumentId, PageCache};
///
/// let cache = PageCache::new(CacheConfig::default().with_max_mb(64));
/// let doc = DocumentId::from("report.pdf");
///
/// let pixels = Bytes::from(vec![0u8; 800 * 1035 * 4]);
/// cache.add_page(&doc, 0, CachedPage::new(800, 1035, pixels));
///
/// // Width within tolerance is a hit.
/// assert!(cache.get_page(&doc, 0, 800.4).is_some());
/// assert!(cache.get_page(&doc, 0, 1024.0).is_none());
///
/// // Any resolution can serve as a placeholder.
/// assert_eq!(cache.get_any_page(&doc, 0).map(|p| p.width), Some(800));
/// ```
#[derive(Clone)]
pub struct PageCache {
    state: Arc<Mutex<CacheState>>,
}

impl PageCache {
    /// Create a cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(config))),
        }
    }

    /// Create a cache with a budget in megabytes and default settings
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(CacheConfig::default().with_max_mb(megabytes))
    }

    /// Hold the cache lock for a sequence of writes
    ///
    /// Nothing else reads or writes the cache until the writer is dropped,
    /// so a caller can check a condition and insert without a purge landing
    /// in between.
    pub fn write(&self) -> CacheWriter<'_> {
        CacheWriter {
            state: self.state.lock(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> CacheConfig {
        self.state.lock().config.clone()
    }

    /// Rendered page whose width is within tolerance of `width`
    pub fn get_page(&self, id: &DocumentId, page_index: u32, width: f32) -> Option<CachedPage> {
        let mut state = self.state.lock();
        let tolerance = state.config.width_tolerance;

        let found = state.documents.get(id).and_then(|entry| {
            entry.items.iter().find_map(|(key, stored)| match (key, &stored.artifact) {
                (EntryKey::Page { page, width: w, .. }, Artifact::Page(cached))
                    if *page == page_index && (*w as f32 - width).abs() < tolerance =>
                {
                    Some(cached.clone())
                }
                _ => None,
            })
        });

        state.record(found.is_some());
        if found.is_some() {
            state.touch(id);
            trace!(document = %id, page = page_index, width, "page cache hit");
        }
        found
    }

    /// Highest-resolution cached rendering of a page, if any
    pub fn get_any_page(&self, id: &DocumentId, page_index: u32) -> Option<CachedPage> {
        let mut state = self.state.lock();

        let found = state.documents.get(id).and_then(|entry| {
            entry
                .items
                .iter()
                .filter_map(|(key, stored)| match (key, &stored.artifact) {
                    (EntryKey::Page { page, .. }, Artifact::Page(cached))
                        if *page == page_index =>
                    {
                        Some(cached)
                    }
                    _ => None,
                })
                .max_by_key(|cached| cached.width)
                .cloned()
        });

        state.record(found.is_some());
        if found.is_some() {
            state.touch(id);
        }
        found
    }

    /// Insert or replace a rendered page
    ///
    /// Replacing an entry with the same dimensions releases the previous
    /// size before charging the new one. May evict to stay within budget.
    pub fn add_page(&self, id: &DocumentId, page_index: u32, page: CachedPage) {
        self.write().add_page(id, page_index, page);
    }

    /// Rendered tile at an exact target width and rectangle
    pub fn get_tile(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        rect: TileRect,
    ) -> Option<CachedTile> {
        let mut state = self.state.lock();
        let key = EntryKey::Tile {
            page: page_index,
            target_width,
            rect,
        };

        let found = state
            .documents
            .get(id)
            .and_then(|entry| entry.items.get(&key))
            .and_then(|stored| match &stored.artifact {
                Artifact::Tile(tile) => Some(tile.clone()),
                _ => None,
            });

        state.record(found.is_some());
        if found.is_some() {
            state.touch(id);
        }
        found
    }

    /// Insert or replace a rendered tile
    pub fn add_tile(&self, id: &DocumentId, page_index: u32, target_width: u32, tile: CachedTile) {
        self.write().add_tile(id, page_index, target_width, tile);
    }

    /// Extracted text for a page
    pub fn get_text(&self, id: &DocumentId, page_index: u32) -> Option<Arc<PageText>> {
        let mut state = self.state.lock();
        let key = EntryKey::Text { page: page_index };

        let found = state
            .documents
            .get(id)
            .and_then(|entry| entry.items.get(&key))
            .and_then(|stored| match &stored.artifact {
                Artifact::Text(text) => Some(Arc::clone(text)),
                _ => None,
            });

        state.record(found.is_some());
        if found.is_some() {
            state.touch(id);
        }
        found
    }

    /// Insert or replace extracted text for a page
    ///
    /// Text is charged a fixed estimate. Once a document holds more text
    /// pages than the configured limit the oldest-inserted one is dropped.
    pub fn add_text(&self, id: &DocumentId, page_index: u32, text: impl Into<Arc<PageText>>) {
        self.write().add_text(id, page_index, text);
    }

    /// Store the document info snapshot
    pub fn set_info(&self, id: &DocumentId, info: PdfInfo) {
        self.write().set_info(id, info);
    }

    /// Document info snapshot
    pub fn get_info(&self, id: &DocumentId) -> Option<PdfInfo> {
        let mut state = self.state.lock();
        let found = state.documents.get(id).and_then(|entry| entry.info);
        state.record(found.is_some());
        found
    }

    /// Store the document outline
    pub fn set_bookmarks(&self, id: &DocumentId, bookmarks: impl Into<Arc<Vec<Bookmark>>>) {
        self.write().set_bookmarks(id, bookmarks);
    }

    /// Document outline
    pub fn get_bookmarks(&self, id: &DocumentId) -> Option<Arc<Vec<Bookmark>>> {
        let mut state = self.state.lock();
        let found = state
            .documents
            .get(id)
            .and_then(|entry| entry.bookmarks.clone());
        state.record(found.is_some());
        found
    }

    /// Store the document annotations
    pub fn set_annotations(
        &self,
        id: &DocumentId,
        annotations: impl Into<Arc<Vec<Annotation>>>,
    ) {
        self.write().set_annotations(id, annotations);
    }

    /// Document annotations
    pub fn get_annotations(&self, id: &DocumentId) -> Option<Arc<Vec<Annotation>>> {
        let mut state = self.state.lock();
        let found = state
            .documents
            .get(id)
            .and_then(|entry| entry.annotations.clone());
        state.record(found.is_some());
        found
    }

    /// Remove every cached artifact and snapshot for a document
    ///
    /// Returns the number of bytes released.
    pub fn purge_document(&self, id: &DocumentId) -> usize {
        let mut state = self.state.lock();
        let Some(entry) = state.documents.remove(id) else {
            return 0;
        };
        state.total_bytes -= entry.memory_bytes;
        if state.active.as_ref() == Some(id) {
            state.active = None;
        }
        debug!(
            document = %id,
            bytes = entry.memory_bytes,
            entries = entry.items.len(),
            "purged document cache"
        );
        entry.memory_bytes
    }

    /// Mark the document currently in the foreground
    ///
    /// The active document is the last one eviction touches.
    pub fn set_active_document(&self, id: Option<DocumentId>) {
        self.state.lock().active = id;
    }

    /// The document currently in the foreground
    pub fn active_document(&self) -> Option<DocumentId> {
        self.state.lock().active.clone()
    }

    /// Check if a document has an entry
    pub fn contains_document(&self, id: &DocumentId) -> bool {
        self.state.lock().documents.contains_key(id)
    }

    /// Tracked global total in bytes
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Tracked total for one document in bytes
    pub fn document_bytes(&self, id: &DocumentId) -> usize {
        self.state
            .lock()
            .documents
            .get(id)
            .map_or(0, |entry| entry.memory_bytes)
    }

    /// Sum of every artifact's size recomputed from its payload
    ///
    /// Always equal to [`total_bytes`](Self::total_bytes).
    pub fn recomputed_total(&self) -> usize {
        let state = self.state.lock();
        let ratio = state.config.estimated_compression_ratio;
        let text_bytes = state.config.text_entry_bytes;
        state
            .documents
            .values()
            .flat_map(|entry| entry.items.values())
            .map(|stored| match &stored.artifact {
                Artifact::Page(page) => page.memory_size(ratio),
                Artifact::Tile(tile) => tile.memory_size(ratio),
                Artifact::Text(_) => text_bytes,
            })
            .sum()
    }

    /// Number of cached artifacts across all documents
    pub fn entry_count(&self) -> usize {
        self.state.lock().entry_count()
    }

    /// Change the byte budget, evicting immediately if it shrank
    pub fn set_max_bytes(&self, max_bytes: usize) {
        let mut state = self.state.lock();
        state.config.max_bytes = max_bytes;
        state.evict(None);
    }

    /// Drop everything, including statistics
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let config = state.config.clone();
        *state = CacheState::new(config);
    }

    /// Snapshot of cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            documents: state.documents.len(),
            entries: state.entry_count(),
            memory_used: state.total_bytes,
            memory_limit: state.config.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

/// Exclusive write access to a [`PageCache`], see [`PageCache::write`]
pub struct CacheWriter<'a> {
    state: MutexGuard<'a, CacheState>,
}

impl CacheWriter<'_> {
    /// Insert or replace a rendered page
    pub fn add_page(&mut self, id: &DocumentId, page_index: u32, page: CachedPage) {
        let bytes = page.memory_size(self.state.config.estimated_compression_ratio);
        let key = EntryKey::Page {
            page: page_index,
            width: page.width,
            height: page.height,
        };
        self.state.insert(id, key, Artifact::Page(page), bytes);
        self.state.evict(Some(id));
    }

    /// Insert or replace a rendered tile
    pub fn add_tile(
        &mut self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        tile: CachedTile,
    ) {
        let bytes = tile.memory_size(self.state.config.estimated_compression_ratio);
        let key = EntryKey::Tile {
            page: page_index,
            target_width,
            rect: tile.rect,
        };
        self.state.insert(id, key, Artifact::Tile(tile), bytes);
        self.state.evict(Some(id));
    }

    /// Insert or replace extracted text for a page
    pub fn add_text(&mut self, id: &DocumentId, page_index: u32, text: impl Into<Arc<PageText>>) {
        let bytes = self.state.config.text_entry_bytes;
        self.state.insert(
            id,
            EntryKey::Text { page: page_index },
            Artifact::Text(text.into()),
            bytes,
        );
        self.state.trim_text(id);
        self.state.evict(Some(id));
    }

    pub fn set_info(&mut self, id: &DocumentId, info: PdfInfo) {
        self.state.entry_mut(id).info = Some(info);
    }

    pub fn set_bookmarks(&mut self, id: &DocumentId, bookmarks: impl Into<Arc<Vec<Bookmark>>>) {
        self.state.entry_mut(id).bookmarks = Some(bookmarks.into());
    }

    pub fn set_annotations(
        &mut self,
        id: &DocumentId,
        annotations: impl Into<Arc<Vec<Annotation>>>,
    ) {
        self.state.entry_mut(id).annotations = Some(annotations.into());
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("PageCache")
            .field("documents", &stats.documents)
            .field("entries", &stats.entries)
            .field("memory_used", &stats.memory_used)
            .field("memory_limit", &stats.memory_limit)
            .finish()
    }
}
