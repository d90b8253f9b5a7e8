//! Scripted in-memory rendering backend shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pdf_reader_cache::{
    Annotation, Bookmark, DocumentId, PageText, PdfInfo, PdfRect, TextItem, TileRect,
};
use pdf_reader_core::{ReadingPosition, ReadingPositionSink};
use pdf_reader_render::{encode_page, encode_tile, BackendError, BackendResult, RenderBackend};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// US Letter in PDF units
pub const LETTER: (f32, f32) = (612.0, 792.0);

/// One backend call as recorded by [`ScriptedBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Page { doc: String, page: u32, width: u32 },
    Tile { doc: String, page: u32, width: u32, rect: TileRect },
    Info { doc: String },
    Text { doc: String, page: u32 },
    Bookmarks { doc: String },
    Annotations { doc: String },
}

/// Backend serving solid-colour pages for registered documents
///
/// When gated, every call waits for a permit released by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    documents: Mutex<HashMap<DocumentId, PdfInfo>>,
    failing_pages: Mutex<HashSet<(DocumentId, u32)>>,
    failing_tiles: Mutex<HashSet<(DocumentId, TileRect)>>,
    malformed: Mutex<bool>,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose calls block until [`ScriptedBackend::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_document(self, id: &str, page_count: u32) -> Self {
        self.add_document(id, page_count);
        self
    }

    pub fn add_document(&self, id: &str, page_count: u32) {
        self.documents.lock().insert(
            DocumentId::from(id),
            PdfInfo {
                page_count,
                width: LETTER.0,
                height: LETTER.1,
            },
        );
    }

    pub fn fail_page(&self, id: &str, page: u32) {
        self.failing_pages.lock().insert((DocumentId::from(id), page));
    }

    pub fn fail_tile(&self, id: &str, rect: TileRect) {
        self.failing_tiles.lock().insert((DocumentId::from(id), rect));
    }

    /// Serve page payloads with a truncated pixel buffer
    pub fn send_malformed(&self) {
        *self.malformed.lock() = true;
    }

    /// Let `permits` blocked calls proceed
    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn page_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Page { .. }))
            .count()
    }

    async fn enter(&self, call: Call) {
        self.calls.lock().push(call);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn info(&self, id: &DocumentId) -> BackendResult<PdfInfo> {
        self.documents
            .lock()
            .get(id)
            .copied()
            .ok_or_else(|| BackendError::DocumentNotOpen(id.clone()))
    }

    fn check_page(&self, id: &DocumentId, page_index: u32) -> BackendResult<PdfInfo> {
        let info = self.info(id)?;
        if page_index >= info.page_count {
            return Err(BackendError::PageOutOfRange {
                page_index,
                page_count: info.page_count,
            });
        }
        if self.failing_pages.lock().contains(&(id.clone(), page_index)) {
            return Err(BackendError::engine("scripted page failure"));
        }
        Ok(info)
    }
}

pub fn page_height(target_width: u32) -> u32 {
    (target_width as f32 * (LETTER.1 / LETTER.0)).floor() as u32
}

#[async_trait]
impl RenderBackend for ScriptedBackend {
    async fn render_page(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
    ) -> BackendResult<Bytes> {
        self.enter(Call::Page {
            doc: id.to_string(),
            page: page_index,
            width: target_width,
        })
        .await;
        self.check_page(id, page_index)?;

        let height = page_height(target_width);
        let mut pixels = vec![page_index as u8; (target_width * height * 4) as usize];
        if *self.malformed.lock() {
            pixels.truncate(pixels.len() / 2);
        }
        Ok(encode_page(target_width, height, &pixels))
    }

    async fn render_tile(
        &self,
        id: &DocumentId,
        page_index: u32,
        target_width: u32,
        rect: TileRect,
    ) -> BackendResult<Bytes> {
        self.enter(Call::Tile {
            doc: id.to_string(),
            page: page_index,
            width: target_width,
            rect,
        })
        .await;
        self.check_page(id, page_index)?;
        if self.failing_tiles.lock().contains(&(id.clone(), rect)) {
            return Err(BackendError::engine("scripted tile failure"));
        }

        let pixels = vec![0xff; (rect.width * rect.height * 4) as usize];
        Ok(encode_tile(rect, &pixels))
    }

    async fn fetch_pdf_info(&self, id: &DocumentId) -> BackendResult<PdfInfo> {
        self.enter(Call::Info { doc: id.to_string() }).await;
        self.info(id)
    }

    async fn fetch_text_by_page(
        &self,
        id: &DocumentId,
        page_index: u32,
    ) -> BackendResult<PageText> {
        self.enter(Call::Text {
            doc: id.to_string(),
            page: page_index,
        })
        .await;
        self.check_page(id, page_index)?;
        Ok(PageText {
            items: vec![TextItem {
                text: format!("page {}", page_index + 1),
                x: 72.0,
                y: 72.0,
                width: 100.0,
                height: 12.0,
            }],
            width: LETTER.0,
            height: LETTER.1,
        })
    }

    async fn fetch_bookmarks(&self, id: &DocumentId) -> BackendResult<Vec<Bookmark>> {
        self.enter(Call::Bookmarks { doc: id.to_string() }).await;
        let info = self.info(id)?;
        Ok((0..info.page_count)
            .map(|page| Bookmark {
                title: format!("Chapter {}", page + 1),
                page_index: Some(page),
                children: Vec::new(),
            })
            .collect())
    }

    async fn fetch_annotations(&self, id: &DocumentId) -> BackendResult<Vec<Annotation>> {
        self.enter(Call::Annotations { doc: id.to_string() }).await;
        self.info(id)?;
        Ok(vec![Annotation {
            id: "a1".to_string(),
            page_index: 0,
            subtype: "highlight".to_string(),
            rect: PdfRect {
                left: 72.0,
                top: 700.0,
                right: 300.0,
                bottom: 688.0,
            },
            contents: Some("note".to_string()),
            author: None,
            color: Some("#ffcc00".to_string()),
        }])
    }
}

/// Persistence collaborator that records every position it receives
#[derive(Default)]
pub struct RecordingSink {
    positions: Mutex<Vec<ReadingPosition>>,
}

impl RecordingSink {
    pub fn positions(&self) -> Vec<ReadingPosition> {
        self.positions.lock().clone()
    }

    pub fn pages(&self) -> Vec<u32> {
        self.positions
            .lock()
            .iter()
            .map(|position| position.current_page)
            .collect()
    }
}

impl ReadingPositionSink for RecordingSink {
    fn save_position(&self, position: &ReadingPosition) {
        self.positions.lock().push(position.clone());
    }
}

/// Wait until the backend has seen `count` calls
pub async fn wait_for_calls(backend: &Arc<ScriptedBackend>, count: usize) {
    for _ in 0..1_000 {
        if backend.call_count() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "backend saw {} calls, expected {}",
        backend.call_count(),
        count
    );
}
