//! Per-document viewer state
//!
//! Small ephemeral UI state (zoom, tool, sidebar, current page, pending
//! navigation) that drives tile planning and rendering. Each document's state
//! lives in a [`tokio::sync::watch`] channel so observers are notified
//! exactly when that document's state changes.

use parking_lot::Mutex;
use pdf_reader_cache::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::trace;

/// Ascending zoom steps
pub const ZOOM_STEPS: [f32; 11] = [0.1, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0, 5.0];

/// Smallest zoom step
pub const MIN_ZOOM: f32 = ZOOM_STEPS[0];

/// Largest zoom step
pub const MAX_ZOOM: f32 = ZOOM_STEPS[ZOOM_STEPS.len() - 1];

/// Smallest step strictly above `scale`, saturating at the maximum
pub fn next_zoom_in(scale: f32) -> f32 {
    ZOOM_STEPS
        .iter()
        .copied()
        .find(|step| *step > scale)
        .unwrap_or(MAX_ZOOM)
}

/// Largest step strictly below `scale`, saturating at the minimum
pub fn next_zoom_out(scale: f32) -> f32 {
    ZOOM_STEPS
        .iter()
        .rev()
        .copied()
        .find(|step| *step < scale)
        .unwrap_or(MIN_ZOOM)
}

/// Pointer tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Cursor,
    Hand,
}

/// Side panel shown next to the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidebarPanel {
    #[default]
    None,
    Comments,
    Bookmarks,
    Search,
    Dictionary,
}

/// Viewer state of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerState {
    /// Zoom factor, always one of [`ZOOM_STEPS`]
    pub scale: f32,
    pub tool: Tool,
    pub sidebar: SidebarPanel,
    /// Zero-based page believed to be in view
    pub current_page: u32,
    /// One-shot navigation request, cleared by the view once it scrolled
    pub pending_goto_page: Option<u32>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            tool: Tool::Cursor,
            sidebar: SidebarPanel::None,
            current_page: 0,
            pending_goto_page: None,
        }
    }
}

/// Viewer state of every open document
///
/// # Example
///
/// ```
/// use pdf_reader_cache::DocumentId;
/// use pdf_reader_core::ViewerStore;
///
/// let store = ViewerStore::new();
/// let doc = DocumentId::from("book.pdf");
///
/// let mut changes = store.subscribe(&doc);
/// store.zoom_in(&doc);
/// assert!(changes.has_changed().unwrap());
/// assert_eq!(changes.borrow_and_update().scale, 1.25);
///
/// // Setting the same page again does not notify.
/// store.set_current_page(&doc, 0);
/// assert!(!changes.has_changed().unwrap());
/// ```
#[derive(Debug, Default)]
pub struct ViewerStore {
    states: Mutex<HashMap<DocumentId, watch::Sender<ViewerState>>>,
}

impl ViewerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a document, created with defaults on first read
    pub fn get_state(&self, id: &DocumentId) -> ViewerState {
        let mut states = self.states.lock();
        let state = states
            .entry(id.clone())
            .or_insert_with(|| watch::Sender::new(ViewerState::default()))
            .borrow()
            .clone();
        state
    }

    /// Observe a document's state
    pub fn subscribe(&self, id: &DocumentId) -> watch::Receiver<ViewerState> {
        let mut states = self.states.lock();
        states
            .entry(id.clone())
            .or_insert_with(|| watch::Sender::new(ViewerState::default()))
            .subscribe()
    }

    /// Drop a document's state; subscribers see the channel close
    pub fn remove_state(&self, id: &DocumentId) -> bool {
        self.states.lock().remove(id).is_some()
    }

    /// Check if a document has state
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.states.lock().contains_key(id)
    }

    /// Number of documents with state
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Apply `modify` and notify subscribers if it reports a change
    fn update<F>(&self, id: &DocumentId, modify: F) -> bool
    where
        F: FnOnce(&mut ViewerState) -> bool,
    {
        let mut states = self.states.lock();
        let sender = states
            .entry(id.clone())
            .or_insert_with(|| watch::Sender::new(ViewerState::default()));
        let changed = sender.send_if_modified(modify);
        if changed {
            trace!(document = %id, "viewer state changed");
        }
        changed
    }

    fn set_scale(&self, id: &DocumentId, next: impl FnOnce(f32) -> f32) -> f32 {
        let mut scale = 1.0;
        self.update(id, |state| {
            scale = next(state.scale);
            let changed = state.scale != scale;
            state.scale = scale;
            changed
        });
        scale
    }

    /// Move to the next larger zoom step; returns the new scale
    pub fn zoom_in(&self, id: &DocumentId) -> f32 {
        self.set_scale(id, next_zoom_in)
    }

    /// Move to the next smaller zoom step; returns the new scale
    pub fn zoom_out(&self, id: &DocumentId) -> f32 {
        self.set_scale(id, next_zoom_out)
    }

    /// Reset the zoom to exactly 1.0
    pub fn reset_zoom(&self, id: &DocumentId) -> f32 {
        self.set_scale(id, |_| 1.0)
    }

    /// Ctrl/cmd + wheel zoom: scrolling up zooms in, down zooms out
    pub fn zoom_by_wheel(&self, id: &DocumentId, delta_y: f32) -> f32 {
        if delta_y < 0.0 {
            self.zoom_in(id)
        } else if delta_y > 0.0 {
            self.zoom_out(id)
        } else {
            self.get_state(id).scale
        }
    }

    pub fn set_tool(&self, id: &DocumentId, tool: Tool) {
        self.update(id, |state| {
            let changed = state.tool != tool;
            state.tool = tool;
            changed
        });
    }

    pub fn set_sidebar(&self, id: &DocumentId, sidebar: SidebarPanel) {
        self.update(id, |state| {
            let changed = state.sidebar != sidebar;
            state.sidebar = sidebar;
            changed
        });
    }

    /// Record the page in view; returns false (and notifies nobody) if unchanged
    pub fn set_current_page(&self, id: &DocumentId, page: u32) -> bool {
        self.update(id, |state| {
            if state.current_page == page {
                return false;
            }
            state.current_page = page;
            true
        })
    }

    /// Ask the view to scroll to `page`
    pub fn goto_page(&self, id: &DocumentId, page: u32) {
        self.update(id, |state| {
            state.pending_goto_page = Some(page);
            true
        });
    }

    /// Acknowledge a navigation request
    pub fn clear_goto_page(&self, id: &DocumentId) {
        self.update(id, |state| state.pending_goto_page.take().is_some());
    }

    /// Snapshot of every document's current page
    pub fn current_pages(&self) -> Vec<(DocumentId, u32)> {
        self.states
            .lock()
            .iter()
            .map(|(id, sender)| (id.clone(), sender.borrow().current_page))
            .collect()
    }

    /// Drop every document's state
    pub fn clear(&self) {
        self.states.lock().clear();
    }
}
