use crate::dom::{ElementHandle, MemoryDocument, MemoryElement};
use crate::error::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// DOM events the recorder listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    Input,
    Scroll,
}

impl EventKind {
    /// DOM event type name
    pub fn dom_name(&self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::Input => "input",
            EventKind::Scroll => "scroll",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dom_name())
    }
}

/// A dispatched DOM event as seen by a capturing listener
#[derive(Clone)]
pub struct PageEvent {
    pub kind: EventKind,
    /// Event target, `None` when the event was dispatched on the document or window
    pub target: Option<Arc<dyn ElementHandle>>,
}

pub type Listener = Arc<dyn Fn(&PageEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollOffset {
    pub x: f64,
    pub y: f64,
}

/// Capability view of the hosting page.
///
/// Everything the capture path reads from `window`/`document` goes through this trait.
pub trait PageAccessor: Send + Sync {
    fn url(&self) -> String;

    fn title(&self) -> String;

    fn scroll_offset(&self) -> ScrollOffset;

    fn document_element(&self) -> Option<Arc<dyn ElementHandle>>;

    /// Register a capturing-phase listener on the document-level event target
    fn add_capture_listener(&self, kind: EventKind, listener: Listener) -> ListenerId;

    /// Returns false if the listener was not registered
    fn remove_capture_listener(&self, id: ListenerId) -> bool;

    /// Remove a transient overlay container by element id. Returns false if absent.
    fn remove_overlay(&self, container_id: &str) -> bool;

    /// Whether the in-page structural-metadata builder has been loaded
    fn structure_builder_ready(&self) -> bool {
        false
    }

    fn run_structure_builder(&self, _show_highlight_elements: bool) -> Result<()> {
        Err(RecorderError::ChannelUnavailable(
            "structure builder not available".to_string(),
        ))
    }
}

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

/// In-memory page hosting a [`MemoryDocument`].
///
/// Dispatch is synchronous and runs listeners in registration order. A listener removed
/// while a dispatch is in flight is not invoked for the rest of that dispatch.
pub struct MemoryPage {
    document: MemoryDocument,
    url: Mutex<String>,
    title: Mutex<String>,
    scroll: Mutex<ScrollOffset>,
    listeners: Mutex<Vec<Registration>>,
    next_listener_id: AtomicU64,
    overlays: Mutex<HashSet<String>>,
    builder_ready: AtomicBool,
    builder_runs: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryPage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            document: MemoryDocument::new(),
            url: Mutex::new(url.to_string()),
            title: Mutex::new(title.to_string()),
            scroll: Mutex::new(ScrollOffset::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            overlays: Mutex::new(HashSet::new()),
            builder_ready: AtomicBool::new(false),
            builder_runs: AtomicUsize::new(0),
        }
    }

    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }

    pub fn set_url(&self, url: &str) {
        *lock(&self.url) = url.to_string();
    }

    pub fn set_title(&self, title: &str) {
        *lock(&self.title) = title.to_string();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn listener_count_for(&self, kind: EventKind) -> usize {
        lock(&self.listeners)
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    /// Dispatch an event to the capturing listeners registered for its kind
    pub fn dispatch(&self, event: PageEvent) {
        let snapshot: Vec<(ListenerId, Listener)> = lock(&self.listeners)
            .iter()
            .filter(|registration| registration.kind == event.kind)
            .map(|registration| (registration.id, Arc::clone(&registration.listener)))
            .collect();

        for (id, listener) in snapshot {
            let still_registered = lock(&self.listeners)
                .iter()
                .any(|registration| registration.id == id);
            if still_registered {
                listener(&event);
            }
        }
    }

    pub fn click(&self, target: &MemoryElement) {
        self.dispatch(PageEvent {
            kind: EventKind::Click,
            target: Some(target.to_handle()),
        });
    }

    /// Set the control's value and fire `input` on it
    pub fn type_into(&self, target: &MemoryElement, value: &str) {
        target.set_value(value);
        self.dispatch(PageEvent {
            kind: EventKind::Input,
            target: Some(target.to_handle()),
        });
    }

    /// Move the viewport and fire `scroll` on the document
    pub fn scroll_to(&self, x: f64, y: f64) {
        *lock(&self.scroll) = ScrollOffset { x, y };
        self.dispatch(PageEvent {
            kind: EventKind::Scroll,
            target: None,
        });
    }

    /// Simulate the highlight overlay being injected into the page
    pub fn insert_overlay(&self, container_id: &str) {
        lock(&self.overlays).insert(container_id.to_string());
    }

    pub fn has_overlay(&self, container_id: &str) -> bool {
        lock(&self.overlays).contains(container_id)
    }

    /// Simulate the structural-metadata builder script finishing its load
    pub fn mark_structure_builder_loaded(&self) {
        self.builder_ready.store(true, Ordering::SeqCst);
    }

    pub fn structure_builder_runs(&self) -> usize {
        self.builder_runs.load(Ordering::SeqCst)
    }
}

/// Conversion of concrete element types into shared handles for dispatch
pub trait ElementHandleExt {
    fn to_handle(&self) -> Arc<dyn ElementHandle>;
}

impl ElementHandleExt for MemoryElement {
    fn to_handle(&self) -> Arc<dyn ElementHandle> {
        Arc::new(self.clone())
    }
}

impl PageAccessor for MemoryPage {
    fn url(&self) -> String {
        lock(&self.url).clone()
    }

    fn title(&self) -> String {
        lock(&self.title).clone()
    }

    fn scroll_offset(&self) -> ScrollOffset {
        *lock(&self.scroll)
    }

    fn document_element(&self) -> Option<Arc<dyn ElementHandle>> {
        Some(self.document.document_element().to_handle())
    }

    fn add_capture_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push(Registration { id, kind, listener });
        id
    }

    fn remove_capture_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|registration| registration.id != id);
        listeners.len() != before
    }

    fn remove_overlay(&self, container_id: &str) -> bool {
        lock(&self.overlays).remove(container_id)
    }

    fn structure_builder_ready(&self) -> bool {
        self.builder_ready.load(Ordering::SeqCst)
    }

    fn run_structure_builder(&self, _show_highlight_elements: bool) -> Result<()> {
        if !self.structure_builder_ready() {
            return Err(RecorderError::ChannelUnavailable(
                "structure builder not loaded".to_string(),
            ));
        }
        self.builder_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
