use super::sink::LogSink;
use super::structure::StructureTrigger;
use crate::events::{Action, OperationRecord, PageContext, TargetInfo};
use crate::locator::locate;
use crate::page::{EventKind, ListenerId, PageAccessor, PageEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Turns dispatched DOM events into operation records
pub(crate) struct CaptureHandler {
    page: Arc<dyn PageAccessor>,
    sink: Arc<LogSink>,
    /// Set when the highlight should be refreshed after every captured record
    highlight: Option<Arc<StructureTrigger>>,
}

impl CaptureHandler {
    pub(crate) fn new(
        page: Arc<dyn PageAccessor>,
        sink: Arc<LogSink>,
        highlight: Option<Arc<StructureTrigger>>,
    ) -> Self {
        Self {
            page,
            sink,
            highlight,
        }
    }

    fn handle(&self, event: &PageEvent) {
        let record = self.build_record(event);
        if self.sink.record(record) {
            if let Some(trigger) = &self.highlight {
                trigger.refresh_highlight();
            }
        }
    }

    pub(crate) fn build_record(&self, event: &PageEvent) -> OperationRecord {
        let mut context = PageContext {
            url: self.page.url(),
            title: self.page.title(),
            ..Default::default()
        };

        match event.kind {
            EventKind::Click => {
                OperationRecord::new(Action::Click, Some(self.target_of(event)), context)
            }
            EventKind::Input => {
                let mut target = self.target_of(event);
                target.value = event.target.as_ref().and_then(|element| element.form_value());
                OperationRecord::new(Action::Input, Some(target), context)
            }
            EventKind::Scroll => {
                let offset = self.page.scroll_offset();
                context.scroll_x = Some(offset.x);
                context.scroll_y = Some(offset.y);
                OperationRecord::new(Action::Scroll, None, context)
            }
        }
    }

    fn target_of(&self, event: &PageEvent) -> TargetInfo {
        match &event.target {
            Some(element) => locate(element.as_ref()),
            None => {
                debug!("{} event without element target, locator unavailable", event.kind);
                TargetInfo::default()
            }
        }
    }
}

/// Owns the capturing listeners on the page.
///
/// `attach` and `detach` are idempotent; listeners are installed at most once between
/// an attach and the following detach.
pub struct EventCapture {
    page: Arc<dyn PageAccessor>,
    handler: Arc<CaptureHandler>,
    kinds: Vec<EventKind>,
    overlay_id: String,
    listeners: Mutex<Option<Vec<ListenerId>>>,
}

impl EventCapture {
    pub(crate) fn new(
        page: Arc<dyn PageAccessor>,
        handler: Arc<CaptureHandler>,
        kinds: Vec<EventKind>,
        overlay_id: String,
    ) -> Self {
        Self {
            page,
            handler,
            kinds,
            overlay_id,
            listeners: Mutex::new(None),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Option<Vec<ListenerId>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.listeners().is_some()
    }

    /// Install the capturing listeners. Returns false if already attached.
    pub fn attach(&self) -> bool {
        let mut listeners = self.listeners();
        if listeners.is_some() {
            return false;
        }

        let ids = self
            .kinds
            .iter()
            .map(|kind| {
                let handler = Arc::clone(&self.handler);
                let listener = move |event: &PageEvent| handler.handle(event);
                self.page.add_capture_listener(*kind, Arc::new(listener))
            })
            .collect::<Vec<_>>();

        debug!("Attached {} capture listeners", ids.len());
        *listeners = Some(ids);
        true
    }

    /// Remove the listeners and any highlight overlay. Returns false if not attached.
    pub fn detach(&self) -> bool {
        let Some(ids) = self.listeners().take() else {
            return false;
        };

        for id in &ids {
            if !self.page.remove_capture_listener(*id) {
                debug!("Capture listener {:?} was already gone", id);
            }
        }
        if self.page.remove_overlay(&self.overlay_id) {
            debug!("Removed highlight overlay '{}'", self.overlay_id);
        }
        true
    }
}
