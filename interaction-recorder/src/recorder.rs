use crate::channel::{HostChannel, MessagePort};
use crate::error::{RecorderError, Result};
use crate::events::OperationRecord;
use crate::page::{EventKind, PageAccessor};
use crate::storage::LogStorage;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod capture;
pub mod session;
pub mod sink;
pub mod structure;

pub use self::capture::EventCapture;
pub use self::session::{RecorderSession, RecorderStatus};
pub use self::sink::{ExportPolicy, LogSink};
pub use self::structure::{StructureRequest, StructureTriggerConfig, UserAction};

use self::capture::CaptureHandler;
use self::structure::StructureTrigger;

/// Configuration for the interaction recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Whether to record pointer activation (click) events
    pub record_clicks: bool,

    /// Whether to record value-change (input) events
    pub record_inputs: bool,

    /// Whether to record scroll events
    pub record_scrolls: bool,

    /// Mirror the log into durable storage when a storage backend is configured
    pub persist_logs: bool,

    /// Name of the durable slot holding the log
    pub storage_key: String,

    /// Capacity of the in-process broadcast of new records
    pub broadcast_capacity: usize,

    /// Element id of the highlight overlay removed when capture stops
    pub highlight_container_id: String,

    /// Refresh the local highlight after every captured record, not only on enable
    pub highlight_after_each_event: bool,

    /// Export behaviour for requests arriving from outside the page.
    ///
    /// With the defaults (`Consume` here, `Snapshot` for the page), an export sent on both
    /// channels depends on arrival order: the page reply carries the records when it is
    /// handled first and is empty when the runtime export has already consumed them. The
    /// runtime reply carries the records either way.
    pub runtime_export_policy: ExportPolicy,

    /// Export behaviour for requests posted inside the page
    pub page_export_policy: ExportPolicy,

    pub structure: StructureTriggerConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_clicks: true,
            record_inputs: true,
            record_scrolls: true,
            persist_logs: true,
            storage_key: "nanoRecorderLogs".to_string(),
            broadcast_capacity: 100,
            highlight_container_id: "playwright-highlight-container".to_string(),
            highlight_after_each_event: false,
            // The extension side takes ownership of what it exports
            runtime_export_policy: ExportPolicy::Consume,
            page_export_policy: ExportPolicy::Snapshot,
            structure: StructureTriggerConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// A recorder that only keeps the log in memory and never talks to the host
    ///
    /// # Examples
    ///
    /// ```rust
    /// use interaction_recorder::RecorderConfig;
    ///
    /// let config = RecorderConfig::ephemeral();
    /// assert!(!config.persist_logs);
    /// assert!(!config.structure.enabled);
    /// ```
    pub fn ephemeral() -> Self {
        Self {
            persist_logs: false,
            structure: StructureTriggerConfig {
                enabled: false,
                ..StructureTriggerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Event kinds whose listeners attach on enable, in registration order
    pub fn event_kinds(&self) -> Vec<EventKind> {
        [
            (EventKind::Click, self.record_clicks),
            (EventKind::Input, self.record_inputs),
            (EventKind::Scroll, self.record_scrolls),
        ]
        .into_iter()
        .filter_map(|(kind, on)| on.then_some(kind))
        .collect()
    }
}

/// Builder for [`InteractionRecorder`]
pub struct RecorderBuilder {
    page: Arc<dyn PageAccessor>,
    config: RecorderConfig,
    storage: Option<Arc<dyn LogStorage>>,
    host: Option<Arc<dyn HostChannel>>,
    page_port: Option<Arc<dyn MessagePort>>,
}

impl RecorderBuilder {
    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable storage for the log
    pub fn storage(mut self, storage: Arc<dyn LogStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Channel to the extension outside the page (tab id, build requests, export replies)
    pub fn host(mut self, host: Arc<dyn HostChannel>) -> Self {
        self.host = Some(host);
        self
    }

    /// In-page channel (log broadcasts, export replies to same-frame consumers)
    pub fn page_port(mut self, port: Arc<dyn MessagePort>) -> Self {
        self.page_port = Some(port);
        self
    }

    /// Assemble the recorder. Needs a tokio runtime when persistence or the structure
    /// trigger is active.
    pub fn build(self) -> Result<InteractionRecorder> {
        let RecorderBuilder {
            page,
            config,
            storage,
            host,
            page_port,
        } = self;

        let storage = storage.filter(|_| config.persist_logs);
        let runtime = Handle::try_current().ok();
        if runtime.is_none() && (storage.is_some() || config.structure.enabled) {
            return Err(RecorderError::InitializationError(
                "a tokio runtime is required for persistence and the structure trigger"
                    .to_string(),
            ));
        }

        let session = Arc::new(RecorderSession::new());
        let (events_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        let mut sink = LogSink::new(Arc::clone(&session), events_tx, page_port.clone());
        if let (Some(storage), Some(runtime)) = (&storage, &runtime) {
            sink = sink.with_persistence(Arc::clone(storage), config.storage_key.clone(), runtime);
        }
        let sink = Arc::new(sink);

        let structure = Arc::new(StructureTrigger::new(
            Arc::clone(&page),
            host.clone(),
            Arc::clone(&session),
            config.structure.clone(),
            runtime,
        ));

        let handler = Arc::new(CaptureHandler::new(
            Arc::clone(&page),
            Arc::clone(&sink),
            config
                .highlight_after_each_event
                .then(|| Arc::clone(&structure)),
        ));
        let capture = EventCapture::new(
            page,
            handler,
            config.event_kinds(),
            config.highlight_container_id.clone(),
        );

        info!("Interaction recorder session {} created", session.id());

        Ok(InteractionRecorder {
            session,
            capture,
            sink,
            structure,
            host,
            page_port,
            config,
            lifecycle: Mutex::new(()),
        })
    }
}

/// The interaction recorder: enabled flag, capture listeners and log delivery for one page
pub struct InteractionRecorder {
    session: Arc<RecorderSession>,
    capture: EventCapture,
    sink: Arc<LogSink>,
    structure: Arc<StructureTrigger>,
    host: Option<Arc<dyn HostChannel>>,
    page_port: Option<Arc<dyn MessagePort>>,
    config: RecorderConfig,
    /// Serialises enable/disable so the flag and the listeners never disagree
    lifecycle: Mutex<()>,
}

impl InteractionRecorder {
    pub fn builder(page: Arc<dyn PageAccessor>) -> RecorderBuilder {
        RecorderBuilder {
            page,
            config: RecorderConfig::default(),
            storage: None,
            host: None,
            page_port: None,
        }
    }

    /// Start recording. Returns false if already enabled.
    pub fn enable(&self) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.session.transition(RecorderStatus::Enabled) {
            debug!("Recorder already enabled, ignoring");
            return false;
        }
        self.capture.attach();
        info!("🎬 Interaction recording enabled (session {})", self.session.id());
        self.structure.request();
        true
    }

    /// Stop recording. Returns false if already disabled. The buffered log is kept.
    pub fn disable(&self) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.session.transition(RecorderStatus::Disabled) {
            debug!("Recorder already disabled, ignoring");
            return false;
        }
        self.capture.detach();
        info!(
            "⏹️  Interaction recording disabled (session {}, {} records)",
            self.session.id(),
            self.session.len()
        );
        true
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        if enabled {
            self.enable()
        } else {
            self.disable()
        }
    }

    pub fn status(&self) -> RecorderStatus {
        self.session.status()
    }

    pub fn is_enabled(&self) -> bool {
        self.session.is_enabled()
    }

    pub fn is_attached(&self) -> bool {
        self.capture.is_attached()
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id()
    }

    pub fn session(&self) -> &RecorderSession {
        &self.session
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub(crate) fn host(&self) -> Option<&Arc<dyn HostChannel>> {
        self.host.as_ref()
    }

    pub(crate) fn page_port(&self) -> Option<&Arc<dyn MessagePort>> {
        self.page_port.as_ref()
    }

    /// Copy of the buffered log
    pub fn records(&self) -> Vec<OperationRecord> {
        self.session.snapshot()
    }

    /// Export the buffered log as of this call
    pub fn export(&self, policy: ExportPolicy) -> Vec<OperationRecord> {
        self.sink.export(policy)
    }

    /// Wait for the log persisted by a previous page instance to be reloaded.
    ///
    /// The persistence writer reads the slot before its first write and puts the stored
    /// records in front of anything captured since this page loaded. Returns the buffer
    /// length afterwards.
    pub async fn restore(&self) -> Result<usize> {
        self.sink.loaded().await
    }

    /// Wait for the persistence writer to catch up with every record so far
    pub async fn persisted(&self) {
        self.sink.persisted().await;
    }

    /// Get a stream of newly recorded operations
    pub fn event_stream(&self) -> impl Stream<Item = OperationRecord> {
        let mut rx = self.sink.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(record) => yield record,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Keep the stream alive, a slow overlay only misses records
                        warn!("Record stream lagged, skipped {} records", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for InteractionRecorder {
    fn drop(&mut self) {
        // Page teardown: leave no listeners behind
        if self.capture.detach() {
            debug!("Detached capture listeners on teardown");
        }
    }
}
