use super::session::RecorderSession;
use crate::channel::{HostChannel, MessagePort, OutboundMessage};
use crate::error::{RecorderError, Result};
use crate::events::Action;
use crate::page::PageAccessor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Settings for the structural-metadata (DOM tree) build requested on every enable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureTriggerConfig {
    pub enabled: bool,

    /// Re-checks of the in-page builder after the first attempt
    pub max_retries: u32,

    pub retry_interval_ms: u64,

    /// Free-text reason forwarded to the host
    pub intent: String,

    pub show_highlight_elements: bool,

    /// Element index to focus, -1 for none
    pub focus_element: i64,

    pub viewport_expansion: i64,

    pub debug_mode: bool,
}

impl Default for StructureTriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 10,
            retry_interval_ms: 100,
            intent: "Build DOM tree for manual recording".to_string(),
            show_highlight_elements: true,
            focus_element: -1,
            viewport_expansion: 0,
            debug_mode: false,
        }
    }
}

impl StructureTriggerConfig {
    pub fn request_for(&self, tab_id: i64, url: String) -> StructureRequest {
        StructureRequest {
            intent: self.intent.clone(),
            tab_id,
            url,
            show_highlight_elements: self.show_highlight_elements,
            focus_element: self.focus_element,
            viewport_expansion: self.viewport_expansion,
            debug_mode: self.debug_mode,
        }
    }
}

/// Parameters of a `build_dom_tree` request sent to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureRequest {
    pub intent: String,
    pub tab_id: i64,
    pub url: String,
    pub show_highlight_elements: bool,
    pub focus_element: i64,
    pub viewport_expansion: i64,
    pub debug_mode: bool,
}

/// Action envelope understood by the host's action handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(rename = "type")]
    pub action: Action,
    pub params: StructureRequest,
}

impl UserAction {
    pub fn build_dom_tree(params: StructureRequest) -> Self {
        Self {
            action: Action::BuildDomTree,
            params,
        }
    }
}

/// Best-effort structural-metadata refresh.
///
/// Nothing here affects capture: every failure is logged and the attempt abandoned.
pub(crate) struct StructureTrigger {
    page: Arc<dyn PageAccessor>,
    host: Option<Arc<dyn HostChannel>>,
    session: Arc<RecorderSession>,
    config: StructureTriggerConfig,
    runtime: Option<Handle>,
}

impl StructureTrigger {
    pub(crate) fn new(
        page: Arc<dyn PageAccessor>,
        host: Option<Arc<dyn HostChannel>>,
        session: Arc<RecorderSession>,
        config: StructureTriggerConfig,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            page,
            host,
            session,
            config,
            runtime,
        }
    }

    fn runtime(&self) -> Result<&Handle> {
        self.runtime.as_ref().ok_or_else(|| {
            RecorderError::InitializationError("no tokio runtime for structure trigger".into())
        })
    }

    /// Ask the host for a tree build and refresh the local highlight, once per enable cycle
    pub(crate) fn request(&self) {
        if !self.config.enabled {
            return;
        }
        let runtime = match self.runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        let cycle = self.session.enable_cycles();

        if let Some(host) = &self.host {
            runtime.spawn(request_host_build(
                Arc::clone(host),
                Arc::clone(&self.page),
                Arc::clone(&self.session),
                self.config.clone(),
                cycle,
            ));
        }
        self.spawn_highlight(runtime, cycle);
    }

    /// Re-run only the local highlight for the current cycle
    pub(crate) fn refresh_highlight(&self) {
        if !self.config.enabled {
            return;
        }
        if let Ok(runtime) = self.runtime() {
            self.spawn_highlight(runtime, self.session.enable_cycles());
        }
    }

    fn spawn_highlight(&self, runtime: &Handle, cycle: u64) {
        runtime.spawn(poll_highlight(
            Arc::clone(&self.page),
            Arc::clone(&self.session),
            self.config.clone(),
            cycle,
        ));
    }
}

fn still_current(session: &RecorderSession, cycle: u64) -> bool {
    session.is_enabled() && session.enable_cycles() == cycle
}

async fn request_host_build(
    host: Arc<dyn HostChannel>,
    page: Arc<dyn PageAccessor>,
    session: Arc<RecorderSession>,
    config: StructureTriggerConfig,
    cycle: u64,
) {
    let tab_id = match host.request_tab_id().await {
        Ok(Some(tab_id)) => tab_id,
        Ok(None) => {
            warn!("Host returned no tab id, build_dom_tree not triggered");
            return;
        }
        Err(e) => {
            warn!("Failed to resolve tab id: {}", e);
            return;
        }
    };
    session.set_tab_id(tab_id);

    if !still_current(&session, cycle) {
        debug!("Recorder toggled while resolving tab id, skipping build_dom_tree");
        return;
    }

    let action = UserAction::build_dom_tree(config.request_for(tab_id, page.url()));
    match host.post(&OutboundMessage::UserAction { action }) {
        Ok(()) => info!("Requested build_dom_tree for tab {}", tab_id),
        Err(e) => warn!("Failed to send build_dom_tree request: {}", e),
    }
}

async fn poll_highlight(
    page: Arc<dyn PageAccessor>,
    session: Arc<RecorderSession>,
    config: StructureTriggerConfig,
    cycle: u64,
) {
    let interval = Duration::from_millis(config.retry_interval_ms);

    for attempt in 0..=config.max_retries {
        if !still_current(&session, cycle) {
            return;
        }
        if page.structure_builder_ready() {
            if let Err(e) = page.run_structure_builder(config.show_highlight_elements) {
                warn!("Structure builder failed: {}", e);
            }
            return;
        }
        if attempt < config.max_retries {
            tokio::time::sleep(interval).await;
        }
    }

    debug!(
        "Structure builder not loaded after {} attempts, giving up",
        config.max_retries + 1
    );
}
