//! Control messages and the channels they travel on.
//!
//! Commands reach the recorder over two independent channels: the extension runtime
//! (outside the page) and in-page `postMessage`. Delivery on either is at-most-once and
//! unordered relative to the other, so every command handled here is idempotent.

use crate::error::{RecorderError, Result};
use crate::events::OperationRecord;
use crate::recorder::{InteractionRecorder, UserAction};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Where a command came from; replies go back the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSource {
    /// Extension runtime (side panel, background)
    Runtime,
    /// Same-frame `postMessage`
    Page,
}

/// Commands accepted by the recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    #[serde(rename = "TOGGLE", alias = "NANO_RECORDER_TOGGLE")]
    Toggle { enabled: bool },

    #[serde(rename = "EXPORT", alias = "NANO_RECORDER_EXPORT")]
    Export,
}

/// Messages the recorder sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// One new record, broadcast to same-frame listeners
    #[serde(rename = "LOG")]
    Log { log: OperationRecord },

    #[serde(rename = "EXPORT_RESULT")]
    ExportResult { logs: Vec<OperationRecord> },

    /// Ask the runtime which tab this page lives in
    #[serde(rename = "GET_TAB_ID")]
    GetTabId,

    #[serde(rename = "user_action")]
    UserAction { action: UserAction },
}

/// Runtime answer to [`OutboundMessage::GetTabId`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabIdResponse {
    #[serde(default)]
    pub tab_id: Option<i64>,
}

/// One-way, fire-and-forget message channel
pub trait MessagePort: Send + Sync {
    /// Fails with [`RecorderError::ChannelUnavailable`] when the other side is gone
    fn post(&self, message: &OutboundMessage) -> Result<()>;
}

/// The extension runtime as seen from the page
#[async_trait]
pub trait HostChannel: MessagePort {
    /// Resolve the id of the tab hosting this page (`GET_TAB_ID` round trip)
    async fn request_tab_id(&self) -> Result<Option<i64>>;
}

/// Port that keeps every posted message, for headless hosts and tests
#[derive(Debug, Default)]
pub struct MemoryPort {
    sent: Mutex<Vec<OutboundMessage>>,
    closed: AtomicBool,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the receiving side going away
    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MessagePort for MemoryPort {
    fn post(&self, message: &OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RecorderError::ChannelUnavailable(
                "receiving end closed".to_string(),
            ));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Host stub answering tab id requests with a fixed value
#[derive(Debug, Default)]
pub struct MemoryHost {
    port: MemoryPort,
    tab_id: Mutex<Option<i64>>,
}

impl MemoryHost {
    pub fn new(tab_id: Option<i64>) -> Self {
        Self {
            port: MemoryPort::new(),
            tab_id: Mutex::new(tab_id),
        }
    }

    pub fn port(&self) -> &MemoryPort {
        &self.port
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.port.sent()
    }
}

impl MessagePort for MemoryHost {
    fn post(&self, message: &OutboundMessage) -> Result<()> {
        self.port.post(message)
    }
}

#[async_trait]
impl HostChannel for MemoryHost {
    async fn request_tab_id(&self) -> Result<Option<i64>> {
        self.port.post(&OutboundMessage::GetTabId)?;
        Ok(*self.tab_id.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Routes control messages from both channels to the recorder
pub struct ControlChannel {
    recorder: Arc<InteractionRecorder>,
}

impl ControlChannel {
    pub fn new(recorder: Arc<InteractionRecorder>) -> Self {
        Self { recorder }
    }

    pub fn recorder(&self) -> &InteractionRecorder {
        &self.recorder
    }

    /// Apply a command. Export replies are also posted back on the source channel.
    pub fn handle(
        &self,
        source: ChannelSource,
        message: InboundMessage,
    ) -> Option<OutboundMessage> {
        match message {
            InboundMessage::Toggle { enabled } => {
                if !self.recorder.set_enabled(enabled) {
                    debug!(
                        "Duplicate toggle (enabled={}) from {:?}, state unchanged",
                        enabled, source
                    );
                }
                None
            }
            InboundMessage::Export => {
                let policy = match source {
                    ChannelSource::Runtime => self.recorder.config().runtime_export_policy,
                    ChannelSource::Page => self.recorder.config().page_export_policy,
                };
                let reply = OutboundMessage::ExportResult {
                    logs: self.recorder.export(policy),
                };
                self.reply(source, &reply);
                Some(reply)
            }
        }
    }

    /// Parse and apply a raw message. Anything that is not a recorder command (including
    /// our own broadcasts echoed on the page channel) is ignored.
    pub fn handle_json(&self, source: ChannelSource, raw: &str) -> Option<OutboundMessage> {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => self.handle_value(source, value),
            Err(e) => {
                debug!("Ignoring malformed message from {:?}: {}", source, e);
                None
            }
        }
    }

    pub fn handle_value(
        &self,
        source: ChannelSource,
        value: serde_json::Value,
    ) -> Option<OutboundMessage> {
        let kind = value
            .get("type")
            .and_then(|kind| kind.as_str())
            .map(str::to_string);
        match serde_json::from_value::<InboundMessage>(value) {
            Ok(message) => self.handle(source, message),
            Err(_) => {
                debug!("Ignoring message of type {:?} from {:?}", kind, source);
                None
            }
        }
    }

    fn reply(&self, source: ChannelSource, message: &OutboundMessage) {
        let result = match source {
            ChannelSource::Runtime => self.recorder.host().map(|host| host.post(message)),
            ChannelSource::Page => self.recorder.page_port().map(|port| port.post(message)),
        };
        match result {
            Some(Err(e)) => warn!("Failed to deliver export result to {:?}: {}", source, e),
            None => debug!("No {:?} channel configured, export result returned only", source),
            Some(Ok(())) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_toggle_and_legacy_alias() {
        let toggle: InboundMessage =
            serde_json::from_str(r#"{"type":"TOGGLE","enabled":true}"#).unwrap();
        assert_eq!(toggle, InboundMessage::Toggle { enabled: true });

        let legacy: InboundMessage =
            serde_json::from_str(r#"{"type":"NANO_RECORDER_TOGGLE","enabled":false}"#).unwrap();
        assert_eq!(legacy, InboundMessage::Toggle { enabled: false });

        let export: InboundMessage = serde_json::from_str(r#"{"type":"EXPORT"}"#).unwrap();
        assert_eq!(export, InboundMessage::Export);
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let reply = OutboundMessage::ExportResult { logs: vec![] };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"type": "EXPORT_RESULT", "logs": []})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::GetTabId).unwrap(),
            serde_json::json!({"type": "GET_TAB_ID"})
        );
    }

    #[test]
    fn test_tab_id_response_reads_camel_case() {
        let response: TabIdResponse = serde_json::from_str(r#"{"tabId": 12}"#).unwrap();
        assert_eq!(response.tab_id, Some(12));
        let empty: TabIdResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.tab_id, None);
    }

    #[test]
    fn test_closed_port_reports_channel_unavailable() {
        let port = MemoryPort::new();
        port.set_closed(true);
        let err = port.post(&OutboundMessage::GetTabId).unwrap_err();
        assert!(matches!(err, RecorderError::ChannelUnavailable(_)));
        assert!(port.sent().is_empty());
    }
}
