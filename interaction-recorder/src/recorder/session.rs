use crate::events::OperationRecord;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Whether the recorder is currently capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderStatus {
    #[default]
    Disabled,
    Enabled,
}

#[derive(Debug, Default)]
struct SessionState {
    status: RecorderStatus,
    buffer: Vec<OperationRecord>,
    last_timestamp: Option<DateTime<Utc>>,
    tab_id: Option<i64>,
    enable_cycles: u64,
}

/// Enabled flag and log buffer for one page lifetime.
///
/// The flag check and the append happen under the same lock, so no record can land in
/// the buffer once `disable` has returned.
#[derive(Debug)]
pub struct RecorderSession {
    id: Uuid,
    state: Mutex<SessionState>,
}

impl Default for RecorderSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> RecorderStatus {
        self.state().status
    }

    pub fn is_enabled(&self) -> bool {
        self.status() == RecorderStatus::Enabled
    }

    /// Number of times the session went from disabled to enabled
    pub fn enable_cycles(&self) -> u64 {
        self.state().enable_cycles
    }

    /// Move to `status`. Returns false when already there.
    pub(crate) fn transition(&self, status: RecorderStatus) -> bool {
        let mut state = self.state();
        if state.status == status {
            return false;
        }
        state.status = status;
        if status == RecorderStatus::Enabled {
            state.enable_cycles += 1;
        }
        true
    }

    /// Append `record` if enabled. Returns the record as stored.
    ///
    /// The timestamp is clamped to the previous one so the buffer stays ordered even if
    /// the wall clock steps backwards; the resolved tab id is stamped on the context.
    pub(crate) fn append(&self, mut record: OperationRecord) -> Option<OperationRecord> {
        let mut state = self.state();
        if state.status != RecorderStatus::Enabled {
            return None;
        }
        if let Some(last) = state.last_timestamp {
            if record.timestamp < last {
                record.timestamp = last;
            }
        }
        if record.context.tab_id.is_none() {
            record.context.tab_id = state.tab_id;
        }
        state.last_timestamp = Some(record.timestamp);
        state.buffer.push(record.clone());
        Some(record)
    }

    /// Copy of the buffer at call time
    pub fn snapshot(&self) -> Vec<OperationRecord> {
        self.state().buffer.clone()
    }

    pub(crate) fn drain(&self) -> Vec<OperationRecord> {
        std::mem::take(&mut self.state().buffer)
    }

    /// Put records loaded from durable storage in front of anything captured since the
    /// page loaded. Returns the buffer length afterwards.
    pub(crate) fn restore(&self, stored: Vec<OperationRecord>) -> usize {
        let mut state = self.state();
        let captured = std::mem::replace(&mut state.buffer, stored);
        state.buffer.extend(captured);
        state.last_timestamp = state.buffer.iter().map(|r| r.timestamp).max();
        state.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tab_id(&self) -> Option<i64> {
        self.state().tab_id
    }

    pub(crate) fn set_tab_id(&self, tab_id: i64) {
        self.state().tab_id = Some(tab_id);
    }
}
