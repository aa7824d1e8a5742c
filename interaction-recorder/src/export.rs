//! Operation log files: pretty JSON export, loading and sanity checks.

use crate::error::{RecorderError, Result};
use crate::events::{Action, OperationRecord};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Write the log as a pretty-printed JSON array
pub fn export_operation_logs<P: AsRef<Path>>(logs: &[OperationRecord], path: P) -> Result<()> {
    let json = pretty_print_operation_logs(logs)?;
    std::fs::write(path.as_ref(), json)?;
    info!(
        "Exported {} operation records to {:?}",
        logs.len(),
        path.as_ref()
    );
    Ok(())
}

/// Read a log written by [`export_operation_logs`] or an `EXPORT_RESULT` payload
pub fn load_operation_logs<P: AsRef<Path>>(path: P) -> Result<Vec<OperationRecord>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    // Accept both the bare array and the wrapped export message
    let logs = match value {
        serde_json::Value::Object(mut object) if object.contains_key("logs") => object
            .remove("logs")
            .unwrap_or(serde_json::Value::Array(Vec::new())),
        other => other,
    };
    Ok(serde_json::from_value(logs)?)
}

pub fn pretty_print_operation_logs(logs: &[OperationRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(logs)?)
}

/// Check the invariants a captured log must satisfy: timestamps never decrease and
/// scroll records carry no target.
pub fn check_timeline(logs: &[OperationRecord]) -> Result<()> {
    for (index, pair) in logs.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            return Err(RecorderError::InvalidLog(format!(
                "record {} ({}) is earlier than record {} ({})",
                index + 1,
                pair[1].timestamp_iso(),
                index,
                pair[0].timestamp_iso()
            )));
        }
    }
    if let Some(index) = logs
        .iter()
        .position(|log| log.action == Action::Scroll && log.target.is_some())
    {
        return Err(RecorderError::InvalidLog(format!(
            "scroll record {index} has a target"
        )));
    }
    Ok(())
}

/// Per-action and per-url record counts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogSummary {
    pub total: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_url: BTreeMap<String, usize>,
    /// Records whose xpath is empty because the element could not be located
    pub unlocated: usize,
}

pub fn summarize(logs: &[OperationRecord]) -> LogSummary {
    let mut summary = LogSummary {
        total: logs.len(),
        ..Default::default()
    };
    for log in logs {
        *summary
            .by_action
            .entry(log.action.to_string())
            .or_default() += 1;
        *summary.by_url.entry(log.context.url.clone()).or_default() += 1;
        if log.target.as_ref().is_some_and(|target| target.xpath.is_empty()) {
            summary.unlocated += 1;
        }
    }
    summary
}
