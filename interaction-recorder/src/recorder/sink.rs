use super::session::RecorderSession;
use crate::channel::{MessagePort, OutboundMessage};
use crate::error::{RecorderError, Result};
use crate::events::OperationRecord;
use crate::storage::LogStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// What an export does to the buffered log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPolicy {
    /// Return a copy and keep everything
    #[default]
    Snapshot,
    /// Hand the records over: drain the buffer and remove the durable slot
    Consume,
}

enum PersistCommand {
    Flush,
    Clear,
    Sync(oneshot::Sender<()>),
}

/// Result of merging the stored log into the buffer; `None` until the writer has loaded it
type LoadOutcome = Option<std::result::Result<usize, String>>;

/// Delivers every accepted record to the buffer, durable storage and in-page listeners.
///
/// Persistence and broadcast are fire-and-forget: the capture path never waits on them
/// and never sees their failures.
pub struct LogSink {
    session: Arc<RecorderSession>,
    persist_tx: Option<mpsc::UnboundedSender<PersistCommand>>,
    loaded_rx: Option<watch::Receiver<LoadOutcome>>,
    events_tx: broadcast::Sender<OperationRecord>,
    page_port: Option<Arc<dyn MessagePort>>,
}

impl LogSink {
    pub(crate) fn new(
        session: Arc<RecorderSession>,
        events_tx: broadcast::Sender<OperationRecord>,
        page_port: Option<Arc<dyn MessagePort>>,
    ) -> Self {
        Self {
            session,
            persist_tx: None,
            loaded_rx: None,
            events_tx,
            page_port,
        }
    }

    /// Start the writer task that mirrors the buffer into `storage` under `key`.
    ///
    /// The writer first merges whatever the slot holds from a previous page instance into
    /// the buffer, so no write can replace that log before it has been read.
    pub(crate) fn with_persistence(
        mut self,
        storage: Arc<dyn LogStorage>,
        key: String,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded_rx) = watch::channel(None);
        runtime.spawn(run_writer(
            Arc::clone(&self.session),
            storage,
            key,
            rx,
            loaded_tx,
        ));
        self.persist_tx = Some(tx);
        self.loaded_rx = Some(loaded_rx);
        self
    }

    /// Record an interaction. Returns false if the session is disabled and the record
    /// was dropped.
    pub fn record(&self, record: OperationRecord) -> bool {
        let action = record.action;
        let Some(stored) = self.session.append(record) else {
            debug!("Recorder disabled, dropping late {} record", action);
            return false;
        };

        self.request_flush();

        // no subscribers is fine
        let _ = self.events_tx.send(stored.clone());

        if let Some(port) = &self.page_port {
            if let Err(e) = port.post(&OutboundMessage::Log { log: stored }) {
                warn!("Failed to broadcast log to page listeners: {}", e);
            }
        }
        true
    }

    /// Return the buffered records as of this call
    pub fn export(&self, policy: ExportPolicy) -> Vec<OperationRecord> {
        match policy {
            ExportPolicy::Snapshot => self.session.snapshot(),
            ExportPolicy::Consume => {
                let logs = self.session.drain();
                self.send(PersistCommand::Clear);
                info!("Exported and consumed {} records", logs.len());
                logs
            }
        }
    }

    /// Ask the writer to mirror the current buffer
    pub(crate) fn request_flush(&self) {
        self.send(PersistCommand::Flush);
    }

    /// Wait until every persistence command issued so far has been processed
    pub async fn persisted(&self) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(PersistCommand::Sync(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Wait until the stored log has been merged into the buffer. Returns the buffer
    /// length afterwards.
    pub async fn loaded(&self) -> Result<usize> {
        let Some(rx) = &self.loaded_rx else {
            return Ok(self.session.len());
        };
        let mut rx = rx.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| {
                RecorderError::PersistenceFailure(
                    "persistence writer stopped before loading the stored log".to_string(),
                )
            })?;
        match outcome {
            Some(Err(e)) => Err(RecorderError::PersistenceFailure(e)),
            _ => Ok(self.session.len()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationRecord> {
        self.events_tx.subscribe()
    }

    fn send(&self, command: PersistCommand) {
        if let Some(tx) = &self.persist_tx {
            if tx.send(command).is_err() {
                warn!("Persistence writer has stopped, log kept in memory only");
            }
        }
    }
}

async fn run_writer(
    session: Arc<RecorderSession>,
    storage: Arc<dyn LogStorage>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
    loaded_tx: watch::Sender<LoadOutcome>,
) {
    let outcome = load_stored(&session, storage.as_ref(), &key).await;
    let _ = loaded_tx.send(Some(outcome));

    let mut pending: Option<PersistCommand> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            PersistCommand::Flush => {
                // Queued flushes would write the same buffer again
                while let Ok(queued) = rx.try_recv() {
                    if !matches!(queued, PersistCommand::Flush) {
                        pending = Some(queued);
                        break;
                    }
                }
                let records = session.snapshot();
                if let Err(e) = storage.save(&key, &records).await {
                    warn!(
                        "Failed to persist {} records to '{}': {}. Keeping in-memory log",
                        records.len(),
                        key,
                        e
                    );
                }
            }
            PersistCommand::Clear => {
                // Records merged in after the export are still owed to the slot
                let records = session.snapshot();
                let result = if records.is_empty() {
                    storage.remove(&key).await
                } else {
                    storage.save(&key, &records).await
                };
                if let Err(e) = result {
                    warn!("Failed to clear stored log '{}': {}", key, e);
                }
            }
            PersistCommand::Sync(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Persistence writer for '{}' stopped", key);
}

async fn load_stored(
    session: &RecorderSession,
    storage: &dyn LogStorage,
    key: &str,
) -> std::result::Result<usize, String> {
    match storage.load(key).await {
        Ok(Some(stored)) if !stored.is_empty() => {
            let restored = stored.len();
            let len = session.restore(stored);
            info!("Restored {} stored records ({} total)", restored, len);
            Ok(restored)
        }
        Ok(_) => Ok(0),
        Err(e) => {
            warn!("Failed to load stored log '{}': {}", key, e);
            Err(e.to_string())
        }
    }
}
