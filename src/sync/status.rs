use crate::error::SyncError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// A non-fatal failure shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct SyncNotice {
    pub message: String,
    pub error: SyncError,
    pub at: DateTime<Utc>,
}

/// Progress and error indicators for the view layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// A local edit started and its quiet period has not elapsed yet
    pub editing: bool,
    /// A background poll fetch is outstanding
    pub syncing: bool,
    /// Optimistic mutations and coalesced writes awaiting the remote
    pub in_flight: usize,
    /// Coalesced edits still waiting for their debounce to fire
    pub pending_edits: usize,
    pub last_error: Option<SyncNotice>,
}

/// Shared publisher of [`SyncStatus`]
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn is_editing(&self) -> bool {
        self.tx.borrow().editing
    }

    pub fn in_flight(&self) -> usize {
        self.tx.borrow().in_flight
    }

    pub fn set_editing(&self, editing: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.editing != editing;
            status.editing = editing;
            changed
        });
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.tx.send_if_modified(|status| {
            let changed = status.syncing != syncing;
            status.syncing = syncing;
            changed
        });
    }

    pub fn set_pending_edits(&self, pending: usize) {
        self.tx.send_if_modified(|status| {
            let changed = status.pending_edits != pending;
            status.pending_edits = pending;
            changed
        });
    }

    pub fn begin_remote_call(&self) {
        self.tx.send_modify(|status| status.in_flight += 1);
    }

    pub fn end_remote_call(&self) {
        self.tx
            .send_modify(|status| status.in_flight = status.in_flight.saturating_sub(1));
    }

    /// Records a user-visible failure
    pub fn report_error(&self, message: impl Into<String>, error: SyncError) {
        let notice = SyncNotice {
            message: message.into(),
            error,
            at: Utc::now(),
        };
        self.tx.send_modify(|status| status.last_error = Some(notice));
    }

    pub fn clear_error(&self) {
        self.tx.send_if_modified(|status| status.last_error.take().is_some());
    }
}
