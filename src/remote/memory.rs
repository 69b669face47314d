//! In-process authoritative board.
//!
//! Serves as the remote for offline sessions and tests. Every write is
//! journaled before it is applied, and writes or fetches can be switched to
//! fail to simulate an outage.

use crate::{
    config::IndexPolicy,
    domain::{Board, BoardId, ColumnId, ColumnValue, GroupId, ItemId, StatusLabel},
    error::{Result, SyncError},
    remote::{RemoteBoard, RemoteCall},
    sync::store::BoardStateStore,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    store: Option<BoardStateStore>,
    journal: Vec<RemoteCall>,
    fetches: usize,
    next_item: u64,
    write_failure: Option<SyncError>,
    fetch_failure: Option<SyncError>,
    latency: Option<Duration>,
}

/// A [`RemoteBoard`] that keeps the authoritative board in memory
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new(board: Board) -> Self {
        let remote = Self::default();
        remote.lock().store = Some(BoardStateStore::new(board, IndexPolicy::Clamp));
        remote
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current authoritative board
    pub fn board(&self) -> Option<Board> {
        self.lock().store.as_ref().map(BoardStateStore::snapshot)
    }

    /// Writes received so far, including failed ones
    pub fn journal(&self) -> Vec<RemoteCall> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Makes every following write fail with `error` (`None` restores service)
    pub fn fail_writes(&self, error: Option<SyncError>) {
        self.lock().write_failure = error;
    }

    /// Makes every following fetch fail with `error` (`None` restores service)
    pub fn fail_fetches(&self, error: Option<SyncError>) {
        self.lock().fetch_failure = error;
    }

    /// Delays every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Changes the authoritative board directly, as another collaborator would
    pub fn edit<R>(&self, f: impl FnOnce(&mut BoardStateStore) -> R) -> Option<R> {
        self.lock().store.as_mut().map(f)
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn write(&self, call: RemoteCall) -> Result<Option<ItemId>> {
        self.delay().await;
        let mut state = self.lock();
        state.journal.push(call.clone());
        if let Some(err) = state.write_failure.clone() {
            log::debug!("[boardsync.remote.memory] Failing {} on request", call.kind());
            return Err(err);
        }

        state.next_item += 1;
        let next_id = ItemId::new(format!("item-{}", state.next_item));
        let store = state
            .store
            .as_mut()
            .ok_or_else(|| SyncError::RemoteRejected("no board loaded".to_string()))?;
        call.apply_authoritative(store, || next_id)
    }
}

#[async_trait]
impl RemoteBoard for MemoryRemote {
    async fn fetch_board(&self, board_id: &BoardId) -> Result<Board> {
        self.delay().await;
        let mut state = self.lock();
        state.fetches += 1;
        if let Some(err) = state.fetch_failure.clone() {
            return Err(err);
        }
        match state.store.as_ref() {
            Some(store) if &store.board().id == board_id => Ok(store.snapshot()),
            _ => Err(SyncError::BoardNotFound(board_id.to_string())),
        }
    }

    async fn create_item(
        &self,
        group_id: &GroupId,
        name: &str,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<ItemId> {
        let call = RemoteCall::CreateItem {
            group_id: group_id.clone(),
            name: name.to_string(),
            values: values.clone(),
        };
        self.write(call)
            .await?
            .ok_or_else(|| SyncError::RemoteRejected("create returned no id".to_string()))
    }

    async fn rename_item(&self, item_id: &ItemId, name: &str) -> Result<()> {
        self.write(RemoteCall::RenameItem {
            item_id: item_id.clone(),
            name: name.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn set_column_value(
        &self,
        item_id: &ItemId,
        column_key: &str,
        value: Option<&ColumnValue>,
    ) -> Result<()> {
        self.write(RemoteCall::SetColumnValue {
            item_id: item_id.clone(),
            column_key: column_key.to_string(),
            value: value.cloned(),
        })
        .await
        .map(|_| ())
    }

    async fn move_item(&self, item_id: &ItemId, target_group: &GroupId) -> Result<()> {
        self.write(RemoteCall::MoveItem {
            item_id: item_id.clone(),
            target_group: target_group.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_items(&self, group_id: &GroupId, ordered: &[ItemId]) -> Result<()> {
        self.write(RemoteCall::ReorderItems {
            group_id: group_id.clone(),
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_groups(&self, ordered: &[GroupId]) -> Result<()> {
        self.write(RemoteCall::ReorderGroups {
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_columns(&self, ordered: &[ColumnId]) -> Result<()> {
        self.write(RemoteCall::ReorderColumns {
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_item(&self, item_id: &ItemId) -> Result<()> {
        self.write(RemoteCall::DeleteItem {
            item_id: item_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_group(&self, group_id: &GroupId) -> Result<()> {
        self.write(RemoteCall::DeleteGroup {
            group_id: group_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_column(&self, column_id: &ColumnId) -> Result<()> {
        self.write(RemoteCall::DeleteColumn {
            column_id: column_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn rename_group(&self, group_id: &GroupId, title: &str) -> Result<()> {
        self.write(RemoteCall::RenameGroup {
            group_id: group_id.clone(),
            title: title.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn add_status_label(&self, column_id: &ColumnId, label: &StatusLabel) -> Result<()> {
        self.write(RemoteCall::AddStatusLabel {
            column_id: column_id.clone(),
            label: label.clone(),
        })
        .await
        .map(|_| ())
    }
}
