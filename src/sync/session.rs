//! One open board and everything that keeps it in sync.

use crate::config::SyncConfig;
use crate::domain::{Board, BoardId, ColumnId, ColumnValue, GroupId, ItemId, StatusLabel};
use crate::error::Result;
use crate::remote::RemoteBoard;
use crate::sync::coalescer::{EditCoalescer, FieldEdit};
use crate::sync::coordinator::{MutationCoordinator, PendingMutation};
use crate::sync::drag::DragReorderEngine;
use crate::sync::mutation::Mutation;
use crate::sync::reconcile::{ReconciliationLoop, RefreshTrigger, TickOutcome};
use crate::sync::status::{StatusHandle, SyncStatus};
use crate::sync::store::{BoardStateStore, SharedStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// The sync engine for one open board.
///
/// Owns every background task it starts. Closing the session, or dropping
/// it, stops polling and aborts pending timers.
pub struct BoardSession {
    board_id: BoardId,
    store: SharedStore,
    status: StatusHandle,
    coordinator: MutationCoordinator,
    coalescer: EditCoalescer,
    drag: DragReorderEngine,
    reconcile: ReconciliationLoop,
    closed: AtomicBool,
}

impl BoardSession {
    /// Fetches `board_id` and starts background reconciliation.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        board_id: BoardId,
        remote: Arc<dyn RemoteBoard>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        let fetch = remote.fetch_board(&board_id);
        let board = match config.remote_timeout() {
            Some(limit) => tokio::time::timeout(limit, fetch).await??,
            None => fetch.await?,
        };
        board.validate()?;

        let mut local = board.clone();
        for column in local.columns.iter_mut().filter(|c| c.width == 0) {
            column.width = column.kind.default_width();
        }
        let store = SharedStore::new(BoardStateStore::new(local, config.index_policy));
        let status = StatusHandle::new();
        let refresh = RefreshTrigger::new();

        let coordinator = MutationCoordinator::new(
            store.clone(),
            Arc::clone(&remote),
            status.clone(),
            refresh.clone(),
            config.undo_capacity,
            config.remote_timeout(),
        );
        let coalescer = EditCoalescer::new(
            store.clone(),
            Arc::clone(&remote),
            status.clone(),
            refresh.clone(),
            config.debounce(),
            config.quiet_period(),
            config.remote_timeout(),
        );
        let drag = DragReorderEngine::new(store.clone(), coordinator.clone());
        let reconcile = ReconciliationLoop::new(
            board_id.clone(),
            store.clone(),
            remote,
            status.clone(),
            refresh,
            config.poll_interval(),
            config.remote_timeout(),
            &board,
        );
        reconcile.start();

        log::info!(
            "[boardsync.session] Opened board {} ({} groups, {} columns)",
            board_id,
            board.groups.len(),
            board.columns.len()
        );

        Ok(Self {
            board_id,
            store,
            status,
            coordinator,
            coalescer,
            drag,
            reconcile,
            closed: AtomicBool::new(false),
        })
    }

    pub fn board_id(&self) -> &BoardId {
        &self.board_id
    }

    /// Copy of the current local board
    pub fn snapshot(&self) -> Board {
        self.store.snapshot()
    }

    /// Bumped by every local change, including applied snapshots
    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn clear_error(&self) {
        self.status.clear_error();
    }

    pub fn submit(&self, mutation: Mutation) -> Result<PendingMutation> {
        self.coordinator.submit(mutation)
    }

    /// Debounced field edit, for input that changes on every keystroke
    pub fn edit(&self, edit: FieldEdit) -> Result<()> {
        self.coalescer.edit(edit)
    }

    pub fn has_pending_edits(&self) -> bool {
        self.coalescer.has_pending_writes()
    }

    pub fn rename_item(
        &self,
        item_id: &ItemId,
        name: impl Into<String>,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::RenameItem {
            item_id: item_id.clone(),
            name: name.into(),
        })
    }

    pub fn set_column_value(
        &self,
        item_id: &ItemId,
        column_key: impl Into<String>,
        value: Option<ColumnValue>,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::SetColumnValue {
            item_id: item_id.clone(),
            column_key: column_key.into(),
            value,
        })
    }

    pub fn create_item(
        &self,
        group_id: &GroupId,
        name: impl Into<String>,
        values: HashMap<String, ColumnValue>,
        index: Option<usize>,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::CreateItem {
            group_id: group_id.clone(),
            name: name.into(),
            values,
            index,
        })
    }

    pub fn delete_item(&self, item_id: &ItemId) -> Result<PendingMutation> {
        self.submit(Mutation::DeleteItem {
            item_id: item_id.clone(),
        })
    }

    pub fn move_item(
        &self,
        item_id: &ItemId,
        target_group: &GroupId,
        target_index: Option<usize>,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::MoveItem {
            item_id: item_id.clone(),
            target_group: target_group.clone(),
            target_index,
        })
    }

    pub fn rename_group(
        &self,
        group_id: &GroupId,
        title: impl Into<String>,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::RenameGroup {
            group_id: group_id.clone(),
            title: title.into(),
        })
    }

    pub fn delete_group(&self, group_id: &GroupId) -> Result<PendingMutation> {
        self.submit(Mutation::DeleteGroup {
            group_id: group_id.clone(),
        })
    }

    pub fn delete_column(&self, column_id: &ColumnId) -> Result<PendingMutation> {
        self.submit(Mutation::DeleteColumn {
            column_id: column_id.clone(),
        })
    }

    pub fn add_status_label(
        &self,
        column_id: &ColumnId,
        label: StatusLabel,
    ) -> Result<PendingMutation> {
        self.submit(Mutation::AddStatusLabel {
            column_id: column_id.clone(),
            label,
        })
    }

    pub fn drop_item(
        &self,
        item_id: &ItemId,
        target_group: &GroupId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        self.drag.drop_item(item_id, target_group, target_index)
    }

    pub fn drop_group(
        &self,
        group_id: &GroupId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        self.drag.drop_group(group_id, target_index)
    }

    pub fn drop_column(
        &self,
        column_id: &ColumnId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        self.drag.drop_column(column_id, target_index)
    }

    pub fn undo(&self) -> Option<Result<PendingMutation>> {
        self.coordinator.undo()
    }

    pub fn redo(&self) -> Option<Result<PendingMutation>> {
        self.coordinator.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.coordinator.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.coordinator.can_redo()
    }

    /// Polls the remote now, bypassing the quiet period
    pub async fn refresh_now(&self) -> TickOutcome {
        self.reconcile.force_tick().await
    }

    /// Stops polling and aborts debounce and quiet timers. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.coalescer.cancel_all();
        self.reconcile.stop();
        log::info!("[boardsync.session] Closed board {}", self.board_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Column, ColumnKind, Group, Item};
    use crate::error::SyncError;
    use crate::remote::memory::MemoryRemote;
    use crate::remote::RemoteCall;
    use crate::sync::coordinator::MutationState;
    use std::time::Duration;

    fn board() -> Board {
        let mut board = Board::new(BoardId::new("roadmap"), "Roadmap");
        board.columns.push(Column::new(
            ColumnId::new("status"),
            "status",
            "Status",
            ColumnKind::Status { labels: vec![] },
        ));
        let mut now = Group::new(GroupId::new("now"), "Now", "#e2445c");
        now.items.push(Item::new(ItemId::new("r1"), GroupId::new("now"), "Search"));
        now.items.push(Item::new(ItemId::new("r2"), GroupId::new("now"), "Export"));
        board.groups.push(now);
        board.groups.push(Group::new(GroupId::new("next"), "Next", "#00c875"));
        board
    }

    async fn open() -> (BoardSession, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new(board()));
        let session =
            BoardSession::open(BoardId::new("roadmap"), remote.clone(), SyncConfig::default())
                .await
                .unwrap();
        (session, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fills_default_widths() {
        let (session, _remote) = open().await;
        assert_eq!(session.snapshot().columns[0].width, 140);
        assert_eq!(session.refresh_now().await, TickOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_open_unknown_board() {
        let remote = Arc::new(MemoryRemote::new(board()));
        let err = BoardSession::open(BoardId::new("other"), remote, SyncConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::BoardNotFound(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_config() {
        let remote = Arc::new(MemoryRemote::new(board()));
        let config = SyncConfig {
            undo_capacity: 0,
            ..SyncConfig::default()
        };
        let err = BoardSession::open(BoardId::new("roadmap"), remote, config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_and_undo_through_session() {
        let (session, remote) = open().await;
        let label = StatusLabel::new("Blocked", "#e2445c");
        session
            .add_status_label(&ColumnId::new("status"), label)
            .unwrap()
            .outcome()
            .await;
        session
            .move_item(&ItemId::new("r1"), &GroupId::new("next"), None)
            .unwrap()
            .outcome()
            .await;

        assert!(session.can_undo());
        let outcome = session.undo().unwrap().unwrap().outcome().await;
        assert_eq!(outcome.state, MutationState::Undone);
        let now = session.snapshot().group(&GroupId::new("now")).unwrap().item_ids();
        assert_eq!(now, vec![ItemId::new("r1"), ItemId::new("r2")]);

        // Label-add is not undoable, so the stack is now empty.
        assert!(!session.can_undo());
        assert_eq!(
            remote.board().unwrap().group(&GroupId::new("now")).unwrap().item_ids(),
            vec![ItemId::new("r1"), ItemId::new("r2")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_into_a_new_item_before_it_is_saved() {
        let (session, remote) = open().await;
        remote.set_latency(Some(Duration::from_secs(1)));

        let create = session
            .create_item(&GroupId::new("next"), "", HashMap::new(), None)
            .unwrap();
        let provisional = session.snapshot().groups[1].items[0].id.clone();
        session
            .edit(FieldEdit::ItemName {
                item_id: provisional.clone(),
                name: "typed".into(),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;
        let created = create.outcome().await.created_item.unwrap();

        assert!(remote.journal().contains(&RemoteCall::RenameItem {
            item_id: created.clone(),
            name: "typed".into(),
        }));
        assert_eq!(remote.board().unwrap().item(&created).unwrap().name, "typed");
        assert_eq!(session.snapshot().item(&created).unwrap().name, "typed");
        assert!(session.status().last_error.is_none());

        // A view still holding the old id keeps working.
        session
            .edit(FieldEdit::ItemName {
                item_id: provisional,
                name: "typed again".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            remote.board().unwrap().item(&created).unwrap().name,
            "typed again"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_picks_up_collaborator_changes() {
        let (session, remote) = open().await;
        remote
            .edit(|s| s.rename_group(&GroupId::new("next"), "Later"))
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(session.snapshot().group(&GroupId::new("next")).unwrap().title, "Later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_polling_and_edits() {
        let (session, remote) = open().await;
        session
            .edit(FieldEdit::ItemName {
                item_id: ItemId::new("r2"),
                name: "Export CSV".into(),
            })
            .unwrap();
        session.close();
        assert!(session.is_closed());

        remote
            .edit(|s| s.rename_group(&GroupId::new("next"), "Later"))
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert!(remote.journal().is_empty());
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(session.snapshot().group(&GroupId::new("next")).unwrap().title, "Next");
        assert_eq!(session.refresh_now().await, TickOutcome::Closed);
    }
}
