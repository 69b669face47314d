//! Optimistic mutation pipeline.
//!
//! `submit` applies a mutation to the local store before returning, then
//! ships it on a background task. The task either confirms the mutation
//! (recording its reversal for undo) or reverts the captured snapshot and
//! publishes a notice. Nothing is retried automatically.

use crate::domain::ItemId;
use crate::error::{Result, SyncError};
use crate::remote::{RemoteBoard, RemoteCall};
use crate::sync::mutation::{Mutation, MutationKind, Prepared};
use crate::sync::reconcile::RefreshTrigger;
use crate::sync::status::StatusHandle;
use crate::sync::store::SharedStore;
use crate::sync::undo::{Origin, UndoEntry, UndoManager};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sequence number of a submitted mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Terminal state of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// The remote accepted the change
    Confirmed,
    /// The remote refused or could not be reached; local state was restored
    RolledBack,
    /// The remote refused, but the local change could not be reverted
    /// because its target changed meanwhile. A refresh was requested.
    RollbackIncomplete,
    /// A compensating mutation replayed by undo was confirmed
    Undone,
    /// The background task was torn down before the remote answered
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub id: MutationId,
    pub kind: MutationKind,
    pub state: MutationState,
    pub error: Option<SyncError>,
    /// Server id of an item the mutation created
    pub created_item: Option<ItemId>,
}

/// A mutation applied locally and awaiting the remote
#[derive(Debug)]
pub struct PendingMutation {
    id: MutationId,
    kind: MutationKind,
    handle: JoinHandle<MutationOutcome>,
}

impl PendingMutation {
    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn is_settled(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the remote verdict
    pub async fn outcome(self) -> MutationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => MutationOutcome {
                id: self.id,
                kind: self.kind,
                state: MutationState::Cancelled,
                error: Some(SyncError::Transport(format!("mutation task ended: {}", err))),
                created_item: None,
            },
        }
    }
}

struct CoordinatorInner {
    store: SharedStore,
    remote: Arc<dyn RemoteBoard>,
    status: StatusHandle,
    undo: Mutex<UndoManager>,
    refresh: RefreshTrigger,
    remote_timeout: Option<Duration>,
    next_id: AtomicU64,
}

/// Entry point for every optimistic, rollback-capable change
#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl MutationCoordinator {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteBoard>,
        status: StatusHandle,
        refresh: RefreshTrigger,
        undo_capacity: usize,
        remote_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                remote,
                status,
                undo: Mutex::new(UndoManager::new(undo_capacity)),
                refresh,
                remote_timeout,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Applies `mutation` locally and ships it in the background.
    ///
    /// Must be called from within a tokio runtime. Local validation errors
    /// (unknown ids, out-of-range indices under fail-fast) are returned here
    /// and nothing is sent.
    pub fn submit(&self, mutation: Mutation) -> Result<PendingMutation> {
        self.submit_as(mutation, Origin::User)
    }

    pub(crate) fn submit_as(&self, mutation: Mutation, origin: Origin) -> Result<PendingMutation> {
        let kind = mutation.kind();
        let prepared = self.inner.store.write(|s| mutation.apply_local(s))?;
        let id = MutationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!(
            "[boardsync.coordinator] Mutation {} ({}) applied locally, {} remote call(s)",
            id,
            kind,
            prepared.calls.len()
        );

        self.inner.status.begin_remote_call();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = inner.complete(id, kind, prepared, origin).await;
            inner.status.end_remote_call();
            outcome
        });
        Ok(PendingMutation { id, kind, handle })
    }

    /// Replays the newest undo entry through the pipeline.
    /// Returns `None` when there is nothing to undo.
    pub fn undo(&self) -> Option<Result<PendingMutation>> {
        let entry = self.lock_undo().pop_undo()?;
        Some(self.replay(entry, Origin::Undo))
    }

    /// Replays the newest redo entry through the pipeline
    pub fn redo(&self) -> Option<Result<PendingMutation>> {
        let entry = self.lock_undo().pop_redo()?;
        Some(self.replay(entry, Origin::Redo))
    }

    fn replay(&self, entry: UndoEntry, origin: Origin) -> Result<PendingMutation> {
        log::debug!(
            "[boardsync.coordinator] Replaying reversal of {} ({:?})",
            entry.kind,
            origin
        );
        self.submit_as(entry.reversal, origin).map_err(|err| {
            // The target vanished since the entry was recorded; the entry is dropped.
            self.inner
                .status
                .report_error(format!("Could not undo {}: {}", entry.kind, err), err.clone());
            err
        })
    }

    pub fn can_undo(&self) -> bool {
        self.lock_undo().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.lock_undo().can_redo()
    }

    pub fn undo_depth(&self) -> usize {
        self.lock_undo().len()
    }

    fn lock_undo(&self) -> std::sync::MutexGuard<'_, UndoManager> {
        self.inner.undo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> &StatusHandle {
        &self.inner.status
    }
}

impl CoordinatorInner {
    /// Waits for provisional ids in `call` to settle, then sends it
    async fn send(&self, call: RemoteCall) -> Result<Option<ItemId>> {
        let call = self.store.settle_call(call).await?;
        let fut = call.send(self.remote.as_ref());
        match self.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await?,
            None => fut.await,
        }
    }

    async fn complete(
        &self,
        id: MutationId,
        kind: MutationKind,
        prepared: Prepared,
        origin: Origin,
    ) -> MutationOutcome {
        let Prepared {
            rollback,
            calls,
            provisional,
        } = prepared;
        let mut calls = calls.into_iter();

        let primary = match calls.next() {
            Some(call) => self.send(call).await,
            None => Ok(None),
        };

        let created = match primary {
            Ok(created) => created,
            Err(err) => {
                log::warn!(
                    "[boardsync.coordinator] Mutation {} ({}) failed, rolling back: {}",
                    id,
                    kind,
                    err
                );
                let state = match self.store.write(|s| rollback.revert(s)) {
                    Ok(()) => MutationState::RolledBack,
                    Err(revert_err) => {
                        log::error!(
                            "[boardsync.coordinator] Rollback of {} incomplete: {}",
                            id,
                            revert_err
                        );
                        self.refresh.request();
                        MutationState::RollbackIncomplete
                    }
                };
                if let Some(provisional) = &provisional {
                    self.store.abandon_provisional(provisional);
                }
                self.status
                    .report_error(format!("Could not {}: {}", kind, err), err.clone());
                return MutationOutcome {
                    id,
                    kind,
                    state,
                    error: Some(err),
                    created_item: None,
                };
            }
        };

        match (&provisional, &created) {
            (Some(provisional), Some(server_id)) => {
                if let Err(err) = self.store.adopt_provisional(provisional, server_id.clone()) {
                    log::warn!(
                        "[boardsync.coordinator] Could not adopt server id {}: {}",
                        server_id,
                        err
                    );
                    self.refresh.request();
                }
            }
            (Some(provisional), None) => {
                log::warn!(
                    "[boardsync.coordinator] Remote returned no id for {}",
                    provisional
                );
                self.store.abandon_provisional(provisional);
                self.refresh.request();
            }
            _ => {}
        }

        let mut follow_up_error = None;
        for call in calls {
            let what = call.kind();
            if let Err(err) = self.send(call).await {
                log::warn!(
                    "[boardsync.coordinator] Follow-up {} for {} failed: {}",
                    what,
                    id,
                    err
                );
                self.status.report_error(
                    format!("Could not save order after {}: {}", kind, err),
                    err.clone(),
                );
                self.refresh.request();
                follow_up_error = Some(err);
                break;
            }
        }

        if let Some(reversal) = rollback.compensation(created.as_ref()) {
            self.undo
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(origin, UndoEntry::new(kind, reversal));
        }

        log::debug!("[boardsync.coordinator] Mutation {} ({}) confirmed", id, kind);
        MutationOutcome {
            id,
            kind,
            state: match origin {
                Origin::Undo => MutationState::Undone,
                Origin::User | Origin::Redo => MutationState::Confirmed,
            },
            error: follow_up_error,
            created_item: created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexPolicy;
    use crate::domain::{
        Board, BoardId, Column, ColumnId, ColumnKind, ColumnValue, Group, GroupId, Item,
    };
    use crate::remote::memory::MemoryRemote;
    use crate::sync::fingerprint::fingerprint;
    use crate::sync::store::BoardStateStore;
    use std::collections::HashMap;

    fn board() -> Board {
        let mut board = Board::new(BoardId::new("b1"), "Release");
        board
            .columns
            .push(Column::new(ColumnId::new("c1"), "prio", "Priority", ColumnKind::Text));
        for (gid, items) in [("a", vec!["i1", "i2", "i3"]), ("b", vec![])] {
            let mut group = Group::new(GroupId::new(gid), gid, "#eee");
            for id in items {
                group.items.push(Item::new(ItemId::new(id), GroupId::new(gid), id));
            }
            board.groups.push(group);
        }
        board
    }

    fn setup() -> (MutationCoordinator, SharedStore, Arc<MemoryRemote>) {
        let (coordinator, store, remote, _refresh) = setup_with_refresh();
        (coordinator, store, remote)
    }

    fn setup_with_refresh() -> (
        MutationCoordinator,
        SharedStore,
        Arc<MemoryRemote>,
        RefreshTrigger,
    ) {
        let remote = Arc::new(MemoryRemote::new(board()));
        let store = SharedStore::new(BoardStateStore::new(board(), IndexPolicy::Clamp));
        let refresh = RefreshTrigger::new();
        let coordinator = MutationCoordinator::new(
            store.clone(),
            remote.clone(),
            StatusHandle::new(),
            refresh.clone(),
            20,
            Some(Duration::from_secs(5)),
        );
        (coordinator, store, remote, refresh)
    }

    fn ids(store: &SharedStore, group: &str) -> Vec<String> {
        store.read(|s| {
            s.board()
                .group(&GroupId::new(group))
                .unwrap()
                .items
                .iter()
                .map(|i| i.id.to_string())
                .collect()
        })
    }

    #[tokio::test]
    async fn test_local_apply_is_immediate() {
        let (coordinator, store, _remote) = setup();
        let pending = coordinator
            .submit(Mutation::RenameItem {
                item_id: ItemId::new("i1"),
                name: "Ship it".into(),
            })
            .unwrap();
        // Visible before the remote has answered.
        assert_eq!(store.snapshot().item(&ItemId::new("i1")).unwrap().name, "Ship it");
        let outcome = pending.outcome().await;
        assert_eq!(outcome.state, MutationState::Confirmed);
        assert_eq!(coordinator.undo_depth(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_reports() {
        let (coordinator, store, remote) = setup();
        remote.fail_writes(Some(SyncError::RemoteRejected("read-only board".into())));
        let before = fingerprint(&store.snapshot());

        let outcome = coordinator
            .submit(Mutation::SetColumnValue {
                item_id: ItemId::new("i2"),
                column_key: "prio".into(),
                value: Some(ColumnValue::Text("high".into())),
            })
            .unwrap()
            .outcome()
            .await;

        assert_eq!(outcome.state, MutationState::RolledBack);
        assert_eq!(fingerprint(&store.snapshot()), before);
        assert!(coordinator.status().current().last_error.is_some());
        assert_eq!(coordinator.status().in_flight(), 0);
        assert!(!coordinator.can_undo());
    }

    #[tokio::test]
    async fn test_cross_group_move_failure_restores_exact_position() {
        let (coordinator, store, remote) = setup();
        remote.fail_writes(Some(SyncError::Transport("connection reset".into())));

        let pending = coordinator
            .submit(Mutation::MoveItem {
                item_id: ItemId::new("i2"),
                target_group: GroupId::new("b"),
                target_index: Some(0),
            })
            .unwrap();
        assert_eq!(ids(&store, "a"), vec!["i1", "i3"]);
        assert_eq!(ids(&store, "b"), vec!["i2"]);

        let outcome = pending.outcome().await;
        assert_eq!(outcome.state, MutationState::RolledBack);
        assert_eq!(ids(&store, "a"), vec!["i1", "i2", "i3"]);
        assert!(ids(&store, "b").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (coordinator, store, remote) = setup();
        remote.set_latency(Some(Duration::from_secs(30)));

        let outcome = coordinator
            .submit(Mutation::RenameItem {
                item_id: ItemId::new("i3"),
                name: "slow".into(),
            })
            .unwrap()
            .outcome()
            .await;

        assert_eq!(outcome.state, MutationState::RolledBack);
        assert!(matches!(outcome.error, Some(SyncError::Transport(_))));
        assert_eq!(store.snapshot().item(&ItemId::new("i3")).unwrap().name, "i3");
    }

    #[tokio::test]
    async fn test_unknown_item_is_rejected_synchronously() {
        let (coordinator, _store, remote) = setup();
        let err = coordinator
            .submit(Mutation::DeleteItem {
                item_id: ItemId::new("ghost"),
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::ItemNotFound(_)));
        assert!(remote.journal().is_empty());
    }

    #[tokio::test]
    async fn test_create_adopts_server_id_and_position() {
        let (coordinator, store, remote) = setup();
        let outcome = coordinator
            .submit(Mutation::CreateItem {
                group_id: GroupId::new("a"),
                name: "Hotfix".into(),
                values: HashMap::new(),
                index: Some(0),
            })
            .unwrap()
            .outcome()
            .await;

        let created = outcome.created_item.unwrap();
        assert!(!created.is_provisional());
        assert_eq!(ids(&store, "a")[0], created.to_string());

        let remote_board = remote.board().unwrap();
        assert_eq!(remote_board.groups[0].items[0].id, created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_right_after_create_reaches_server_item() {
        let (coordinator, store, remote) = setup();
        remote.set_latency(Some(Duration::from_secs(1)));

        let create = coordinator
            .submit(Mutation::CreateItem {
                group_id: GroupId::new("b"),
                name: "Draft".into(),
                values: HashMap::new(),
                index: None,
            })
            .unwrap();
        let provisional = ItemId::new(&ids(&store, "b")[0]);
        assert!(provisional.is_provisional());

        // Submitted while the create is still on the wire.
        let rename = coordinator
            .submit(Mutation::RenameItem {
                item_id: provisional.clone(),
                name: "Final".into(),
            })
            .unwrap();

        let created = create.outcome().await.created_item.unwrap();
        let renamed = rename.outcome().await;
        assert_eq!(renamed.state, MutationState::Confirmed);
        assert!(renamed.error.is_none());

        let journal = remote.journal();
        assert_eq!(
            journal.last(),
            Some(&RemoteCall::RenameItem {
                item_id: created.clone(),
                name: "Final".into(),
            })
        );
        assert_eq!(remote.board().unwrap().item(&created).unwrap().name, "Final");
        assert_eq!(store.snapshot().item(&created).unwrap().name, "Final");

        // The undo entry captured the provisional id and still finds the item.
        let undone = coordinator.undo().unwrap().unwrap().outcome().await;
        assert_eq!(undone.state, MutationState::Undone);
        assert_eq!(remote.board().unwrap().item(&created).unwrap().name, "Draft");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_to_failed_create_is_not_sent() {
        let (coordinator, store, remote) = setup();
        remote.set_latency(Some(Duration::from_millis(100)));
        remote.fail_writes(Some(SyncError::RemoteRejected("board is archived".into())));

        let create = coordinator
            .submit(Mutation::CreateItem {
                group_id: GroupId::new("b"),
                name: "Draft".into(),
                values: HashMap::new(),
                index: None,
            })
            .unwrap();
        let provisional = ItemId::new(&ids(&store, "b")[0]);
        let rename = coordinator
            .submit(Mutation::RenameItem {
                item_id: provisional,
                name: "Final".into(),
            })
            .unwrap();

        assert_eq!(create.outcome().await.state, MutationState::RolledBack);
        let renamed = rename.outcome().await;
        assert!(matches!(renamed.error, Some(SyncError::ItemNotFound(_))));
        assert_eq!(remote.journal().len(), 1);
        assert!(ids(&store, "b").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_revert_is_reported_as_incomplete() {
        let (coordinator, store, remote, refresh) = setup_with_refresh();
        remote.set_latency(Some(Duration::from_millis(100)));
        remote.fail_writes(Some(SyncError::RemoteRejected("locked".into())));

        let pending = coordinator
            .submit(Mutation::RenameItem {
                item_id: ItemId::new("i1"),
                name: "mine".into(),
            })
            .unwrap();
        // The item disappears locally before the refusal arrives.
        store.write(|s| s.remove_item(&ItemId::new("i1"))).unwrap();

        let outcome = pending.outcome().await;
        assert_eq!(outcome.state, MutationState::RollbackIncomplete);
        assert!(matches!(outcome.error, Some(SyncError::RemoteRejected(_))));
        assert!(refresh.is_requested());
        assert!(coordinator.status().current().last_error.is_some());
        assert!(!coordinator.can_undo());
    }

    #[tokio::test]
    async fn test_undo_then_redo_rename() {
        let (coordinator, store, _remote) = setup();
        coordinator
            .submit(Mutation::RenameItem {
                item_id: ItemId::new("i1"),
                name: "first draft".into(),
            })
            .unwrap()
            .outcome()
            .await;

        let undone = coordinator.undo().unwrap().unwrap().outcome().await;
        assert_eq!(undone.state, MutationState::Undone);
        assert_eq!(store.snapshot().item(&ItemId::new("i1")).unwrap().name, "i1");
        assert!(coordinator.can_redo());

        let redone = coordinator.redo().unwrap().unwrap().outcome().await;
        assert_eq!(redone.state, MutationState::Confirmed);
        assert_eq!(
            store.snapshot().item(&ItemId::new("i1")).unwrap().name,
            "first draft"
        );
        assert!(coordinator.undo().is_some());
    }

    #[tokio::test]
    async fn test_undo_of_cross_group_move_restores_index() {
        let (coordinator, store, remote) = setup();
        coordinator
            .submit(Mutation::MoveItem {
                item_id: ItemId::new("i1"),
                target_group: GroupId::new("b"),
                target_index: None,
            })
            .unwrap()
            .outcome()
            .await;
        assert_eq!(ids(&store, "a"), vec!["i2", "i3"]);

        coordinator.undo().unwrap().unwrap().outcome().await;
        assert_eq!(ids(&store, "a"), vec!["i1", "i2", "i3"]);
        let remote_a: Vec<_> = remote.board().unwrap().groups[0]
            .items
            .iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(remote_a, vec!["i1", "i2", "i3"]);
    }

    #[tokio::test]
    async fn test_failed_undo_is_reported() {
        let (coordinator, _store, remote) = setup();
        coordinator
            .submit(Mutation::RenameItem {
                item_id: ItemId::new("i1"),
                name: "x".into(),
            })
            .unwrap()
            .outcome()
            .await;

        remote.fail_writes(Some(SyncError::Transport("offline".into())));
        let outcome = coordinator.undo().unwrap().unwrap().outcome().await;
        assert_eq!(outcome.state, MutationState::RolledBack);
        assert!(coordinator.status().current().last_error.is_some());
        assert!(!coordinator.can_undo());
        assert!(!coordinator.can_redo());
    }

    #[tokio::test]
    async fn test_undo_on_empty_stack() {
        let (coordinator, _store, _remote) = setup();
        assert!(coordinator.undo().is_none());
        assert!(coordinator.redo().is_none());
    }
}
