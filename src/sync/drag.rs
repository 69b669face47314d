//! Drag-and-drop resolution.
//!
//! A drop names the slot the pointer was over, counted in the list as it
//! looked before the drag started. Dropping further down the same list has
//! to account for the dragged entry leaving its own slot first.

use crate::domain::{ColumnId, GroupId, ItemId};
use crate::error::{Result, SyncError};
use crate::sync::coordinator::{MutationCoordinator, PendingMutation};
use crate::sync::mutation::Mutation;
use crate::sync::store::{BoardStateStore, SharedStore};

/// What an item drop turns into
#[derive(Debug, Clone, PartialEq)]
pub enum DropPlan {
    /// The item would land where it already is
    NoOp,
    /// Same-group reorder with the complete resulting order
    Reorder { group_id: GroupId, order: Vec<ItemId> },
    /// Cross-group move to a position in the target group
    Move {
        item_id: ItemId,
        target_group: GroupId,
        target_index: usize,
    },
}

impl DropPlan {
    pub fn into_mutation(self) -> Option<Mutation> {
        match self {
            Self::NoOp => None,
            Self::Reorder { group_id, order } => Some(Mutation::ReorderItems { group_id, order }),
            Self::Move {
                item_id,
                target_group,
                target_index,
            } => Some(Mutation::MoveItem {
                item_id,
                target_group,
                target_index: Some(target_index),
            }),
        }
    }
}

/// Resolves dropping `item_id` into `target_group` before slot `target_index`
pub fn resolve_item_drop(
    store: &BoardStateStore,
    item_id: &ItemId,
    target_group: &GroupId,
    target_index: usize,
) -> Result<DropPlan> {
    let board = store.board();
    let item_id = &store.resolve_item_id(item_id);
    let source = board
        .locate_item(item_id)
        .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))?;
    let target = board
        .group(target_group)
        .ok_or_else(|| SyncError::GroupNotFound(target_group.to_string()))?;

    if &source.group_id == target_group {
        let ids = target.item_ids();
        return Ok(
            match reordered(store, ids, source.index, target_index, "item")? {
                Some(order) => DropPlan::Reorder {
                    group_id: target_group.clone(),
                    order,
                },
                None => DropPlan::NoOp,
            },
        );
    }

    let target_index = store.fit_index(target_index, target.items.len(), "item")?;
    Ok(DropPlan::Move {
        item_id: item_id.clone(),
        target_group: target_group.clone(),
        target_index,
    })
}

/// Full order after moving `ids[source]` to slot `target`, or `None` when
/// nothing moves
fn reordered<T: Clone>(
    store: &BoardStateStore,
    mut ids: Vec<T>,
    source: usize,
    target: usize,
    what: &str,
) -> Result<Option<Vec<T>>> {
    let last = ids.len().saturating_sub(1);
    let mut target = store.fit_index(target, ids.len(), what)?;
    if source < target {
        target -= 1;
    }
    let target = target.min(last);
    if source == target {
        return Ok(None);
    }
    let entry = ids.remove(source);
    ids.insert(target, entry);
    Ok(Some(ids))
}

/// Turns drops into optimistic mutations
#[derive(Clone)]
pub struct DragReorderEngine {
    store: SharedStore,
    coordinator: MutationCoordinator,
}

impl DragReorderEngine {
    pub fn new(store: SharedStore, coordinator: MutationCoordinator) -> Self {
        Self { store, coordinator }
    }

    pub fn plan_item_drop(
        &self,
        item_id: &ItemId,
        target_group: &GroupId,
        target_index: usize,
    ) -> Result<DropPlan> {
        self.store
            .read(|s| resolve_item_drop(s, item_id, target_group, target_index))
    }

    /// Returns `None` when the drop changes nothing
    pub fn drop_item(
        &self,
        item_id: &ItemId,
        target_group: &GroupId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        let plan = self.plan_item_drop(item_id, target_group, target_index)?;
        log::debug!("[boardsync.drag] Drop of {} resolved to {:?}", item_id, plan);
        plan.into_mutation()
            .map(|mutation| self.coordinator.submit(mutation))
            .transpose()
    }

    pub fn drop_group(
        &self,
        group_id: &GroupId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        let order = self.store.read(|s| {
            let ids = s.board().group_ids();
            let source = s
                .board()
                .group_index(group_id)
                .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))?;
            reordered(s, ids, source, target_index, "group")
        })?;
        order
            .map(|order| self.coordinator.submit(Mutation::ReorderGroups { order }))
            .transpose()
    }

    pub fn drop_column(
        &self,
        column_id: &ColumnId,
        target_index: usize,
    ) -> Result<Option<PendingMutation>> {
        let order = self.store.read(|s| {
            let ids = s.board().column_ids();
            let source = ids
                .iter()
                .position(|id| id == column_id)
                .ok_or_else(|| SyncError::ColumnNotFound(column_id.to_string()))?;
            reordered(s, ids, source, target_index, "column")
        })?;
        order
            .map(|order| self.coordinator.submit(Mutation::ReorderColumns { order }))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexPolicy;
    use crate::domain::{Board, BoardId, Column, ColumnKind, Group, Item};
    use crate::remote::memory::MemoryRemote;
    use crate::remote::RemoteCall;
    use crate::sync::coordinator::MutationState;
    use crate::sync::reconcile::RefreshTrigger;
    use crate::sync::status::StatusHandle;
    use std::sync::Arc;
    use std::time::Duration;

    fn board() -> Board {
        let mut board = Board::new(BoardId::new("b1"), "Sprint");
        for key in ["owner", "status", "due"] {
            board.columns.push(Column::new(ColumnId::new(key), key, key, ColumnKind::Text));
        }
        let mut todo = Group::new(GroupId::new("todo"), "To do", "#f00");
        for n in 0..6 {
            let id = format!("t{}", n);
            todo.items.push(Item::new(ItemId::new(&id), GroupId::new("todo"), id.clone()));
        }
        let mut done = Group::new(GroupId::new("done"), "Done", "#0f0");
        done.items.push(Item::new(ItemId::new("d0"), GroupId::new("done"), "d0"));
        board.groups.push(todo);
        board.groups.push(done);
        board.groups.push(Group::new(GroupId::new("later"), "Later", "#00f"));
        board
    }

    fn store(policy: IndexPolicy) -> BoardStateStore {
        BoardStateStore::new(board(), policy)
    }

    fn engine() -> (DragReorderEngine, SharedStore, Arc<MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new(board()));
        let shared = SharedStore::new(store(IndexPolicy::Clamp));
        let coordinator = MutationCoordinator::new(
            shared.clone(),
            remote.clone(),
            StatusHandle::new(),
            RefreshTrigger::new(),
            20,
            Some(Duration::from_secs(5)),
        );
        (DragReorderEngine::new(shared.clone(), coordinator), shared, remote)
    }

    fn names(order: &[ItemId]) -> Vec<&str> {
        order.iter().map(ItemId::as_str).collect()
    }

    #[test]
    fn test_downward_drop_corrects_index() {
        let plan = resolve_item_drop(
            &store(IndexPolicy::Clamp),
            &ItemId::new("t2"),
            &GroupId::new("todo"),
            5,
        )
        .unwrap();
        match plan {
            DropPlan::Reorder { order, .. } => {
                assert_eq!(names(&order), vec!["t0", "t1", "t3", "t4", "t2", "t5"]);
                assert_eq!(order.iter().position(|id| id.as_str() == "t2"), Some(4));
            }
            other => panic!("expected reorder, got {:?}", other),
        }
    }

    #[test]
    fn test_upward_drop_keeps_index() {
        let plan = resolve_item_drop(
            &store(IndexPolicy::Clamp),
            &ItemId::new("t4"),
            &GroupId::new("todo"),
            1,
        )
        .unwrap();
        match plan {
            DropPlan::Reorder { order, .. } => {
                assert_eq!(names(&order), vec!["t0", "t4", "t1", "t2", "t3", "t5"]);
            }
            other => panic!("expected reorder, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_on_own_slot_is_noop() {
        let s = store(IndexPolicy::Clamp);
        // Slot 2 is the item itself, slot 3 is just below it.
        for target in [2, 3] {
            let plan =
                resolve_item_drop(&s, &ItemId::new("t2"), &GroupId::new("todo"), target).unwrap();
            assert_eq!(plan, DropPlan::NoOp);
        }
    }

    #[test]
    fn test_drop_past_end_follows_policy() {
        let plan = resolve_item_drop(
            &store(IndexPolicy::Clamp),
            &ItemId::new("t0"),
            &GroupId::new("todo"),
            42,
        )
        .unwrap();
        match plan {
            DropPlan::Reorder { order, .. } => assert_eq!(order.last().unwrap().as_str(), "t0"),
            other => panic!("expected reorder, got {:?}", other),
        }

        let err = resolve_item_drop(
            &store(IndexPolicy::FailFast),
            &ItemId::new("t0"),
            &GroupId::new("todo"),
            42,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::LocalInvariantViolation(_)));
    }

    #[test]
    fn test_cross_group_drop_is_move() {
        let plan = resolve_item_drop(
            &store(IndexPolicy::Clamp),
            &ItemId::new("t1"),
            &GroupId::new("done"),
            0,
        )
        .unwrap();
        assert_eq!(
            plan,
            DropPlan::Move {
                item_id: ItemId::new("t1"),
                target_group: GroupId::new("done"),
                target_index: 0,
            }
        );
    }

    #[test]
    fn test_unknown_targets() {
        let s = store(IndexPolicy::Clamp);
        assert!(matches!(
            resolve_item_drop(&s, &ItemId::new("nope"), &GroupId::new("todo"), 0),
            Err(SyncError::ItemNotFound(_))
        ));
        assert!(matches!(
            resolve_item_drop(&s, &ItemId::new("t0"), &GroupId::new("nope"), 0),
            Err(SyncError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_same_group_drop_sends_full_order() {
        let (engine, shared, remote) = engine();
        let outcome = engine
            .drop_item(&ItemId::new("t2"), &GroupId::new("todo"), 5)
            .unwrap()
            .unwrap()
            .outcome()
            .await;
        assert_eq!(outcome.state, MutationState::Confirmed);

        let expected = vec!["t0", "t1", "t3", "t4", "t2", "t5"];
        let local = shared.snapshot().group(&GroupId::new("todo")).unwrap().item_ids();
        assert_eq!(names(&local), expected);
        match remote.journal().as_slice() {
            [RemoteCall::ReorderItems { order, .. }] => assert_eq!(names(order), expected),
            other => panic!("unexpected calls {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cross_group_drop_lands_at_index() {
        let (engine, shared, remote) = engine();
        engine
            .drop_item(&ItemId::new("t5"), &GroupId::new("done"), 0)
            .unwrap()
            .unwrap()
            .outcome()
            .await;

        let done = shared.snapshot().group(&GroupId::new("done")).unwrap().item_ids();
        assert_eq!(names(&done), vec!["t5", "d0"]);
        let remote_done = remote.board().unwrap().group(&GroupId::new("done")).unwrap().item_ids();
        assert_eq!(names(&remote_done), vec!["t5", "d0"]);
    }

    #[tokio::test]
    async fn test_noop_drop_submits_nothing() {
        let (engine, _shared, remote) = engine();
        assert!(engine
            .drop_item(&ItemId::new("t3"), &GroupId::new("todo"), 3)
            .unwrap()
            .is_none());
        assert!(remote.journal().is_empty());
    }

    #[tokio::test]
    async fn test_group_and_column_drops() {
        let (engine, shared, _remote) = engine();
        engine
            .drop_group(&GroupId::new("todo"), 3)
            .unwrap()
            .unwrap()
            .outcome()
            .await;
        let groups: Vec<_> = shared
            .snapshot()
            .group_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(groups, vec!["done", "later", "todo"]);

        engine
            .drop_column(&ColumnId::new("due"), 0)
            .unwrap()
            .unwrap()
            .outcome()
            .await;
        let columns: Vec<_> = shared
            .snapshot()
            .column_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(columns, vec!["due", "owner", "status"]);
    }
}
