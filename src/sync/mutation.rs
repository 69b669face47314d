//! Mutation intents and the snapshots needed to undo them.
//!
//! A [`Mutation`] is plain data: it is what the view layer submits, what an
//! undo entry stores as its reversal, and what gets replayed on undo/redo.

use crate::domain::{
    ColumnId, ColumnValue, Group, GroupId, Item, ItemId, ItemPosition, StatusLabel,
};
use crate::error::Result;
use crate::remote::RemoteCall;
use crate::sync::store::{BoardStateStore, RemovedColumn};
use std::collections::HashMap;
use std::fmt;

/// Discriminant of a [`Mutation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    RenameItem,
    SetColumnValue,
    CreateItem,
    DeleteItem,
    MoveItem,
    ReorderItems,
    ReorderGroups,
    ReorderColumns,
    RenameGroup,
    DeleteGroup,
    DeleteColumn,
    AddStatusLabel,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RenameItem => "rename item",
            Self::SetColumnValue => "update value",
            Self::CreateItem => "create item",
            Self::DeleteItem => "delete item",
            Self::MoveItem => "move item",
            Self::ReorderItems => "reorder items",
            Self::ReorderGroups => "reorder groups",
            Self::ReorderColumns => "reorder columns",
            Self::RenameGroup => "rename group",
            Self::DeleteGroup => "delete group",
            Self::DeleteColumn => "delete column",
            Self::AddStatusLabel => "add label",
        };
        write!(f, "{}", text)
    }
}

/// A user-initiated change to the board
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    RenameItem {
        item_id: ItemId,
        name: String,
    },
    SetColumnValue {
        item_id: ItemId,
        column_key: String,
        value: Option<ColumnValue>,
    },
    CreateItem {
        group_id: GroupId,
        name: String,
        values: HashMap<String, ColumnValue>,
        /// Position in the group; end when `None`
        index: Option<usize>,
    },
    DeleteItem {
        item_id: ItemId,
    },
    MoveItem {
        item_id: ItemId,
        target_group: GroupId,
        /// Position after the item has left its current slot; end when `None`
        target_index: Option<usize>,
    },
    /// Full target order for one group
    ReorderItems {
        group_id: GroupId,
        order: Vec<ItemId>,
    },
    ReorderGroups {
        order: Vec<GroupId>,
    },
    ReorderColumns {
        order: Vec<ColumnId>,
    },
    RenameGroup {
        group_id: GroupId,
        title: String,
    },
    DeleteGroup {
        group_id: GroupId,
    },
    DeleteColumn {
        column_id: ColumnId,
    },
    AddStatusLabel {
        column_id: ColumnId,
        label: StatusLabel,
    },
}

/// Pre-mutation state of exactly what a mutation touched
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Rollback {
    ItemName { item_id: ItemId, prior: String },
    CellValue {
        item_id: ItemId,
        column_key: String,
        prior: Option<ColumnValue>,
    },
    Created { item_id: ItemId },
    Deleted { item: Item, position: ItemPosition },
    Moved { item_id: ItemId, from: ItemPosition },
    ItemOrder {
        group_id: GroupId,
        prior: Vec<ItemId>,
    },
    GroupOrder { prior: Vec<GroupId> },
    ColumnOrder { prior: Vec<ColumnId> },
    GroupTitle { group_id: GroupId, prior: String },
    GroupDeleted { group: Group, index: usize },
    ColumnDeleted(RemovedColumn),
    StatusLabels {
        column_id: ColumnId,
        prior: Vec<StatusLabel>,
    },
}

/// A mutation already applied locally, ready to ship
#[derive(Debug)]
pub(crate) struct Prepared {
    pub rollback: Rollback,
    /// Primary call first, then ordering follow-ups
    pub calls: Vec<RemoteCall>,
    /// Client id minted for a created item
    pub provisional: Option<ItemId>,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::RenameItem { .. } => MutationKind::RenameItem,
            Self::SetColumnValue { .. } => MutationKind::SetColumnValue,
            Self::CreateItem { .. } => MutationKind::CreateItem,
            Self::DeleteItem { .. } => MutationKind::DeleteItem,
            Self::MoveItem { .. } => MutationKind::MoveItem,
            Self::ReorderItems { .. } => MutationKind::ReorderItems,
            Self::ReorderGroups { .. } => MutationKind::ReorderGroups,
            Self::ReorderColumns { .. } => MutationKind::ReorderColumns,
            Self::RenameGroup { .. } => MutationKind::RenameGroup,
            Self::DeleteGroup { .. } => MutationKind::DeleteGroup,
            Self::DeleteColumn { .. } => MutationKind::DeleteColumn,
            Self::AddStatusLabel { .. } => MutationKind::AddStatusLabel,
        }
    }

    /// Applies the mutation to the store and describes how to ship and how
    /// to revert it. Nothing is changed when an error is returned.
    pub(crate) fn apply_local(&self, store: &mut BoardStateStore) -> Result<Prepared> {
        let prepared = match self.clone() {
            Self::RenameItem { item_id, name } => {
                let prior = store.rename_item(&item_id, name.clone())?;
                Prepared::single(
                    Rollback::ItemName {
                        item_id: item_id.clone(),
                        prior,
                    },
                    RemoteCall::RenameItem { item_id, name },
                )
            }
            Self::SetColumnValue {
                item_id,
                column_key,
                value,
            } => {
                let prior = store.set_column_value(&item_id, &column_key, value.clone())?;
                Prepared::single(
                    Rollback::CellValue {
                        item_id: item_id.clone(),
                        column_key: column_key.clone(),
                        prior,
                    },
                    RemoteCall::SetColumnValue {
                        item_id,
                        column_key,
                        value,
                    },
                )
            }
            Self::CreateItem {
                group_id,
                name,
                values,
                index,
            } => {
                let provisional = ItemId::provisional();
                let mut item = Item::new(provisional.clone(), group_id.clone(), name.clone());
                item.column_values = values.clone();
                store.upsert_item(item, index)?;
                store.track_provisional(provisional.clone());

                let mut calls = vec![RemoteCall::CreateItem {
                    group_id: group_id.clone(),
                    name,
                    values,
                }];
                calls.extend(order_follow_up(store, &group_id, &provisional));
                Prepared {
                    rollback: Rollback::Created {
                        item_id: provisional.clone(),
                    },
                    calls,
                    provisional: Some(provisional),
                }
            }
            Self::DeleteItem { item_id } => {
                let (item, position) = store.remove_item(&item_id)?;
                Prepared::single(
                    Rollback::Deleted { item, position },
                    RemoteCall::DeleteItem { item_id },
                )
            }
            Self::MoveItem {
                item_id,
                target_group,
                target_index,
            } => {
                let from = store.move_item_to_group(&item_id, &target_group, target_index)?;
                let calls = if from.group_id == target_group {
                    vec![full_item_order(store, &target_group)]
                } else {
                    let mut calls = vec![RemoteCall::MoveItem {
                        item_id: item_id.clone(),
                        target_group: target_group.clone(),
                    }];
                    calls.extend(order_follow_up(store, &target_group, &item_id));
                    calls
                };
                Prepared {
                    rollback: Rollback::Moved { item_id, from },
                    calls,
                    provisional: None,
                }
            }
            Self::ReorderItems { group_id, order } => {
                let prior = store.apply_item_order(&group_id, &order)?;
                let call = full_item_order(store, &group_id);
                Prepared::single(Rollback::ItemOrder { group_id, prior }, call)
            }
            Self::ReorderGroups { order } => {
                let prior = store.apply_group_order(&order);
                let order = store.board().group_ids();
                Prepared::single(
                    Rollback::GroupOrder { prior },
                    RemoteCall::ReorderGroups { order },
                )
            }
            Self::ReorderColumns { order } => {
                let prior = store.apply_column_order(&order);
                let order = store.board().column_ids();
                Prepared::single(
                    Rollback::ColumnOrder { prior },
                    RemoteCall::ReorderColumns { order },
                )
            }
            Self::RenameGroup { group_id, title } => {
                let prior = store.rename_group(&group_id, title.clone())?;
                Prepared::single(
                    Rollback::GroupTitle {
                        group_id: group_id.clone(),
                        prior,
                    },
                    RemoteCall::RenameGroup { group_id, title },
                )
            }
            Self::DeleteGroup { group_id } => {
                let (group, index) = store.remove_group(&group_id)?;
                Prepared::single(
                    Rollback::GroupDeleted { group, index },
                    RemoteCall::DeleteGroup { group_id },
                )
            }
            Self::DeleteColumn { column_id } => {
                let removed = store.remove_column(&column_id)?;
                Prepared::single(
                    Rollback::ColumnDeleted(removed),
                    RemoteCall::DeleteColumn { column_id },
                )
            }
            Self::AddStatusLabel { column_id, label } => {
                let prior = store.add_status_label(&column_id, label.clone())?;
                Prepared::single(
                    Rollback::StatusLabels {
                        column_id: column_id.clone(),
                        prior,
                    },
                    RemoteCall::AddStatusLabel { column_id, label },
                )
            }
        };
        Ok(prepared)
    }
}

impl Prepared {
    fn single(rollback: Rollback, call: RemoteCall) -> Self {
        Self {
            rollback,
            calls: vec![call],
            provisional: None,
        }
    }
}

fn full_item_order(store: &BoardStateStore, group_id: &GroupId) -> RemoteCall {
    let order = store
        .board()
        .group(group_id)
        .map(|g| g.item_ids())
        .unwrap_or_default();
    RemoteCall::ReorderItems {
        group_id: group_id.clone(),
        order,
    }
}

/// The remote appends moved and created items; a full order is only needed
/// when the item landed somewhere other than the tail.
fn order_follow_up(
    store: &BoardStateStore,
    group_id: &GroupId,
    item_id: &ItemId,
) -> Option<RemoteCall> {
    let group = store.board().group(group_id)?;
    let item_id = store.resolve_item_id(item_id);
    let at_tail = group.items.last().map_or(true, |last| last.id == item_id);
    if at_tail {
        None
    } else {
        Some(full_item_order(store, group_id))
    }
}

impl Rollback {
    /// Restores the captured state
    pub(crate) fn revert(self, store: &mut BoardStateStore) -> Result<()> {
        match self {
            Self::ItemName { item_id, prior } => {
                store.rename_item(&item_id, prior)?;
            }
            Self::CellValue {
                item_id,
                column_key,
                prior,
            } => {
                store.set_column_value(&item_id, &column_key, prior)?;
            }
            Self::Created { item_id } => {
                store.remove_item(&item_id)?;
            }
            Self::Deleted { item, position } => {
                store.upsert_item(item, Some(position.index))?;
            }
            Self::Moved { item_id, from } => {
                store.move_item_to_group(&item_id, &from.group_id, Some(from.index))?;
            }
            Self::ItemOrder { group_id, prior } => {
                store.apply_item_order(&group_id, &prior)?;
            }
            Self::GroupOrder { prior } => {
                store.apply_group_order(&prior);
            }
            Self::ColumnOrder { prior } => {
                store.apply_column_order(&prior);
            }
            Self::GroupTitle { group_id, prior } => {
                store.rename_group(&group_id, prior)?;
            }
            Self::GroupDeleted { group, index } => {
                store.upsert_group(group, Some(index))?;
            }
            Self::ColumnDeleted(removed) => {
                store.restore_column(removed)?;
            }
            Self::StatusLabels { column_id, prior } => {
                store.set_status_labels(&column_id, prior)?;
            }
        }
        Ok(())
    }

    /// The mutation that reverses a confirmed change, if it can be undone.
    /// `created` is the server id of an item the mutation created.
    pub(crate) fn compensation(&self, created: Option<&ItemId>) -> Option<Mutation> {
        match self {
            Self::ItemName { item_id, prior } => Some(Mutation::RenameItem {
                item_id: item_id.clone(),
                name: prior.clone(),
            }),
            Self::CellValue {
                item_id,
                column_key,
                prior,
            } => Some(Mutation::SetColumnValue {
                item_id: item_id.clone(),
                column_key: column_key.clone(),
                value: prior.clone(),
            }),
            Self::Created { item_id } => Some(Mutation::DeleteItem {
                item_id: created.unwrap_or(item_id).clone(),
            }),
            Self::Deleted { item, position } => Some(Mutation::CreateItem {
                group_id: position.group_id.clone(),
                name: item.name.clone(),
                values: item.column_values.clone(),
                index: Some(position.index),
            }),
            Self::Moved { item_id, from } => Some(Mutation::MoveItem {
                item_id: item_id.clone(),
                target_group: from.group_id.clone(),
                target_index: Some(from.index),
            }),
            Self::ItemOrder { group_id, prior } => Some(Mutation::ReorderItems {
                group_id: group_id.clone(),
                order: prior.clone(),
            }),
            Self::GroupOrder { prior } => Some(Mutation::ReorderGroups {
                order: prior.clone(),
            }),
            Self::ColumnOrder { prior } => Some(Mutation::ReorderColumns {
                order: prior.clone(),
            }),
            Self::GroupTitle { group_id, prior } => Some(Mutation::RenameGroup {
                group_id: group_id.clone(),
                title: prior.clone(),
            }),
            Self::GroupDeleted { .. } | Self::ColumnDeleted(_) | Self::StatusLabels { .. } => None,
        }
    }
}
