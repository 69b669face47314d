use crate::{
    domain::{Board, BoardId, ColumnId, ColumnValue, GroupId, Item, ItemId, StatusLabel},
    error::{Result, SyncError},
    sync::store::BoardStateStore,
};
use async_trait::async_trait;
use std::collections::HashMap;

#[cfg(feature = "file-remote")]
pub mod file_remote;
pub mod memory;

/// The authoritative board store the engine synchronizes with.
///
/// Every write reports success or a [`SyncError`] carrying a readable
/// reason; transports map network trouble to `Transport` and refusals to
/// `RemoteRejected`.
#[async_trait]
pub trait RemoteBoard: Send + Sync {
    /// Fetches a full snapshot of the board
    async fn fetch_board(&self, board_id: &BoardId) -> Result<Board>;

    /// Creates an item at the end of a group and returns its server id
    async fn create_item(
        &self,
        group_id: &GroupId,
        name: &str,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<ItemId>;

    async fn rename_item(&self, item_id: &ItemId, name: &str) -> Result<()>;

    /// Sets a cell; `None` clears it
    async fn set_column_value(
        &self,
        item_id: &ItemId,
        column_key: &str,
        value: Option<&ColumnValue>,
    ) -> Result<()>;

    /// Moves an item to the end of another group
    async fn move_item(&self, item_id: &ItemId, target_group: &GroupId) -> Result<()>;

    /// Replaces the order of a group with the complete list given
    async fn reorder_items(&self, group_id: &GroupId, ordered: &[ItemId]) -> Result<()>;

    async fn reorder_groups(&self, ordered: &[GroupId]) -> Result<()>;

    async fn reorder_columns(&self, ordered: &[ColumnId]) -> Result<()>;

    async fn delete_item(&self, item_id: &ItemId) -> Result<()>;

    async fn delete_group(&self, group_id: &GroupId) -> Result<()>;

    async fn delete_column(&self, column_id: &ColumnId) -> Result<()>;

    async fn rename_group(&self, group_id: &GroupId, title: &str) -> Result<()>;

    async fn add_status_label(&self, column_id: &ColumnId, label: &StatusLabel) -> Result<()>;
}

/// A single write against a [`RemoteBoard`], as plain data
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateItem {
        group_id: GroupId,
        name: String,
        values: HashMap<String, ColumnValue>,
    },
    RenameItem {
        item_id: ItemId,
        name: String,
    },
    SetColumnValue {
        item_id: ItemId,
        column_key: String,
        value: Option<ColumnValue>,
    },
    MoveItem {
        item_id: ItemId,
        target_group: GroupId,
    },
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
    DeleteItem {
        item_id: ItemId,
    },
    DeleteGroup {
        group_id: GroupId,
    },
    DeleteColumn {
        column_id: ColumnId,
    },
    RenameGroup {
        group_id: GroupId,
        title: String,
    },
    AddStatusLabel {
        column_id: ColumnId,
        label: StatusLabel,
    },
}

impl RemoteCall {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateItem { .. } => "create_item",
            Self::RenameItem { .. } => "rename_item",
            Self::SetColumnValue { .. } => "set_column_value",
            Self::MoveItem { .. } => "move_item",
            Self::ReorderItems { .. } => "reorder_items",
            Self::ReorderGroups { .. } => "reorder_groups",
            Self::ReorderColumns { .. } => "reorder_columns",
            Self::DeleteItem { .. } => "delete_item",
            Self::DeleteGroup { .. } => "delete_group",
            Self::DeleteColumn { .. } => "delete_column",
            Self::RenameGroup { .. } => "rename_group",
            Self::AddStatusLabel { .. } => "add_status_label",
        }
    }

    /// Sends this call through `remote`. Returns the server id for creates.
    pub async fn send(&self, remote: &dyn RemoteBoard) -> Result<Option<ItemId>> {
        match self {
            Self::CreateItem {
                group_id,
                name,
                values,
            } => remote.create_item(group_id, name, values).await.map(Some),
            Self::RenameItem { item_id, name } => {
                remote.rename_item(item_id, name).await.map(|_| None)
            }
            Self::SetColumnValue {
                item_id,
                column_key,
                value,
            } => remote
                .set_column_value(item_id, column_key, value.as_ref())
                .await
                .map(|_| None),
            Self::MoveItem {
                item_id,
                target_group,
            } => remote.move_item(item_id, target_group).await.map(|_| None),
            Self::ReorderItems { group_id, order } => {
                remote.reorder_items(group_id, order).await.map(|_| None)
            }
            Self::ReorderGroups { order } => remote.reorder_groups(order).await.map(|_| None),
            Self::ReorderColumns { order } => remote.reorder_columns(order).await.map(|_| None),
            Self::DeleteItem { item_id } => remote.delete_item(item_id).await.map(|_| None),
            Self::DeleteGroup { group_id } => remote.delete_group(group_id).await.map(|_| None),
            Self::DeleteColumn { column_id } => remote.delete_column(column_id).await.map(|_| None),
            Self::RenameGroup { group_id, title } => {
                remote.rename_group(group_id, title).await.map(|_| None)
            }
            Self::AddStatusLabel { column_id, label } => {
                remote.add_status_label(column_id, label).await.map(|_| None)
            }
        }
    }

    /// Applies the call to an authoritative board the way a server would.
    /// `assign_id` supplies ids for created items. Lookup failures come back
    /// as `RemoteRejected`.
    pub fn apply_authoritative(
        &self,
        store: &mut BoardStateStore,
        assign_id: impl FnOnce() -> ItemId,
    ) -> Result<Option<ItemId>> {
        let outcome = match self.clone() {
            Self::CreateItem {
                group_id,
                name,
                values,
            } => {
                let mut item = Item::new(assign_id(), group_id, name);
                item.column_values = values;
                let id = item.id.clone();
                store.upsert_item(item, None).map(|_| Some(id))
            }
            Self::RenameItem { item_id, name } => store.rename_item(&item_id, name).map(|_| None),
            Self::SetColumnValue {
                item_id,
                column_key,
                value,
            } => store
                .set_column_value(&item_id, &column_key, value)
                .map(|_| None),
            Self::MoveItem {
                item_id,
                target_group,
            } => store
                .move_item_to_group(&item_id, &target_group, None)
                .map(|_| None),
            Self::ReorderItems { group_id, order } => {
                store.apply_item_order(&group_id, &order).map(|_| None)
            }
            Self::ReorderGroups { order } => {
                store.apply_group_order(&order);
                Ok(None)
            }
            Self::ReorderColumns { order } => {
                store.apply_column_order(&order);
                Ok(None)
            }
            Self::DeleteItem { item_id } => store.remove_item(&item_id).map(|_| None),
            Self::DeleteGroup { group_id } => store.remove_group(&group_id).map(|_| None),
            Self::DeleteColumn { column_id } => store.remove_column(&column_id).map(|_| None),
            Self::RenameGroup { group_id, title } => {
                store.rename_group(&group_id, title).map(|_| None)
            }
            Self::AddStatusLabel { column_id, label } => {
                store.add_status_label(&column_id, label).map(|_| None)
            }
        };
        outcome.map_err(|e| match e {
            SyncError::Transport(_) | SyncError::RemoteRejected(_) => e,
            other => SyncError::RemoteRejected(other.to_string()),
        })
    }
}
