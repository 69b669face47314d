//! In-memory board replica.
//!
//! Every primitive is synchronous, performs no I/O and hands back the prior
//! value of whatever it touched, which is all a rollback needs. Lookups and
//! validation happen before the first write, so a failing primitive leaves
//! the board untouched.

use crate::config::IndexPolicy;
use crate::domain::{
    Board, Column, ColumnId, ColumnKind, ColumnValue, Group, GroupId, Item, ItemId, ItemPosition,
    StatusLabel,
};
use crate::error::{Result, SyncError};
use crate::sync::provisional::Provisional;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// A column removed from the board together with the cell values it held
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedColumn {
    pub column: Column,
    pub index: usize,
    pub values: Vec<(ItemId, ColumnValue)>,
}

#[derive(Debug)]
pub struct BoardStateStore {
    board: Board,
    policy: IndexPolicy,
    /// Bumped on every local mutation
    revision: u64,
    /// Client-minted item ids and what became of them
    provisional: HashMap<ItemId, Provisional>,
}

impl BoardStateStore {
    pub fn new(board: Board, policy: IndexPolicy) -> Self {
        Self {
            board,
            policy,
            revision: 0,
            provisional: HashMap::new(),
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn snapshot(&self) -> Board {
        self.board.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn policy(&self) -> IndexPolicy {
        self.policy
    }

    /// Maps `index` into `0..=upper` according to the index policy
    pub fn fit_index(&self, index: usize, upper: usize, what: &str) -> Result<usize> {
        if index <= upper {
            return Ok(index);
        }
        match self.policy {
            IndexPolicy::Clamp => {
                log::debug!(
                    "[boardsync.store] Clamping {} index {} to {}",
                    what,
                    index,
                    upper
                );
                Ok(upper)
            }
            IndexPolicy::FailFast => Err(SyncError::LocalInvariantViolation(format!(
                "{} index {} out of range 0..={}",
                what, index, upper
            ))),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// The id an item lives under now. A provisional id the remote has
    /// confirmed maps to the server id; every other id maps to itself.
    pub fn resolve_item_id(&self, item_id: &ItemId) -> ItemId {
        match self.provisional.get(item_id) {
            Some(Provisional::Adopted(server_id)) => server_id.clone(),
            _ => item_id.clone(),
        }
    }

    pub fn provisional_state(&self, item_id: &ItemId) -> Option<&Provisional> {
        self.provisional.get(item_id)
    }

    /// Marks `item_id` as minted locally and awaiting the remote
    pub fn track_provisional(&mut self, item_id: ItemId) {
        self.provisional.insert(item_id, Provisional::Pending);
    }

    /// The create behind `item_id` failed
    pub fn abandon_provisional(&mut self, item_id: &ItemId) {
        self.provisional.insert(item_id.clone(), Provisional::Abandoned);
    }

    fn group_mut(&mut self, group_id: &GroupId) -> Result<&mut Group> {
        self.board
            .groups
            .iter_mut()
            .find(|g| &g.id == group_id)
            .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))
    }

    fn item_mut(&mut self, item_id: &ItemId) -> Result<&mut Item> {
        let resolved = self.resolve_item_id(item_id);
        self.board
            .groups
            .iter_mut()
            .flat_map(|g| g.items.iter_mut())
            .find(|item| item.id == resolved)
            .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))
    }

    fn column_mut(&mut self, column_id: &ColumnId) -> Result<&mut Column> {
        self.board
            .columns
            .iter_mut()
            .find(|c| &c.id == column_id)
            .ok_or_else(|| SyncError::ColumnNotFound(column_id.to_string()))
    }

    /// Sets (or clears, with `None`) a cell. Returns the previous cell value.
    pub fn set_column_value(
        &mut self,
        item_id: &ItemId,
        column_key: &str,
        value: Option<ColumnValue>,
    ) -> Result<Option<ColumnValue>> {
        if self.board.column_by_key(column_key).is_none() {
            return Err(SyncError::ColumnNotFound(column_key.to_string()));
        }
        let item = self.item_mut(item_id)?;
        let prior = match value {
            Some(value) => item.column_values.insert(column_key.to_string(), value),
            None => item.column_values.remove(column_key),
        };
        self.touch();
        Ok(prior)
    }

    /// Returns the previous name
    pub fn rename_item(&mut self, item_id: &ItemId, name: impl Into<String>) -> Result<String> {
        let item = self.item_mut(item_id)?;
        let prior = std::mem::replace(&mut item.name, name.into());
        self.touch();
        Ok(prior)
    }

    /// Returns the previous title
    pub fn rename_group(&mut self, group_id: &GroupId, title: impl Into<String>) -> Result<String> {
        let group = self.group_mut(group_id)?;
        let prior = std::mem::replace(&mut group.title, title.into());
        self.touch();
        Ok(prior)
    }

    /// Moves an item into `target_group` at `target_index` (end when `None`).
    /// Works for same-group repositioning too. Returns where the item was.
    pub fn move_item_to_group(
        &mut self,
        item_id: &ItemId,
        target_group: &GroupId,
        target_index: Option<usize>,
    ) -> Result<ItemPosition> {
        let prior = self
            .board
            .locate_item(&self.resolve_item_id(item_id))
            .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))?;
        let target_gi = self
            .board
            .group_index(target_group)
            .ok_or_else(|| SyncError::GroupNotFound(target_group.to_string()))?;

        // Length of the target list once the item has been taken out.
        let target_len = if &prior.group_id == target_group {
            self.board.groups[target_gi].items.len() - 1
        } else {
            self.board.groups[target_gi].items.len()
        };
        let index = match target_index {
            Some(index) => self.fit_index(index, target_len, "item")?,
            None => target_len,
        };

        let source_gi = self
            .board
            .group_index(&prior.group_id)
            .ok_or_else(|| SyncError::GroupNotFound(prior.group_id.to_string()))?;
        let mut item = self.board.groups[source_gi].items.remove(prior.index);
        item.group_id = target_group.clone();
        self.board.groups[target_gi].items.insert(index, item);
        self.touch();
        Ok(prior)
    }

    /// Moves the item at `from` to `to` within one group. Returns the prior order.
    pub fn reorder_items(
        &mut self,
        group_id: &GroupId,
        from: usize,
        to: usize,
    ) -> Result<Vec<ItemId>> {
        let gi = self
            .board
            .group_index(group_id)
            .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))?;
        let prior = self.board.groups[gi].item_ids();
        if prior.is_empty() {
            return Ok(prior);
        }
        let last = prior.len() - 1;
        let from = self.fit_index(from, last, "item")?;
        let to = self.fit_index(to, last, "item")?;
        move_within(&mut self.board.groups[gi].items, from, to);
        self.touch();
        Ok(prior)
    }

    /// Returns the prior group order
    pub fn reorder_groups(&mut self, from: usize, to: usize) -> Result<Vec<GroupId>> {
        let prior = self.board.group_ids();
        if prior.is_empty() {
            return Ok(prior);
        }
        let last = prior.len() - 1;
        let from = self.fit_index(from, last, "group")?;
        let to = self.fit_index(to, last, "group")?;
        move_within(&mut self.board.groups, from, to);
        self.touch();
        Ok(prior)
    }

    /// Returns the prior column order
    pub fn reorder_columns(&mut self, from: usize, to: usize) -> Result<Vec<ColumnId>> {
        let prior = self.board.column_ids();
        if prior.is_empty() {
            return Ok(prior);
        }
        let last = prior.len() - 1;
        let from = self.fit_index(from, last, "column")?;
        let to = self.fit_index(to, last, "column")?;
        move_within(&mut self.board.columns, from, to);
        self.touch();
        Ok(prior)
    }

    /// Rearranges a group to follow `order`. Items missing from `order`
    /// keep their relative order after the listed ones; unknown ids are
    /// ignored. Returns the prior order.
    pub fn apply_item_order(
        &mut self,
        group_id: &GroupId,
        order: &[ItemId],
    ) -> Result<Vec<ItemId>> {
        let order: Vec<ItemId> = order.iter().map(|id| self.resolve_item_id(id)).collect();
        let group = self.group_mut(group_id)?;
        let prior = group.item_ids();
        arrange_by(&mut group.items, &order, |item| &item.id);
        self.touch();
        Ok(prior)
    }

    pub fn apply_group_order(&mut self, order: &[GroupId]) -> Vec<GroupId> {
        let prior = self.board.group_ids();
        arrange_by(&mut self.board.groups, order, |group| &group.id);
        self.touch();
        prior
    }

    pub fn apply_column_order(&mut self, order: &[ColumnId]) -> Vec<ColumnId> {
        let prior = self.board.column_ids();
        arrange_by(&mut self.board.columns, order, |column| &column.id);
        self.touch();
        prior
    }

    /// Inserts or replaces an item. `index` defaults to the item's current
    /// slot when it already lives in the target group, else the end.
    /// Returns the replaced item and where it was.
    pub fn upsert_item(
        &mut self,
        mut item: Item,
        index: Option<usize>,
    ) -> Result<Option<(Item, ItemPosition)>> {
        item.id = self.resolve_item_id(&item.id);
        let target_gi = self
            .board
            .group_index(&item.group_id)
            .ok_or_else(|| SyncError::GroupNotFound(item.group_id.to_string()))?;
        let existing = self.board.locate_item(&item.id);

        let target_len = match &existing {
            Some(pos) if pos.group_id == item.group_id => {
                self.board.groups[target_gi].items.len() - 1
            }
            _ => self.board.groups[target_gi].items.len(),
        };
        let index = match (index, &existing) {
            (Some(index), _) => self.fit_index(index, target_len, "item")?,
            (None, Some(pos)) if pos.group_id == item.group_id => pos.index,
            (None, _) => target_len,
        };

        let prior = match existing {
            Some(pos) => {
                let gi = self
                    .board
                    .group_index(&pos.group_id)
                    .ok_or_else(|| SyncError::GroupNotFound(pos.group_id.to_string()))?;
                let old = self.board.groups[gi].items.remove(pos.index);
                Some((old, pos))
            }
            None => None,
        };
        self.board.groups[target_gi].items.insert(index, item);
        self.touch();
        Ok(prior)
    }

    /// Removes an item, returning it with its former position
    pub fn remove_item(&mut self, item_id: &ItemId) -> Result<(Item, ItemPosition)> {
        let pos = self
            .board
            .locate_item(&self.resolve_item_id(item_id))
            .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))?;
        let gi = self
            .board
            .group_index(&pos.group_id)
            .ok_or_else(|| SyncError::GroupNotFound(pos.group_id.to_string()))?;
        let item = self.board.groups[gi].items.remove(pos.index);
        self.touch();
        Ok((item, pos))
    }

    /// Inserts or replaces a group. Items carried by the group are re-homed
    /// to it; an item id already living in another group is refused.
    pub fn upsert_group(
        &mut self,
        mut group: Group,
        index: Option<usize>,
    ) -> Result<Option<(Group, usize)>> {
        for item in &mut group.items {
            if let Some(pos) = self.board.locate_item(&item.id) {
                if pos.group_id != group.id {
                    return Err(SyncError::LocalInvariantViolation(format!(
                        "item '{}' already belongs to group '{}'",
                        item.id, pos.group_id
                    )));
                }
            }
            item.group_id = group.id.clone();
        }

        let existing = self.board.group_index(&group.id);
        let upper = match existing {
            Some(_) => self.board.groups.len() - 1,
            None => self.board.groups.len(),
        };
        let index = match (index, existing) {
            (Some(index), _) => self.fit_index(index, upper, "group")?,
            (None, Some(current)) => current,
            (None, None) => upper,
        };

        let prior = existing.map(|gi| (self.board.groups.remove(gi), gi));
        self.board.groups.insert(index, group);
        self.touch();
        Ok(prior)
    }

    /// Removes a group with all its items, returning it with its index
    pub fn remove_group(&mut self, group_id: &GroupId) -> Result<(Group, usize)> {
        let gi = self
            .board
            .group_index(group_id)
            .ok_or_else(|| SyncError::GroupNotFound(group_id.to_string()))?;
        let group = self.board.groups.remove(gi);
        self.touch();
        Ok((group, gi))
    }

    /// Inserts or replaces a column. Refuses a key already used by a
    /// different column.
    pub fn upsert_column(
        &mut self,
        column: Column,
        index: Option<usize>,
    ) -> Result<Option<(Column, usize)>> {
        if self
            .board
            .columns
            .iter()
            .any(|c| c.key == column.key && c.id != column.id)
        {
            return Err(SyncError::DuplicateColumnKey(column.key));
        }

        let existing = self.board.columns.iter().position(|c| c.id == column.id);
        let upper = match existing {
            Some(_) => self.board.columns.len() - 1,
            None => self.board.columns.len(),
        };
        let index = match (index, existing) {
            (Some(index), _) => self.fit_index(index, upper, "column")?,
            (None, Some(current)) => current,
            (None, None) => upper,
        };

        let prior = existing.map(|ci| (self.board.columns.remove(ci), ci));
        self.board.columns.insert(index, column);
        self.touch();
        Ok(prior)
    }

    /// Removes a column and strips its cells from every item
    pub fn remove_column(&mut self, column_id: &ColumnId) -> Result<RemovedColumn> {
        let index = self
            .board
            .columns
            .iter()
            .position(|c| &c.id == column_id)
            .ok_or_else(|| SyncError::ColumnNotFound(column_id.to_string()))?;
        let column = self.board.columns.remove(index);

        let mut values = Vec::new();
        for item in self.board.groups.iter_mut().flat_map(|g| g.items.iter_mut()) {
            if let Some(value) = item.column_values.remove(&column.key) {
                values.push((item.id.clone(), value));
            }
        }
        self.touch();
        Ok(RemovedColumn {
            column,
            index,
            values,
        })
    }

    /// Puts back a column removed by [`remove_column`](Self::remove_column)
    pub fn restore_column(&mut self, removed: RemovedColumn) -> Result<()> {
        let key = removed.column.key.clone();
        self.upsert_column(removed.column, Some(removed.index))?;
        for (item_id, value) in removed.values {
            // Items deleted in the meantime simply lose the cell.
            if let Ok(item) = self.item_mut(&item_id) {
                item.column_values.insert(key.clone(), value);
            }
        }
        Ok(())
    }

    /// Returns the previous label list
    pub fn add_status_label(
        &mut self,
        column_id: &ColumnId,
        label: StatusLabel,
    ) -> Result<Vec<StatusLabel>> {
        let column = self.column_mut(column_id)?;
        let prior = column.add_status_label(label).ok_or_else(|| {
            SyncError::LocalInvariantViolation(format!(
                "column '{}' is not a status column",
                column_id
            ))
        })?;
        self.touch();
        Ok(prior)
    }

    /// Replaces the label list of a status column, returning the old one
    pub fn set_status_labels(
        &mut self,
        column_id: &ColumnId,
        labels: Vec<StatusLabel>,
    ) -> Result<Vec<StatusLabel>> {
        let column = self.column_mut(column_id)?;
        let prior = match &mut column.kind {
            ColumnKind::Status { labels: current } => std::mem::replace(current, labels),
            _ => {
                return Err(SyncError::LocalInvariantViolation(format!(
                    "column '{}' is not a status column",
                    column_id
                )))
            }
        };
        self.touch();
        Ok(prior)
    }

    /// Returns the previous width
    pub fn set_column_width(&mut self, column_id: &ColumnId, width: u32) -> Result<u32> {
        let column = self.column_mut(column_id)?;
        let prior = std::mem::replace(&mut column.width, width);
        self.touch();
        Ok(prior)
    }

    /// Swaps a provisional item id for the one the remote assigned. The old
    /// id keeps resolving to the new one, also when the item was already
    /// deleted locally.
    pub fn reassign_item_id(&mut self, from: &ItemId, to: ItemId) -> Result<()> {
        if self.board.locate_item(&to).is_some() {
            return Err(SyncError::LocalInvariantViolation(format!(
                "item id '{}' already in use",
                to
            )));
        }
        let item = self
            .board
            .groups
            .iter_mut()
            .flat_map(|g| g.items.iter_mut())
            .find(|item| &item.id == from);
        if let Some(item) = item {
            item.id = to.clone();
            self.touch();
        }
        self.provisional.insert(from.clone(), Provisional::Adopted(to));
        Ok(())
    }

    /// Wholesale replacement used by reconciliation. Returns the old board.
    pub fn replace_board(&mut self, board: Board) -> Board {
        self.touch();
        std::mem::replace(&mut self.board, board)
    }
}

fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from == to {
        return;
    }
    let entry = items.remove(from);
    items.insert(to, entry);
}

fn arrange_by<T, K, F>(entries: &mut Vec<T>, order: &[K], key: F)
where
    K: PartialEq + Eq + std::hash::Hash,
    F: Fn(&T) -> &K,
{
    let mut remaining: Vec<Option<T>> = entries.drain(..).map(Some).collect();
    let mut seen = HashSet::new();
    for wanted in order {
        if !seen.insert(wanted) {
            continue;
        }
        let found = remaining
            .iter()
            .position(|slot| matches!(slot, Some(entry) if key(entry) == wanted));
        if let Some(entry) = found.and_then(|pos| remaining[pos].take()) {
            entries.push(entry);
        }
    }
    entries.extend(remaining.into_iter().flatten());
}

/// Cloneable handle to the single mutable board replica.
///
/// Access goes through closures so a guard can never be held across an
/// await point.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<BoardStateStore>>,
    /// Bumped whenever a provisional id is adopted or abandoned
    settled: Arc<watch::Sender<u64>>,
}

impl SharedStore {
    pub fn new(store: BoardStateStore) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(store)),
            settled: Arc::new(settled),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&BoardStateStore) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut BoardStateStore) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Adopts the server id of a created item and wakes writes waiting on it.
    /// A clash with an existing id abandons the provisional one instead.
    pub fn adopt_provisional(&self, provisional: &ItemId, server_id: ItemId) -> Result<()> {
        let result = self.write(|s| match s.reassign_item_id(provisional, server_id) {
            Ok(()) => Ok(()),
            Err(err) => {
                s.abandon_provisional(provisional);
                Err(err)
            }
        });
        self.settled.send_modify(|version| *version += 1);
        result
    }

    /// Gives up on a provisional id and wakes writes waiting on it
    pub fn abandon_provisional(&self, provisional: &ItemId) {
        self.write(|s| s.abandon_provisional(provisional));
        self.settled.send_modify(|version| *version += 1);
    }

    pub(crate) fn settlements(&self) -> watch::Receiver<u64> {
        self.settled.subscribe()
    }

    pub fn snapshot(&self) -> Board {
        self.read(BoardStateStore::snapshot)
    }

    pub fn revision(&self) -> u64 {
        self.read(BoardStateStore::revision)
    }
}
