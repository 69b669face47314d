use crate::domain::column::{Column, ColumnValue};
use crate::domain::ids::{BoardId, ColumnId, GroupId, ItemId};
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A nested row under an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subitem {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub column_values: HashMap<String, ColumnValue>,
}

/// A board row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub group_id: GroupId,
    pub name: String,
    /// Column key -> value
    #[serde(default)]
    pub column_values: HashMap<String, ColumnValue>,
    #[serde(default)]
    pub subitems: Vec<Subitem>,
}

impl Item {
    pub fn new(id: ItemId, group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            column_values: HashMap::new(),
            subitems: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: ColumnValue) -> Self {
        self.column_values.insert(key.into(), value);
        self
    }
}

/// An ordered lane of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub title: String,
    pub color: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Group {
    pub fn new(id: GroupId, title: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            color: color.into(),
            items: Vec::new(),
        }
    }

    /// Position of an item inside this group
    pub fn position_of(&self, item_id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == item_id)
    }

    /// Item ids in display order
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

/// Where an item sits on the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPosition {
    pub group_id: GroupId,
    pub index: usize,
}

/// Local replica of a remote board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Board {
    pub fn new(id: BoardId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            columns: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn group(&self, group_id: &GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| &g.id == group_id)
    }

    pub fn group_index(&self, group_id: &GroupId) -> Option<usize> {
        self.groups.iter().position(|g| &g.id == group_id)
    }

    pub fn column(&self, column_id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == column_id)
    }

    pub fn column_by_key(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Finds the group and index an item currently occupies
    pub fn locate_item(&self, item_id: &ItemId) -> Option<ItemPosition> {
        self.groups.iter().find_map(|group| {
            group.position_of(item_id).map(|index| ItemPosition {
                group_id: group.id.clone(),
                index,
            })
        })
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&Item> {
        self.groups
            .iter()
            .flat_map(|g| g.items.iter())
            .find(|item| &item.id == item_id)
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|g| g.id.clone()).collect()
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    /// Checks the structural invariants every snapshot must satisfy:
    /// unique column keys, unique ids, and items whose `group_id` matches
    /// the group that lists them.
    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        let mut column_ids = HashSet::new();
        for column in &self.columns {
            if !keys.insert(column.key.as_str()) {
                return Err(SyncError::Parse(format!(
                    "duplicate column key '{}'",
                    column.key
                )));
            }
            if !column_ids.insert(&column.id) {
                return Err(SyncError::Parse(format!("duplicate column id '{}'", column.id)));
            }
        }

        let mut group_ids = HashSet::new();
        let mut item_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(&group.id) {
                return Err(SyncError::Parse(format!("duplicate group id '{}'", group.id)));
            }
            for item in &group.items {
                if item.group_id != group.id {
                    return Err(SyncError::Parse(format!(
                        "item '{}' claims group '{}' but is listed in '{}'",
                        item.id, item.group_id, group.id
                    )));
                }
                if !item_ids.insert(&item.id) {
                    return Err(SyncError::Parse(format!("duplicate item id '{}'", item.id)));
                }
            }
        }
        Ok(())
    }
}
