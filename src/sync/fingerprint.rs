//! Change fingerprinting for poll results.
//!
//! The digest covers only what affects rendering: board text, column
//! definitions and order, group definitions and order, items and their
//! values. Cell maps are walked in sorted key order so `HashMap` iteration
//! order never leaks into the result.

use crate::domain::{Board, ColumnValue, Item, Subitem};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// SHA-256 digest of the meaningful content of a board
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is plenty for log lines.
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// Length-prefixed writer so adjacent fields can never run together
struct FieldHasher(Sha256);

impl FieldHasher {
    fn field(&mut self, tag: &str, value: &str) {
        self.0.update(tag.as_bytes());
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
    }

    fn count(&mut self, tag: &str, n: usize) {
        self.0.update(tag.as_bytes());
        self.0.update((n as u64).to_le_bytes());
    }

    fn values(&mut self, values: &HashMap<String, ColumnValue>) {
        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        self.count("values", keys.len());
        for key in keys {
            self.field("key", key);
            self.field("value", &values[key].canonical());
        }
    }

    fn item(&mut self, item: &Item) {
        self.field("item", item.id.as_str());
        self.field("name", &item.name);
        self.values(&item.column_values);
        self.count("subitems", item.subitems.len());
        for subitem in &item.subitems {
            self.subitem(subitem);
        }
    }

    fn subitem(&mut self, subitem: &Subitem) {
        self.field("subitem", subitem.id.as_str());
        self.field("name", &subitem.name);
        self.values(&subitem.column_values);
    }
}

/// Computes the fingerprint of a board. Pure and deterministic.
pub fn fingerprint(board: &Board) -> Fingerprint {
    let mut h = FieldHasher(Sha256::new());

    h.field("board", board.id.as_str());
    h.field("board.name", &board.name);
    h.field("board.description", board.description.as_deref().unwrap_or(""));

    h.count("columns", board.columns.len());
    for column in &board.columns {
        h.field("column", column.id.as_str());
        h.field("key", &column.key);
        h.field("title", &column.title);
        h.field("kind", &serde_json::to_string(&column.kind).unwrap_or_default());
        h.field("width", &column.width.to_string());
        h.field("hidden", if column.hidden { "1" } else { "0" });
    }

    h.count("groups", board.groups.len());
    for group in &board.groups {
        h.field("group", group.id.as_str());
        h.field("title", &group.title);
        h.field("color", &group.color);
        h.count("items", group.items.len());
        for item in &group.items {
            h.item(item);
        }
    }

    Fingerprint(hex::encode(h.0.finalize()))
}
