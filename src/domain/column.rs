use crate::domain::ids::ColumnId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A label offered by a status column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabel {
    pub name: String,
    pub color: String,
}

impl StatusLabel {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Column type with its type-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Status {
        labels: Vec<StatusLabel>,
    },
    Person,
    Date,
    Checkbox,
    Dropdown {
        options: Vec<String>,
    },
}

impl ColumnKind {
    /// Width a freshly seen column gets when the remote leaves it unset
    pub fn default_width(&self) -> u32 {
        match self {
            Self::Text => 200,
            Self::Number { .. } => 100,
            Self::Status { .. } => 140,
            Self::Person => 120,
            Self::Date => 120,
            Self::Checkbox => 80,
            Self::Dropdown { .. } => 160,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number { .. } => write!(f, "number"),
            Self::Status { .. } => write!(f, "status"),
            Self::Person => write!(f, "person"),
            Self::Date => write!(f, "date"),
            Self::Checkbox => write!(f, "checkbox"),
            Self::Dropdown { .. } => write!(f, "dropdown"),
        }
    }
}

/// A board column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    /// Stable key that item values are stored under; unique per board
    pub key: String,
    pub title: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub hidden: bool,
}

impl Column {
    pub fn new(
        id: ColumnId,
        key: impl Into<String>,
        title: impl Into<String>,
        kind: ColumnKind,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            title: title.into(),
            kind,
            width: 0,
            hidden: false,
        }
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    /// Adds a status label, returning the previous label list.
    /// Returns `None` when the column is not a status column.
    pub fn add_status_label(&mut self, label: StatusLabel) -> Option<Vec<StatusLabel>> {
        match &mut self.kind {
            ColumnKind::Status { labels } => {
                let prior = labels.clone();
                if !labels.iter().any(|l| l.name == label.name) {
                    labels.push(label);
                }
                Some(prior)
            }
            _ => None,
        }
    }
}

/// Typed value stored in an item cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ColumnValue {
    Text(String),
    Number(f64),
    Status(String),
    People(Vec<String>),
    Date(NaiveDate),
    Checkbox(bool),
    Dropdown(Vec<String>),
}

impl ColumnValue {
    /// Stable serialized form used for hashing and comparisons
    pub fn canonical(&self) -> String {
        match self {
            // JSON has no NaN or infinity; serde_json writes all of them as null.
            Self::Number(n) if !n.is_finite() => {
                format!(r#"{{"type":"number","value":"{}"}}"#, n)
            }
            _ => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}
