pub mod board;
pub mod column;
pub mod ids;

pub use board::{Board, Group, Item, ItemPosition, Subitem};
pub use column::{Column, ColumnKind, ColumnValue, StatusLabel};
pub use ids::{BoardId, ColumnId, GroupId, ItemId};
