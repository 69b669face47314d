//! # boardsync core
//!
//! Client-side synchronization engine for collaborative boards.
//!
//! A [`BoardSession`] keeps a local replica of one board responsive by
//! applying every change optimistically, shipping it to a [`RemoteBoard`]
//! in the background and rolling it back if the remote refuses. Rapid field
//! edits are debounced, drag-and-drop is resolved into full-order writes,
//! confirmed changes can be undone, and a background poll folds in changes
//! made by other collaborators.
//!
//! The crate has no opinion on transport or rendering: implement
//! [`RemoteBoard`] for your API client and read [`BoardSession::snapshot`]
//! from the view layer.

pub mod config;
pub mod domain;
pub mod error;
pub mod remote;
pub mod sync;

// Re-export commonly used types
pub use config::{IndexPolicy, SyncConfig};
pub use domain::{
    Board, BoardId, Column, ColumnId, ColumnKind, ColumnValue, Group, GroupId, Item, ItemId,
    StatusLabel,
};
pub use error::{Result, SyncError};
pub use remote::RemoteBoard;
pub use sync::{
    BoardSession, FieldEdit, Mutation, MutationOutcome, MutationState, SyncStatus, TickOutcome,
};
