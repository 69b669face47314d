pub mod coalescer;
pub mod coordinator;
pub mod drag;
pub mod fingerprint;
pub mod mutation;
pub mod provisional;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod store;
pub mod undo;

pub use coalescer::{EditCoalescer, EditKey, FieldEdit};
pub use coordinator::{
    MutationCoordinator, MutationId, MutationOutcome, MutationState, PendingMutation,
};
pub use drag::{resolve_item_drop, DragReorderEngine, DropPlan};
pub use fingerprint::{fingerprint, Fingerprint};
pub use mutation::{Mutation, MutationKind};
pub use provisional::Provisional;
pub use reconcile::{ReconciliationLoop, RefreshTrigger, TickOutcome};
pub use session::BoardSession;
pub use status::{StatusHandle, SyncNotice, SyncStatus};
pub use store::{BoardStateStore, RemovedColumn, SharedStore};
pub use undo::{Origin, UndoEntry, UndoManager};
