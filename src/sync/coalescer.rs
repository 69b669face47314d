//! Debounced field edits.
//!
//! Typing into a name or cell produces a burst of edits. Each edit lands in
//! the store at once; the remote sees only the last value of a burst, one
//! write per field at a time. The coalescer also owns the editing flag that
//! holds reconciliation off while the user is active.

use crate::domain::{ColumnValue, GroupId, ItemId};
use crate::error::Result;
use crate::remote::{RemoteBoard, RemoteCall};
use crate::sync::reconcile::RefreshTrigger;
use crate::sync::status::StatusHandle;
use crate::sync::store::{BoardStateStore, SharedStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// The field an edit targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EditKey {
    ItemName(ItemId),
    ItemValue(ItemId, String),
    GroupTitle(GroupId),
}

/// A single keystroke-level edit of a text-like field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    ItemName {
        item_id: ItemId,
        name: String,
    },
    ItemValue {
        item_id: ItemId,
        column_key: String,
        value: Option<ColumnValue>,
    },
    GroupTitle {
        group_id: GroupId,
        title: String,
    },
}

impl FieldEdit {
    pub fn key(&self) -> EditKey {
        match self {
            Self::ItemName { item_id, .. } => EditKey::ItemName(item_id.clone()),
            Self::ItemValue {
                item_id, column_key, ..
            } => EditKey::ItemValue(item_id.clone(), column_key.clone()),
            Self::GroupTitle { group_id, .. } => EditKey::GroupTitle(group_id.clone()),
        }
    }

    /// Points the edit at the id its item lives under now
    fn resolved(self, store: &BoardStateStore) -> Self {
        match self {
            Self::ItemName { item_id, name } => Self::ItemName {
                item_id: store.resolve_item_id(&item_id),
                name,
            },
            Self::ItemValue {
                item_id,
                column_key,
                value,
            } => Self::ItemValue {
                item_id: store.resolve_item_id(&item_id),
                column_key,
                value,
            },
            other => other,
        }
    }

    fn apply_local(&self, store: &mut BoardStateStore) -> Result<()> {
        match self {
            Self::ItemName { item_id, name } => {
                store.rename_item(item_id, name.clone()).map(|_| ())
            }
            Self::ItemValue {
                item_id,
                column_key,
                value,
            } => store
                .set_column_value(item_id, column_key, value.clone())
                .map(|_| ()),
            Self::GroupTitle { group_id, title } => {
                store.rename_group(group_id, title.clone()).map(|_| ())
            }
        }
    }

    fn into_call(self) -> RemoteCall {
        match self {
            Self::ItemName { item_id, name } => RemoteCall::RenameItem { item_id, name },
            Self::ItemValue {
                item_id,
                column_key,
                value,
            } => RemoteCall::SetColumnValue {
                item_id,
                column_key,
                value,
            },
            Self::GroupTitle { group_id, title } => RemoteCall::RenameGroup { group_id, title },
        }
    }
}

#[derive(Debug)]
struct Slot {
    latest: FieldEdit,
    /// `latest` has not been handed to a write yet
    dirty: bool,
    timer: Option<JoinHandle<()>>,
    in_flight: bool,
}

struct CoalescerInner {
    store: SharedStore,
    remote: Arc<dyn RemoteBoard>,
    status: StatusHandle,
    refresh: RefreshTrigger,
    debounce: Duration,
    quiet_period: Duration,
    remote_timeout: Option<Duration>,
    slots: Mutex<HashMap<EditKey, Slot>>,
    quiet_timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Per-field debounce in front of the remote
#[derive(Clone)]
pub struct EditCoalescer {
    inner: Arc<CoalescerInner>,
}

impl EditCoalescer {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteBoard>,
        status: StatusHandle,
        refresh: RefreshTrigger,
        debounce: Duration,
        quiet_period: Duration,
        remote_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                store,
                remote,
                status,
                refresh,
                debounce,
                quiet_period,
                remote_timeout,
                slots: Mutex::new(HashMap::new()),
                quiet_timer: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Applies `edit` to the store and schedules its remote write.
    ///
    /// Unknown ids are reported here; nothing is scheduled for them.
    pub fn edit(&self, edit: FieldEdit) -> Result<()> {
        let edit = self.inner.store.read(|s| edit.resolved(s));
        self.inner.store.write(|s| edit.apply_local(s))?;
        self.inner.status.set_editing(true);
        self.inner.restart_quiet_timer();

        let key = edit.key();
        let mut slots = self.inner.lock_slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            latest: edit.clone(),
            dirty: false,
            timer: None,
            in_flight: false,
        });
        slot.latest = edit;
        slot.dirty = true;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.timer = Some(self.inner.start_debounce(key));
        self.inner.publish_pending(&slots);
        Ok(())
    }

    /// Whether any field has an unsent or unanswered write
    pub fn has_pending_writes(&self) -> bool {
        self.inner
            .lock_slots()
            .values()
            .any(|slot| slot.dirty || slot.in_flight)
    }

    /// Aborts every debounce and quiet timer. Unsent values are dropped;
    /// writes already on the wire are left to finish.
    pub fn cancel_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut slots = self.inner.lock_slots();
        for slot in slots.values_mut() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.dirty = false;
        }
        slots.retain(|_, slot| slot.in_flight);
        self.inner.publish_pending(&slots);
        drop(slots);

        if let Some(quiet) = self
            .inner
            .quiet_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            quiet.abort();
        }
        self.inner.status.set_editing(false);
    }
}

impl CoalescerInner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<EditKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_pending(&self, slots: &HashMap<EditKey, Slot>) {
        self.status
            .set_pending_edits(slots.values().filter(|slot| slot.dirty).count());
    }

    fn start_debounce(self: &Arc<Self>, key: EditKey) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.fire(&key, true);
        })
    }

    fn restart_quiet_timer(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            inner.status.set_editing(false);
            inner.refresh.request();
            log::debug!("[boardsync.coalescer] Quiet period elapsed");
        });
        let previous = self
            .quiet_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Hands the latest value of `key` to a write unless one is already out
    fn fire(self: &Arc<Self>, key: &EditKey, from_timer: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut slots = self.lock_slots();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        if from_timer {
            // The timer task is finishing; detach its handle.
            slot.timer = None;
        }
        if slot.in_flight || !slot.dirty {
            return;
        }
        slot.dirty = false;
        slot.in_flight = true;
        let call = slot.latest.clone().into_call();
        self.publish_pending(&slots);
        drop(slots);

        self.status.begin_remote_call();
        let inner = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            let result = inner.send(call.clone()).await;
            inner.finish(&key, &call, result);
        });
    }

    /// A write aimed at a just-created item waits for the create to settle
    async fn send(&self, call: RemoteCall) -> Result<Option<ItemId>> {
        let call = self.store.settle_call(call).await?;
        let fut = call.send(self.remote.as_ref());
        match self.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await?,
            None => fut.await,
        }
    }

    fn finish(
        self: &Arc<Self>,
        key: &EditKey,
        call: &RemoteCall,
        result: Result<Option<ItemId>>,
    ) {
        self.status.end_remote_call();
        match result {
            Ok(_) => log::debug!("[boardsync.coalescer] Saved {}", call.kind()),
            Err(err) => {
                // The local value stays; the next fetch brings the truth.
                log::warn!("[boardsync.coalescer] Remote refused {}: {}", call.kind(), err);
                self.status
                    .report_error(format!("Could not save {}: {}", call.kind(), err), err);
                self.refresh.request();
            }
        }

        let mut slots = self.lock_slots();
        let resend = match slots.get_mut(key) {
            Some(slot) => {
                slot.in_flight = false;
                // A newer value arrived mid-flight and its timer already fired.
                slot.dirty && slot.timer.is_none()
            }
            None => false,
        };
        let idle = slots.get(key).map_or(false, |slot| !slot.dirty && !slot.in_flight);
        if idle {
            slots.remove(key);
        }
        drop(slots);
        if resend {
            self.fire(key, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexPolicy;
    use crate::domain::{Board, BoardId, Column, ColumnId, ColumnKind, Group, Item};
    use crate::error::SyncError;
    use crate::remote::memory::MemoryRemote;
    use crate::sync::reconcile::{ReconciliationLoop, TickOutcome};

    fn board() -> Board {
        let mut board = Board::new(BoardId::new("b1"), "Content");
        board.columns.push(
            Column::new(ColumnId::new("c1"), "notes", "Notes", ColumnKind::Text).with_width(200),
        );
        let mut group = Group::new(GroupId::new("g1"), "Drafts", "#ccc");
        group.items.push(Item::new(ItemId::new("i1"), GroupId::new("g1"), "Intro"));
        board.groups.push(group);
        board
    }

    struct Fixture {
        coalescer: EditCoalescer,
        store: SharedStore,
        remote: Arc<MemoryRemote>,
        status: StatusHandle,
        refresh: RefreshTrigger,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new(board()));
        let store = SharedStore::new(BoardStateStore::new(board(), IndexPolicy::Clamp));
        let status = StatusHandle::new();
        let refresh = RefreshTrigger::new();
        let coalescer = EditCoalescer::new(
            store.clone(),
            remote.clone(),
            status.clone(),
            refresh.clone(),
            Duration::from_millis(300),
            Duration::from_millis(1500),
            Some(Duration::from_secs(15)),
        );
        Fixture {
            coalescer,
            store,
            remote,
            status,
            refresh,
        }
    }

    fn rename(name: &str) -> FieldEdit {
        FieldEdit::ItemName {
            item_id: ItemId::new("i1"),
            name: name.to_string(),
        }
    }

    fn sent_names(remote: &MemoryRemote) -> Vec<String> {
        remote
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::RenameItem { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn local_name(store: &SharedStore) -> String {
        store.snapshot().item(&ItemId::new("i1")).unwrap().name.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_single_write_with_last_value() {
        let f = fixture();
        for name in ["I", "In", "Int", "Intr", "Introduction"] {
            f.coalescer.edit(rename(name)).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(local_name(&f.store), "Introduction");
        assert!(f.remote.journal().is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(sent_names(&f.remote), vec!["Introduction"]);
        assert!(!f.coalescer.has_pending_writes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flight_is_sent_after() {
        let f = fixture();
        f.remote.set_latency(Some(Duration::from_secs(1)));

        f.coalescer.edit(rename("first")).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // The first write is on the wire now.
        f.coalescer.edit(rename("second")).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.status.in_flight(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(sent_names(&f.remote), vec!["first", "second"]);
        assert_eq!(f.remote.board().unwrap().groups[0].items[0].name, "second");
        assert_eq!(f.status.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let f = fixture();
        f.coalescer.edit(rename("Intro v2")).unwrap();
        f.coalescer
            .edit(FieldEdit::ItemValue {
                item_id: ItemId::new("i1"),
                column_key: "notes".into(),
                value: Some(ColumnValue::Text("needs review".into())),
            })
            .unwrap();
        f.coalescer
            .edit(FieldEdit::GroupTitle {
                group_id: GroupId::new("g1"),
                title: "Ready".into(),
            })
            .unwrap();
        assert_eq!(f.status.current().pending_edits, 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.remote.journal().len(), 3);
        assert_eq!(f.status.current().pending_edits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_keeps_local_value_and_requests_refresh() {
        let f = fixture();
        f.remote
            .fail_writes(Some(SyncError::RemoteRejected("name too long".into())));
        f.coalescer.edit(rename("rejected")).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(local_name(&f.store), "rejected");
        assert!(f.refresh.is_requested());
        assert!(f.status.current().last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_period_clears_editing_and_requests_tick() {
        let f = fixture();
        f.coalescer.edit(rename("x")).unwrap();
        assert!(f.status.is_editing());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(f.status.is_editing());
        assert!(!f.refresh.is_requested());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!f.status.is_editing());
        assert!(f.refresh.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_unsent_edits() {
        let f = fixture();
        f.coalescer.edit(rename("never sent")).unwrap();
        f.coalescer.cancel_all();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.remote.journal().is_empty());
        assert!(!f.status.is_editing());
        assert!(!f.refresh.is_requested());
    }

    #[tokio::test]
    async fn test_unknown_item_is_rejected_locally() {
        let f = fixture();
        let err = f
            .coalescer
            .edit(FieldEdit::ItemName {
                item_id: ItemId::new("ghost"),
                name: "boo".into(),
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::ItemNotFound(_)));
        assert!(!f.status.is_editing());
        assert!(!f.coalescer.has_pending_writes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_during_debounce_leaves_value_alone() {
        let f = fixture();
        // Another collaborator renamed the item remotely.
        f.remote
            .edit(|s| s.rename_item(&ItemId::new("i1"), "their name"))
            .unwrap()
            .unwrap();
        let reconcile = ReconciliationLoop::new(
            BoardId::new("b1"),
            f.store.clone(),
            f.remote.clone(),
            f.status.clone(),
            f.refresh.clone(),
            Duration::from_secs(5),
            None,
            &board(),
        );

        f.coalescer.edit(rename("my name")).unwrap();
        assert_eq!(reconcile.tick().await, TickOutcome::SkippedEditing);
        assert_eq!(local_name(&f.store), "my name");
        // Even a forced refresh waits for the pending write.
        assert_eq!(reconcile.force_tick().await, TickOutcome::SkippedInFlight);
        assert_eq!(local_name(&f.store), "my name");
    }
}
