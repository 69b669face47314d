//! Background reconciliation with the remote board.
//!
//! Polls on a fixed interval, one fetch at a time. A fetched snapshot
//! replaces the local board wholesale when its fingerprint differs from the
//! last one applied. Ticks are skipped while the user is editing or while
//! local writes are still on their way, and a snapshot is discarded if the
//! local board changed while it was being fetched.

use crate::domain::{Board, BoardId, ColumnId};
use crate::error::{Result, SyncError};
use crate::remote::RemoteBoard;
use crate::sync::fingerprint::{fingerprint, Fingerprint};
use crate::sync::status::StatusHandle;
use crate::sync::store::SharedStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
struct RefreshInner {
    notify: Notify,
    requested: AtomicBool,
}

/// Asks the reconciliation loop for one immediate, forced tick.
///
/// A forced tick ignores the quiet-period editing flag and compares the
/// snapshot with the local board itself, so it also repairs local state the
/// remote refused.
#[derive(Debug, Clone, Default)]
pub struct RefreshTrigger {
    inner: Arc<RefreshInner>,
}

impl RefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Keeps a request pending for a later tick without waking the loop
    fn defer(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.inner.requested.swap(false, Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.inner.notify.notified().await;
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The editing flag was up
    SkippedEditing,
    /// Coalesced edits or optimistic mutations had not settled
    SkippedInFlight,
    /// Another fetch was already outstanding
    Busy,
    Unchanged,
    /// The local board was replaced
    Applied { new_columns: Vec<ColumnId> },
    /// The local board changed during the fetch; the snapshot was dropped
    Discarded,
    /// Fetch or validation failed; retried on the next tick
    Failed(SyncError),
    /// The session was torn down
    Closed,
}

struct ReconcileInner {
    board_id: BoardId,
    store: SharedStore,
    remote: Arc<dyn RemoteBoard>,
    status: StatusHandle,
    refresh: RefreshTrigger,
    interval: Duration,
    fetch_timeout: Option<Duration>,
    last_applied: Mutex<Fingerprint>,
    known_columns: Mutex<HashSet<ColumnId>>,
    fetching: AtomicBool,
    closed: AtomicBool,
}

/// Periodic poller that keeps the local board in line with the remote
pub struct ReconciliationLoop {
    inner: Arc<ReconcileInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the single-flight flag however the fetch ends
struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReconciliationLoop {
    /// `initial` is the board the session opened with; its fingerprint is the
    /// first "last applied" value.
    pub fn new(
        board_id: BoardId,
        store: SharedStore,
        remote: Arc<dyn RemoteBoard>,
        status: StatusHandle,
        refresh: RefreshTrigger,
        interval: Duration,
        fetch_timeout: Option<Duration>,
        initial: &Board,
    ) -> Self {
        let known_columns = initial.column_ids().into_iter().collect();
        Self {
            inner: Arc::new(ReconcileInner {
                board_id,
                store,
                remote,
                status,
                refresh,
                interval,
                fetch_timeout,
                last_applied: Mutex::new(fingerprint(initial)),
                known_columns: Mutex::new(known_columns),
                fetching: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts the periodic task. Calling it again restarts the timer.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run().await });
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Runs one tick now, honoring a pending refresh request
    pub async fn tick(&self) -> TickOutcome {
        let forced = self.inner.refresh.take();
        self.inner.tick(forced).await
    }

    /// Runs one forced tick now
    pub async fn force_tick(&self) -> TickOutcome {
        self.inner.refresh.take();
        self.inner.tick(true).await
    }

    pub fn last_applied(&self) -> Fingerprint {
        self.inner
            .last_applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancels the timer and drops any poll still in progress
    pub fn stop(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.inner.status.set_syncing(false);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ReconciliationLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ReconcileInner {
    async fn run(self: Arc<Self>) {
        log::info!(
            "[boardsync.reconcile] Polling board {} every {}ms",
            self.board_id,
            self.interval.as_millis()
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the board was just fetched.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.refresh.notified() => {}
            }
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            let forced = self.refresh.take();
            let outcome = self.tick(forced).await;
            log::debug!("[boardsync.reconcile] Tick (forced: {}): {:?}", forced, outcome);
        }
    }

    fn gate_closed(&self, forced: bool) -> Option<TickOutcome> {
        let status = self.status.current();
        if status.editing && !forced {
            return Some(TickOutcome::SkippedEditing);
        }
        if status.pending_edits > 0 || status.in_flight > 0 {
            return Some(TickOutcome::SkippedInFlight);
        }
        None
    }

    async fn fetch(&self) -> Result<Board> {
        let fut = self.remote.fetch_board(&self.board_id);
        let board = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await??,
            None => fut.await?,
        };
        board.validate()?;
        Ok(board)
    }

    async fn tick(&self, forced: bool) -> TickOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return TickOutcome::Closed;
        }
        if let Some(skipped) = self.gate_closed(forced) {
            if forced {
                self.refresh.defer();
            }
            return skipped;
        }
        if self.fetching.swap(true, Ordering::SeqCst) {
            if forced {
                self.refresh.defer();
            }
            return TickOutcome::Busy;
        }
        let _guard = FetchGuard(&self.fetching);

        let revision = self.store.revision();
        self.status.set_syncing(true);
        let fetched = self.fetch().await;
        self.status.set_syncing(false);

        if self.closed.load(Ordering::SeqCst) {
            return TickOutcome::Closed;
        }

        let mut board = match fetched {
            Ok(board) => board,
            Err(err) => {
                log::debug!(
                    "[boardsync.reconcile] Fetch of board {} failed, retrying next tick: {}",
                    self.board_id,
                    err
                );
                return TickOutcome::Failed(err);
            }
        };

        let remote_fp = fingerprint(&board);
        let changed = {
            let last = self.last_applied.lock().unwrap_or_else(PoisonError::into_inner);
            *last != remote_fp
        };
        let new_columns = self.derive_defaults(&mut board);

        if !changed && !forced {
            return TickOutcome::Unchanged;
        }
        if !changed
            && forced
            && fingerprint(&board) == self.store.read(|s| fingerprint(s.board()))
        {
            return TickOutcome::Unchanged;
        }

        // Re-check: a local edit may have landed while the fetch was out.
        if self.store.revision() != revision || self.gate_closed(forced).is_some() {
            log::debug!(
                "[boardsync.reconcile] Discarding snapshot of {}; local board moved on",
                self.board_id
            );
            if forced {
                self.refresh.defer();
            }
            return TickOutcome::Discarded;
        }

        self.store.write(|s| s.replace_board(board));
        *self.last_applied.lock().unwrap_or_else(PoisonError::into_inner) = remote_fp.clone();
        {
            let mut known = self.known_columns.lock().unwrap_or_else(PoisonError::into_inner);
            known.extend(new_columns.iter().cloned());
        }
        log::info!(
            "[boardsync.reconcile] Applied remote snapshot {} for board {}",
            remote_fp,
            self.board_id
        );
        TickOutcome::Applied { new_columns }
    }

    /// Fills in local defaults the remote leaves unset and reports which
    /// columns have not been seen before.
    fn derive_defaults(&self, board: &mut Board) -> Vec<ColumnId> {
        let known = self.known_columns.lock().unwrap_or_else(PoisonError::into_inner);
        let mut new_columns = Vec::new();
        for column in &mut board.columns {
            if column.width == 0 {
                column.width = column.kind.default_width();
            }
            if !known.contains(&column.id) {
                new_columns.push(column.id.clone());
            }
        }
        new_columns
    }
}
