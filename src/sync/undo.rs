use crate::sync::mutation::{Mutation, MutationKind};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Where a mutation came from; decides which stack its reversal lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Undo,
    Redo,
}

/// A compensating action for a confirmed mutation
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    /// Kind of the mutation this entry reverses
    pub kind: MutationKind,
    pub reversal: Mutation,
    pub recorded_at: DateTime<Utc>,
}

impl UndoEntry {
    pub fn new(kind: MutationKind, reversal: Mutation) -> Self {
        Self {
            kind,
            reversal,
            recorded_at: Utc::now(),
        }
    }
}

/// Bounded undo and redo stacks.
///
/// Holds data only; executing an entry is the coordinator's job so that an
/// undo travels the same optimistic pipeline as any other change.
#[derive(Debug)]
pub struct UndoManager {
    capacity: usize,
    undo: VecDeque<UndoEntry>,
    redo: VecDeque<UndoEntry>,
}

impl UndoManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push_bounded(stack: &mut VecDeque<UndoEntry>, capacity: usize, entry: UndoEntry) {
        if capacity == 0 {
            return;
        }
        while stack.len() >= capacity {
            stack.pop_front();
        }
        stack.push_back(entry);
    }

    /// Pushes onto the undo stack, evicting the oldest entry when full
    pub fn push(&mut self, entry: UndoEntry) {
        Self::push_bounded(&mut self.undo, self.capacity, entry);
    }

    /// Files the reversal of a confirmed mutation according to its origin.
    /// A fresh user change invalidates the redo history.
    pub fn record(&mut self, origin: Origin, entry: UndoEntry) {
        match origin {
            Origin::User => {
                self.redo.clear();
                self.push(entry);
            }
            Origin::Undo => Self::push_bounded(&mut self.redo, self.capacity, entry),
            Origin::Redo => self.push(entry),
        }
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo.pop_back()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Entries from oldest to newest
    pub fn entries(&self) -> impl Iterator<Item = &UndoEntry> {
        self.undo.iter()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
