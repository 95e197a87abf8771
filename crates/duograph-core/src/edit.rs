//! Transaction edit log: forward/inverse operation records with undo/redo.
//!
//! Every mutation applied during a write transaction appends one record
//! holding the operation and its exact inverse. Undo replays inverses in
//! strict reverse order; redo replays forwards in application order. Nested
//! child transactions are frames over the same append-only log rather than
//! linked edit objects, so replay is an index-range walk.

use crate::store::{GraphStore, OperationMode};
use crate::value::{AttributeId, ElementKind, EdgeId, Value, VertexId};

/// One reversible store operation.
///
/// Ops carry the exact slot ids they touched so a replay on the twin store
/// reproduces identical arena layout.
#[derive(Debug, Clone)]
pub(crate) enum EditOp {
    AddVertex { vertex: VertexId },
    RemoveVertex { vertex: VertexId },
    AddEdge { edge: EdgeId, source: VertexId, target: VertexId },
    RemoveEdge { edge: EdgeId, source: VertexId, target: VertexId },
    AddAttribute { attribute: AttributeId, name: String, kind: ElementKind, key: bool },
    RemoveAttribute { attribute: AttributeId, name: String, kind: ElementKind, key: bool },
    SetValue { attribute: AttributeId, element: u32, value: Option<Value> },
}

/// A (possibly nested) transaction scope within an edit.
#[derive(Debug, Clone)]
pub(crate) struct EditFrame {
    /// Index of the enclosing frame; `None` only for frame 0 (the edit itself)
    pub parent: Option<usize>,
    pub name: String,
}

/// One recorded mutation and its inverse.
#[derive(Debug, Clone)]
pub(crate) struct EditRecord {
    /// Frame the mutation was applied under
    pub frame: usize,
    pub forward: EditOp,
    pub inverse: EditOp,
}

/// A top-level transaction: name, significance, source token, captured
/// starting counter, and the append-only record log.
///
/// State machine: `alive & executed` --undo--> `alive & !executed`
/// --redo--> `alive & executed`; `die()` is terminal from any state.
/// Undo/redo out of state is a programming error and panics.
#[derive(Debug)]
pub struct Edit {
    name: String,
    significant: bool,
    source: String,
    start_counter: u64,
    end_counter: u64,
    frames: Vec<EditFrame>,
    records: Vec<EditRecord>,
    open_frame: usize,
    alive: bool,
    executed: bool,
}

impl Edit {
    pub(crate) fn new(name: &str, significant: bool, source: &str, start_counter: u64) -> Self {
        Self {
            name: name.to_string(),
            significant,
            source: source.to_string(),
            start_counter,
            end_counter: start_counter,
            frames: vec![EditFrame { parent: None, name: name.to_string() }],
            records: Vec::new(),
            open_frame: 0,
            alive: true,
            executed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn significant(&self) -> bool {
        self.significant
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn start_counter(&self) -> u64 {
        self.start_counter
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }

    /// True iff the store counter moved since this edit began.
    pub(crate) fn has_changed(&self, current_counter: u64) -> bool {
        current_counter != self.start_counter
    }

    pub(crate) fn push_record(&mut self, forward: EditOp, inverse: EditOp) {
        self.records.push(EditRecord { frame: self.open_frame, forward, inverse });
    }

    /// Open a nested child frame. Returns (frame index, record mark) for the
    /// matching `close_child`/`rollback_from`.
    pub(crate) fn open_child(&mut self, name: &str) -> (usize, usize) {
        let frame = self.frames.len();
        self.frames.push(EditFrame { parent: Some(self.open_frame), name: name.to_string() });
        self.open_frame = frame;
        (frame, self.records.len())
    }

    /// Seal a child frame, folding its records into the enclosing scope.
    pub(crate) fn close_child(&mut self, frame: usize) {
        debug_assert_eq!(self.open_frame, frame, "child frames must close in LIFO order");
        self.open_frame = self.frames[frame].parent.unwrap_or(0);
    }

    /// Finalize after the last mutation; captures the closing counter.
    pub(crate) fn seal(&mut self, end_counter: u64) {
        self.end_counter = end_counter;
    }

    /// Counter distance covered by this edit's forward replay.
    pub(crate) fn counter_delta(&self) -> u64 {
        self.end_counter - self.start_counter
    }

    /// Absorb a later insignificant edit as a trailing child of this one.
    /// Its frames are re-rooted under frame 0 so replay order is preserved.
    pub(crate) fn absorb(&mut self, other: Edit) {
        let offset = self.frames.len();
        for frame in other.frames {
            let parent = match frame.parent {
                Some(p) => Some(p + offset),
                None => Some(0),
            };
            self.frames.push(EditFrame { parent, name: frame.name });
        }
        for record in other.records {
            self.records.push(EditRecord {
                frame: record.frame + offset,
                forward: record.forward,
                inverse: record.inverse,
            });
        }
        self.end_counter = other.end_counter;
    }

    /// Transition to the undone state. Replay happens separately so the
    /// state change is immediate while the swap protocol runs elsewhere.
    pub(crate) fn mark_undone(&mut self) {
        if !self.alive || !self.executed {
            panic!(
                "undo out of state for edit '{}': alive={}, executed={}",
                self.name, self.alive, self.executed
            );
        }
        self.executed = false;
    }

    /// Transition back to the executed state.
    pub(crate) fn mark_redone(&mut self) {
        if !self.alive || self.executed {
            panic!(
                "redo out of state for edit '{}': alive={}, executed={}",
                self.name, self.alive, self.executed
            );
        }
        self.executed = true;
    }

    /// Terminal transition; a dead edit can never be replayed again.
    pub(crate) fn die(&mut self) {
        self.alive = false;
    }

    /// Replay all inverse operations in strict reverse order.
    pub(crate) fn replay_inverse(&self, store: &mut GraphStore) {
        store.begin_replay(OperationMode::Undo);
        for record in self.records.iter().rev() {
            store.apply(&record.inverse);
        }
        store.end_replay();
    }

    /// Replay all forward operations in application order.
    pub(crate) fn replay_forward(&self, store: &mut GraphStore, mode: OperationMode) {
        store.begin_replay(mode);
        for record in self.records.iter() {
            store.apply(&record.forward);
        }
        store.end_replay();
    }

    /// Undo the records appended at or after `mark` and drop them.
    /// `mark == 0` rolls back the whole edit.
    pub(crate) fn rollback_from(&self, store: &mut GraphStore, mark: usize) {
        store.begin_replay(OperationMode::Undo);
        for record in self.records[mark..].iter().rev() {
            store.apply(&record.inverse);
        }
        store.end_replay();
    }

    /// Drop the records appended at or after `mark` (after `rollback_from`).
    pub(crate) fn truncate(&mut self, mark: usize) {
        self.records.truncate(mark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_edit() -> Edit {
        Edit::new("add things", true, "test", 10)
    }

    #[test]
    fn test_new_edit_is_executed() {
        let edit = sample_edit();
        assert!(edit.significant());
        assert_eq!(edit.name(), "add things");
        assert!(!edit.has_changed(10));
        assert!(edit.has_changed(11));
    }

    #[test]
    fn test_state_machine_round_trip() {
        let mut edit = sample_edit();
        edit.mark_undone();
        edit.mark_redone();
        edit.mark_undone();
    }

    #[test]
    #[should_panic(expected = "undo out of state")]
    fn test_double_undo_panics() {
        let mut edit = sample_edit();
        edit.mark_undone();
        edit.mark_undone();
    }

    #[test]
    #[should_panic(expected = "redo out of state")]
    fn test_redo_without_undo_panics() {
        let mut edit = sample_edit();
        edit.mark_redone();
    }

    #[test]
    #[should_panic(expected = "undo out of state")]
    fn test_dead_edit_cannot_undo() {
        let mut edit = sample_edit();
        edit.die();
        edit.mark_undone();
    }

    #[test]
    fn test_child_frames_nest_lifo() {
        let mut edit = sample_edit();
        let (f1, m1) = edit.open_child("inner");
        assert_eq!(f1, 1);
        assert_eq!(m1, 0);
        let (f2, _) = edit.open_child("deeper");
        edit.close_child(f2);
        edit.close_child(f1);
        edit.push_record(
            EditOp::AddVertex { vertex: VertexId(0) },
            EditOp::RemoveVertex { vertex: VertexId(0) },
        );
        assert_eq!(edit.records[0].frame, 0);
    }

    #[test]
    fn test_absorb_remaps_frames() {
        let mut parent = sample_edit();
        parent.push_record(
            EditOp::AddVertex { vertex: VertexId(0) },
            EditOp::RemoveVertex { vertex: VertexId(0) },
        );

        let mut child = Edit::new("tweak", false, "test", 12);
        child.push_record(
            EditOp::AddVertex { vertex: VertexId(1) },
            EditOp::RemoveVertex { vertex: VertexId(1) },
        );
        child.seal(13);

        parent.absorb(child);
        assert_eq!(parent.record_count(), 2);
        // The absorbed edit's root frame hangs off the parent's frame 0.
        assert_eq!(parent.frames[1].parent, Some(0));
        assert_eq!(parent.records[1].frame, 1);
        assert_eq!(parent.end_counter, 13);
    }
}
