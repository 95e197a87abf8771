//! The dual-copy lock coordinator — the heart of DuoGraph.
//!
//! The engine owns two identical [`GraphStore`] instances. At any instant one
//! is the "read" copy serving every reader; the other is the "write" copy
//! reserved for the single active transaction.
//!
//! **Read path**: shared read lock on the read copy; never blocked by a
//! writer mutating the other copy.
//! **Write path**: a global re-entrant gate serializes transactions; each
//! mutation records an inverse into the transaction's edit log.
//! **Publication**: on commit the recorded ops are replayed onto the read
//! copy under its structural write lock, then the role labels swap. In-flight
//! readers hold read locks that block the replay until they finish, and new
//! readers arriving after the swap see the fully replayed copy — no reader
//! ever observes a half-applied transaction.
//! **Undo/redo**: the same replay-both-copies-then-swap protocol, run on a
//! dedicated background thread so the calling (UI) thread returns at once.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};

use crate::config::EngineConfig;
use crate::edit::Edit;
use crate::error::{GraphError, GraphResult};
use crate::history::UndoHistory;
use crate::listener::{EventKind, GraphEvent, GraphListener, ListenerHub, ListenerId};
use crate::store::{GraphStore, OperationMode};
use crate::value::{AttributeId, EdgeId, ElementKind, Value, VertexId};

/// Result of committing a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Changes were published and entered into the undo history
    Committed,
    /// The transaction changed nothing and was rolled back instead
    Nothing,
    /// A nested transaction folded into its parent; nothing published yet
    Nested,
}

#[derive(Debug)]
struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
}

enum Wait {
    Block,
    Try,
    Timeout(Duration),
}

enum HistoryCmd {
    Undo,
    Redo,
}

struct EngineInner {
    contexts: [RwLock<GraphStore>; 2],
    /// Which context currently serves new readers
    read_index: AtomicUsize,
    gate: Mutex<GateState>,
    gate_cv: Condvar,
    /// Per-thread count of outstanding read handles
    read_holds: Mutex<HashMap<ThreadId, usize>>,
    history: Mutex<UndoHistory>,
    listeners: ListenerHub,
    event_thread: Mutex<Option<ThreadId>>,
}

impl EngineInner {
    fn read_idx(&self) -> usize {
        self.read_index.load(Ordering::Acquire)
    }

    fn write_idx(&self) -> usize {
        1 - self.read_idx()
    }

    fn swap_roles(&self) {
        let ri = self.read_idx();
        self.read_index.store(1 - ri, Ordering::Release);
    }

    fn owns_gate(&self, me: ThreadId) -> bool {
        self.gate.lock().owner == Some(me)
    }

    fn read_hold_count(&self, me: ThreadId) -> usize {
        self.read_holds.lock().get(&me).copied().unwrap_or(0)
    }

    fn inc_read_hold(&self, me: ThreadId) {
        *self.read_holds.lock().entry(me).or_insert(0) += 1;
    }

    fn dec_read_hold(&self, me: ThreadId) {
        let mut holds = self.read_holds.lock();
        let count = holds.get_mut(&me).expect("read hold released twice");
        *count -= 1;
        if *count == 0 {
            holds.remove(&me);
        }
    }

    /// Acquire or re-enter the global write gate. `Ok(None)` means a
    /// non-blocking attempt found it busy.
    fn gate_enter(&self, wait: Wait) -> GraphResult<Option<usize>> {
        let me = thread::current().id();
        let mut state = self.gate.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return Ok(Some(state.depth));
        }
        match wait {
            Wait::Block => {
                while state.owner.is_some() {
                    self.gate_cv.wait(&mut state);
                }
            }
            Wait::Try => {
                if state.owner.is_some() {
                    return Ok(None);
                }
            }
            Wait::Timeout(dur) => {
                let deadline = Instant::now() + dur;
                while state.owner.is_some() {
                    if self.gate_cv.wait_until(&mut state, deadline).timed_out() {
                        return Err(GraphError::WaitTimeout { waited: dur });
                    }
                }
            }
        }
        state.owner = Some(me);
        state.depth = 1;
        Ok(Some(1))
    }

    fn gate_exit(&self) {
        let mut state = self.gate.lock();
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.gate_cv.notify_one();
        }
    }

    /// Replay the edit onto the current read copy under its structural
    /// write lock, then swap the role labels. The gate must be held.
    fn publish(&self, edit: &Edit, mode: OperationMode) {
        let ri = self.read_idx();
        {
            let mut other = self.contexts[ri].write();
            match mode {
                OperationMode::Undo => edit.replay_inverse(&mut other),
                mode => edit.replay_forward(&mut other, mode),
            }
            debug_assert!(other.validate_keys().is_ok(), "publication broke key uniqueness");
        }
        self.swap_roles();
    }

    /// Undo/redo body: replay on the write copy, publish onto the read
    /// copy, notify. The gate must be held.
    fn run_history_replay(&self, index: usize, kind: EventKind) {
        let history = self.history.lock();
        let edit = history.edit(index);

        let wi = self.write_idx();
        {
            let mut store = self.contexts[wi].write();
            match kind {
                EventKind::Undo => edit.replay_inverse(&mut store),
                _ => edit.replay_forward(&mut store, OperationMode::Redo),
            }
        }
        let mode = if kind == EventKind::Undo { OperationMode::Undo } else { OperationMode::Redo };
        self.publish(edit, mode);

        let counter = self.contexts[self.read_idx()].read().modification_counter();
        let name = edit.name().to_string();
        drop(history);

        self.listeners.dispatch(GraphEvent {
            kind,
            description: name.clone(),
            name,
            counter,
        });
    }
}

fn history_worker(inner: Arc<EngineInner>, rx: Receiver<HistoryCmd>) {
    while let Ok(cmd) = rx.recv() {
        inner
            .gate_enter(Wait::Block)
            .expect("blocking gate acquisition cannot time out");
        // The cursor only moves under the gate: a commit that raced the
        // queued command has already restructured the history by now, and
        // the step below targets whatever stands at the cursor.
        match cmd {
            HistoryCmd::Undo => {
                let index = {
                    let mut history = inner.history.lock();
                    history.can_undo().then(|| history.step_back())
                };
                match index {
                    Some(index) => inner.run_history_replay(index, EventKind::Undo),
                    None => eprintln!("[DuoGraph] undo overtaken by a concurrent commit"),
                }
            }
            HistoryCmd::Redo => {
                let index = {
                    let mut history = inner.history.lock();
                    history.can_redo().then(|| history.step_forward())
                };
                match index {
                    Some(index) => inner.run_history_replay(index, EventKind::Redo),
                    None => eprintln!("[DuoGraph] redo overtaken by a concurrent commit"),
                }
            }
        }
        inner.gate_exit();
    }
}

/// The dual-copy concurrent graph engine.
///
/// All public methods take `&self`; share it across threads with `Arc`.
pub struct DualGraphEngine {
    inner: Arc<EngineInner>,
    history_tx: Mutex<Option<Sender<HistoryCmd>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DualGraphEngine {
    /// Create an engine with two empty, identical store copies.
    pub fn new(config: EngineConfig) -> Self {
        if let Err(msg) = config.validate() {
            panic!("invalid engine config: {}", msg);
        }

        let inner = Arc::new(EngineInner {
            contexts: [
                RwLock::new(GraphStore::fresh(config.initial_capacity)),
                RwLock::new(GraphStore::fresh(config.initial_capacity)),
            ],
            read_index: AtomicUsize::new(0),
            gate: Mutex::new(GateState { owner: None, depth: 0 }),
            gate_cv: Condvar::new(),
            read_holds: Mutex::new(HashMap::new()),
            history: Mutex::new(UndoHistory::new(config.history_limit)),
            listeners: ListenerHub::new(),
            event_thread: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel();
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("duograph-history".to_string())
            .spawn(move || history_worker(worker_inner, rx))
            .expect("failed to spawn history worker thread");

        Self {
            inner,
            history_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Mark the calling thread as the host's event-dispatch thread.
    /// Requesting a write transaction from it becomes a fatal error, since
    /// that could deadlock against read work dispatched onto the same thread.
    pub fn register_event_thread(&self) {
        *self.inner.event_thread.lock() = Some(thread::current().id());
    }

    // -----------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------

    /// Acquire a read handle on a stable store copy.
    ///
    /// The observed data cannot change until the handle is dropped. A thread
    /// may hold several read handles at once; a thread inside a write
    /// transaction reads the write copy and so sees its own uncommitted
    /// changes.
    pub fn read(&self) -> ReadGuard<'_> {
        let me = thread::current().id();
        let inner: &EngineInner = &self.inner;

        // Recursive read locks: a nested handle must not queue behind a
        // publication that is itself waiting for this thread's first handle.
        let guard = if inner.owns_gate(me) {
            inner.contexts[inner.write_idx()].read_recursive()
        } else {
            loop {
                let ri = inner.read_idx();
                let guard = inner.contexts[ri].read_recursive();
                if inner.read_idx() == ri {
                    break guard;
                }
                // A role swap raced the acquisition; take the new read copy.
            }
        };

        inner.inc_read_hold(me);
        ReadGuard { inner, guard }
    }

    // -----------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------

    /// Begin a write transaction, blocking until the global write lock is
    /// free. Re-entrant: a thread already writing gets a nested transaction
    /// that folds into its parent on commit.
    ///
    /// Panics if the calling thread holds a read handle or is the
    /// registered event thread — both are caller bugs.
    pub fn write(&self, name: &str, significant: bool, source: &str) -> WriteGuard<'_> {
        self.write_with(name, significant, source, Wait::Block)
            .expect("blocking acquisition cannot time out")
            .expect("blocking acquisition cannot be refused")
    }

    /// Non-blocking variant; returns `None` if another thread is writing.
    pub fn try_write(&self, name: &str, significant: bool, source: &str) -> Option<WriteGuard<'_>> {
        self.write_with(name, significant, source, Wait::Try)
            .expect("non-blocking acquisition cannot time out")
    }

    /// Bounded-wait variant; `GraphError::WaitTimeout` cancels the acquire
    /// only — no transaction was started.
    pub fn write_timeout(
        &self,
        name: &str,
        significant: bool,
        source: &str,
        timeout: Duration,
    ) -> GraphResult<WriteGuard<'_>> {
        Ok(self
            .write_with(name, significant, source, Wait::Timeout(timeout))?
            .expect("timed acquisition cannot be refused"))
    }

    fn write_with(
        &self,
        name: &str,
        significant: bool,
        source: &str,
        wait: Wait,
    ) -> GraphResult<Option<WriteGuard<'_>>> {
        let me = thread::current().id();
        if *self.inner.event_thread.lock() == Some(me) {
            panic!("write transaction requested from the registered event thread");
        }
        if self.inner.read_hold_count(me) > 0 {
            panic!("write transaction requested while holding a read handle");
        }

        let depth = match self.inner.gate_enter(wait)? {
            Some(depth) => depth,
            None => return Ok(None),
        };
        let nested = depth > 1;

        let wi = self.inner.write_idx();
        let (frame, mark) = {
            let mut store = self.inner.contexts[wi].write();
            if nested {
                store
                    .edit
                    .as_mut()
                    .expect("nested write transaction without an open edit")
                    .open_child(name)
            } else {
                debug_assert!(store.edit.is_none(), "stale edit on the write copy");
                let counter = store.modification_counter();
                store.edit = Some(Edit::new(name, significant, source, counter));
                (0, 0)
            }
        };

        Ok(Some(WriteGuard { engine: self, nested, frame, mark, finished: false }))
    }

    // -----------------------------------------------------------------
    // Undo / redo
    // -----------------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.inner.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.history.lock().can_redo()
    }

    /// Presentation name of the next undoable edit, for host menu wiring.
    pub fn undo_name(&self) -> Option<String> {
        self.inner.history.lock().undo_name().map(str::to_string)
    }

    pub fn redo_name(&self) -> Option<String> {
        self.inner.history.lock().redo_name().map(str::to_string)
    }

    /// Undo the most recent edit. The store replay and role swap run on the
    /// history worker thread, so this returns without blocking; the cursor
    /// moves when the worker holds the write gate. Panics if nothing is
    /// undoable at the time of the call.
    pub fn undo(&self) {
        if !self.inner.history.lock().can_undo() {
            panic!("undo requested with nothing to undo");
        }
        self.send_history(HistoryCmd::Undo);
    }

    /// Redo the most recently undone edit; asynchronous like [`undo`].
    ///
    /// [`undo`]: DualGraphEngine::undo
    pub fn redo(&self) {
        if !self.inner.history.lock().can_redo() {
            panic!("redo requested with nothing to redo");
        }
        self.send_history(HistoryCmd::Redo);
    }

    /// Synchronous undo: replay completes before returning. Must not be
    /// called from inside a write transaction or while holding a read
    /// handle — the replay needs both structural write locks.
    pub fn undo_blocking(&self) {
        self.assert_outside_transaction("undo");
        if self.inner.read_hold_count(thread::current().id()) > 0 {
            panic!("undo requested while holding a read handle");
        }
        self.inner
            .gate_enter(Wait::Block)
            .expect("blocking gate acquisition cannot time out");
        let index = self.inner.history.lock().step_back();
        self.inner.run_history_replay(index, EventKind::Undo);
        self.inner.gate_exit();
    }

    /// Synchronous redo; counterpart of [`undo_blocking`].
    ///
    /// [`undo_blocking`]: DualGraphEngine::undo_blocking
    pub fn redo_blocking(&self) {
        self.assert_outside_transaction("redo");
        if self.inner.read_hold_count(thread::current().id()) > 0 {
            panic!("redo requested while holding a read handle");
        }
        self.inner
            .gate_enter(Wait::Block)
            .expect("blocking gate acquisition cannot time out");
        let index = self.inner.history.lock().step_forward();
        self.inner.run_history_replay(index, EventKind::Redo);
        self.inner.gate_exit();
    }

    fn assert_outside_transaction(&self, what: &str) {
        if self.inner.owns_gate(thread::current().id()) {
            panic!("{} requested from inside a write transaction", what);
        }
    }

    fn send_history(&self, cmd: HistoryCmd) {
        self.history_tx
            .lock()
            .as_ref()
            .expect("engine is shutting down")
            .send(cmd)
            .expect("history worker thread is gone");
    }

    // -----------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------

    pub fn add_listener(&self, listener: Box<dyn GraphListener>) -> ListenerId {
        self.inner.listeners.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove_listener(id)
    }
}

impl Drop for DualGraphEngine {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop after queued replays.
        let tx = self.history_tx.lock().take();
        drop(tx);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.inner.listeners.shutdown();
    }
}

// ---------------------------------------------------------------------
// Read handle
// ---------------------------------------------------------------------

/// Scoped read access to a stable store copy. Released on drop.
pub struct ReadGuard<'a> {
    inner: &'a EngineInner,
    guard: RwLockReadGuard<'a, GraphStore>,
}

impl Deref for ReadGuard<'_> {
    type Target = GraphStore;

    fn deref(&self) -> &GraphStore {
        &self.guard
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.inner.dec_read_hold(thread::current().id());
    }
}

// ---------------------------------------------------------------------
// Write handle
// ---------------------------------------------------------------------

/// Exclusive write access to the write copy. Commit, flush or roll back;
/// dropping an unfinished guard rolls back.
pub struct WriteGuard<'a> {
    engine: &'a DualGraphEngine,
    nested: bool,
    /// Frame opened for this guard (0 for the outermost)
    frame: usize,
    /// Record count at open, for nested rollback
    mark: usize,
    finished: bool,
}

impl<'a> WriteGuard<'a> {
    fn inner(&self) -> &'a EngineInner {
        &self.engine.inner
    }

    /// Lock-discipline guard: mutating or publishing while the same thread
    /// holds a read handle would deadlock on the store lock, so it is a
    /// fatal usage error.
    fn check_discipline(&self, what: &str) {
        let me = thread::current().id();
        if self.inner().read_hold_count(me) > 0 {
            panic!("{} while holding a read handle", what);
        }
    }

    fn with_store<R>(&self, what: &str, f: impl FnOnce(&mut GraphStore) -> R) -> R {
        self.check_discipline(what);
        let wi = self.inner().write_idx();
        let mut store = self.inner().contexts[wi].write();
        f(&mut store)
    }

    // Mutations — each locks the write copy for just that operation, so the
    // writing thread can interleave its own reads between mutations.

    pub fn add_vertex(&mut self) -> VertexId {
        self.with_store("mutating", |s| s.add_vertex())
    }

    pub fn remove_vertex(&mut self, v: VertexId) -> GraphResult<()> {
        self.with_store("mutating", |s| s.remove_vertex(v))
    }

    pub fn add_edge(&mut self, source: VertexId, target: VertexId) -> GraphResult<EdgeId> {
        self.with_store("mutating", |s| s.add_edge(source, target))
    }

    pub fn remove_edge(&mut self, e: EdgeId) -> GraphResult<()> {
        self.with_store("mutating", |s| s.remove_edge(e))
    }

    pub fn add_attribute(
        &mut self,
        name: &str,
        kind: ElementKind,
        key: bool,
    ) -> GraphResult<AttributeId> {
        self.with_store("mutating", |s| s.add_attribute(name, kind, key))
    }

    pub fn remove_attribute(&mut self, a: AttributeId) -> GraphResult<()> {
        self.with_store("mutating", |s| s.remove_attribute(a))
    }

    pub fn set_vertex_value(
        &mut self,
        a: AttributeId,
        v: VertexId,
        value: Option<Value>,
    ) -> GraphResult<()> {
        self.with_store("mutating", |s| s.set_vertex_value(a, v, value))
    }

    pub fn set_edge_value(
        &mut self,
        a: AttributeId,
        e: EdgeId,
        value: Option<Value>,
    ) -> GraphResult<()> {
        self.with_store("mutating", |s| s.set_edge_value(a, e, value))
    }

    // Convenience reads over the uncommitted write copy. For larger reads,
    // acquire a read handle — a writing thread gets its own copy.

    pub fn vertex_count(&self) -> usize {
        let wi = self.inner().write_idx();
        self.inner().contexts[wi].read().vertex_count()
    }

    pub fn edge_count(&self) -> usize {
        let wi = self.inner().write_idx();
        self.inner().contexts[wi].read().edge_count()
    }

    pub fn modification_counter(&self) -> u64 {
        let wi = self.inner().write_idx();
        self.inner().contexts[wi].read().modification_counter()
    }

    pub fn attribute_by_name(&self, kind: ElementKind, name: &str) -> Option<AttributeId> {
        let wi = self.inner().write_idx();
        self.inner().contexts[wi].read().attribute_by_name(kind, name)
    }

    /// Commit the transaction.
    ///
    /// Validates key uniqueness first — a violation rolls the transaction
    /// back **before** the error propagates, leaving the store consistent.
    /// A transaction that changed nothing rolls back instead of publishing.
    pub fn commit(mut self, description: &str) -> GraphResult<CommitOutcome> {
        self.check_discipline("committing");
        self.finished = true;
        let inner = self.inner();

        if self.nested {
            let wi = inner.write_idx();
            {
                let mut store = inner.contexts[wi].write();
                store
                    .edit
                    .as_mut()
                    .expect("nested commit without an open edit")
                    .close_child(self.frame);
            }
            inner.gate_exit();
            return Ok(CommitOutcome::Nested);
        }

        let wi = inner.write_idx();
        let edit = {
            let mut store = inner.contexts[wi].write();

            if let Err(err) = store.validate_keys() {
                let edit = store.edit.take().expect("commit without an open edit");
                edit.rollback_from(&mut store, 0);
                drop(store);
                inner.gate_exit();
                return Err(err);
            }

            let counter = store.modification_counter();
            let changed = store
                .edit
                .as_ref()
                .expect("commit without an open edit")
                .has_changed(counter);
            if !changed {
                store.edit = None;
                drop(store);
                inner.gate_exit();
                return Ok(CommitOutcome::Nothing);
            }

            let mut edit = store.edit.take().expect("commit without an open edit");
            edit.seal(counter);
            edit
        };

        inner.publish(&edit, OperationMode::Execute);
        let counter = inner.contexts[inner.read_idx()].read().modification_counter();
        let name = edit.name().to_string();
        inner.history.lock().push(edit);
        inner.gate_exit();

        inner.listeners.dispatch(GraphEvent {
            kind: EventKind::Commit,
            name,
            description: description.to_string(),
            counter,
        });
        Ok(CommitOutcome::Committed)
    }

    /// Publish the changes so far but keep the write session open under a
    /// fresh edit — an externally visible sync point inside a multi-step
    /// operation. Only valid on the outermost transaction.
    pub fn flush(&mut self, description: &str) -> GraphResult<CommitOutcome> {
        if self.nested {
            panic!("flush requested from a nested write transaction");
        }
        self.check_discipline("flushing");
        let inner = self.inner();

        let wi = inner.write_idx();
        let edit = {
            let mut store = inner.contexts[wi].write();
            let (name, significant, source) = {
                let edit = store.edit.as_ref().expect("flush without an open edit");
                (edit.name().to_string(), edit.significant(), edit.source().to_string())
            };

            if let Err(err) = store.validate_keys() {
                let edit = store.edit.take().expect("flush without an open edit");
                edit.rollback_from(&mut store, 0);
                let counter = store.modification_counter();
                store.edit = Some(Edit::new(&name, significant, &source, counter));
                return Err(err);
            }

            let counter = store.modification_counter();
            if !store.edit.as_ref().expect("flush without an open edit").has_changed(counter) {
                return Ok(CommitOutcome::Nothing);
            }

            let mut edit = store.edit.take().expect("flush without an open edit");
            edit.seal(counter);
            // Re-open immediately after publication, below.
            drop(store);
            inner.publish(&edit, OperationMode::Execute);

            let nwi = inner.write_idx();
            let mut next = inner.contexts[nwi].write();
            let counter = next.modification_counter();
            next.edit = Some(Edit::new(&name, significant, &source, counter));
            edit
        };

        let counter = inner.contexts[inner.read_idx()].read().modification_counter();
        let name = edit.name().to_string();
        inner.history.lock().push(edit);

        inner.listeners.dispatch(GraphEvent {
            kind: EventKind::Commit,
            name,
            description: description.to_string(),
            counter,
        });
        Ok(CommitOutcome::Committed)
    }

    /// Abandon the transaction, replaying every inverse record.
    pub fn rollback(mut self) {
        self.finished = true;
        self.do_rollback();
    }

    fn do_rollback(&mut self) {
        self.check_discipline("rolling back");
        let inner = self.inner();
        let wi = inner.write_idx();
        {
            let mut store = inner.contexts[wi].write();
            if self.nested {
                let mut edit = store.edit.take().expect("rollback without an open edit");
                edit.rollback_from(&mut store, self.mark);
                edit.truncate(self.mark);
                edit.close_child(self.frame);
                store.edit = Some(edit);
            } else {
                let edit = store.edit.take().expect("rollback without an open edit");
                edit.rollback_from(&mut store, 0);
            }
        }
        inner.gate_exit();
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Unwinding from a lock-discipline panic with a read handle still
        // held: rolling back would deadlock on the store lock, and a second
        // panic would abort without a message. Leave the transaction behind.
        if thread::panicking()
            && self.inner().read_hold_count(thread::current().id()) > 0
        {
            eprintln!("[DuoGraph] write transaction abandoned during panic unwind");
            return;
        }
        self.do_rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DualGraphEngine {
        DualGraphEngine::new(EngineConfig::default())
    }

    #[test]
    fn test_empty_engine() {
        let engine = engine();
        let read = engine.read();
        assert_eq!(read.vertex_count(), 0);
        assert_eq!(read.modification_counter(), 0);
        assert!(!engine.can_undo());
        assert!(!engine.can_redo());
    }

    #[test]
    fn test_commit_publishes() {
        let engine = engine();
        let mut tx = engine.write("add vertices", true, "test");
        let a = tx.add_vertex();
        let b = tx.add_vertex();
        tx.add_edge(a, b).unwrap();
        assert_eq!(tx.commit("initial content").unwrap(), CommitOutcome::Committed);

        let read = engine.read();
        assert_eq!(read.vertex_count(), 2);
        assert_eq!(read.edge_count(), 1);
        assert_eq!(read.modification_counter(), 3);
    }

    #[test]
    fn test_both_copies_converge() {
        let engine = engine();
        for round in 0..3 {
            let mut tx = engine.write("add", true, "test");
            tx.add_vertex();
            tx.commit("round").unwrap();
            let read = engine.read();
            assert_eq!(read.vertex_count(), round + 1);
        }
    }

    #[test]
    fn test_writer_sees_own_changes() {
        let engine = engine();
        let mut tx = engine.write("add", true, "test");
        tx.add_vertex();
        assert_eq!(tx.vertex_count(), 1);
        {
            let read = engine.read();
            assert_eq!(read.vertex_count(), 1, "writer reads the write copy");
        }
        tx.commit("done").unwrap();
    }

    #[test]
    fn test_noop_commit_is_rollback() {
        let engine = engine();
        let tx = engine.write("nothing", true, "test");
        assert_eq!(tx.commit("no-op").unwrap(), CommitOutcome::Nothing);
        assert!(!engine.can_undo(), "no-op commit leaves no history entry");
        assert_eq!(engine.read().modification_counter(), 0);
    }

    #[test]
    fn test_rollback_restores_state() {
        let engine = engine();
        let mut tx = engine.write("seed", true, "test");
        let v = tx.add_vertex();
        tx.commit("seed").unwrap();

        let mut tx = engine.write("doomed", true, "test");
        let w = tx.add_vertex();
        tx.add_edge(v, w).unwrap();
        tx.rollback();

        let read = engine.read();
        assert_eq!(read.vertex_count(), 1);
        assert_eq!(read.edge_count(), 0);
    }

    #[test]
    fn test_dropped_guard_rolls_back() {
        let engine = engine();
        {
            let mut tx = engine.write("dropped", true, "test");
            tx.add_vertex();
        }
        assert_eq!(engine.read().vertex_count(), 0);
    }

    #[test]
    fn test_duplicate_key_commit_rolls_back_first() {
        let engine = engine();
        let mut tx = engine.write("schema", true, "test");
        let name = tx.add_attribute("name", ElementKind::Vertex, true).unwrap();
        let a = tx.add_vertex();
        tx.set_vertex_value(name, a, Some(Value::Text("n".into()))).unwrap();
        tx.commit("schema").unwrap();

        let mut tx = engine.write("collide", true, "test");
        let b = tx.add_vertex();
        tx.set_vertex_value(name, b, Some(Value::Text("n".into()))).unwrap();
        let err = tx.commit("collide").unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey { .. }));

        // Store is consistent again: one vertex, no duplicate.
        let read = engine.read();
        assert_eq!(read.vertex_count(), 1);
        assert!(read.validate_keys().is_ok());
        drop(read);
        // And the engine accepts new work.
        let mut tx = engine.write("retry", true, "test");
        let c = tx.add_vertex();
        tx.set_vertex_value(name, c, Some(Value::Text("other".into()))).unwrap();
        tx.commit("retry").unwrap();
        assert_eq!(engine.read().vertex_count(), 2);
    }

    #[test]
    fn test_nested_edits_fold_into_parent() {
        let engine = engine();
        let mut tx = engine.write("outer", true, "test");
        tx.add_vertex();
        {
            let mut child = engine.write("inner", false, "test");
            child.add_vertex();
            child.commit("inner done").unwrap();
        }
        tx.add_vertex();
        tx.commit("outer done").unwrap();

        assert_eq!(engine.read().vertex_count(), 3);
        engine.undo_blocking();
        assert_eq!(
            engine.read().vertex_count(),
            0,
            "parent and nested child undo as one step"
        );
    }

    #[test]
    fn test_nested_rollback_keeps_parent_changes() {
        let engine = engine();
        let mut tx = engine.write("outer", true, "test");
        tx.add_vertex();
        {
            let mut child = engine.write("inner", false, "test");
            child.add_vertex();
            child.rollback();
        }
        tx.commit("outer done").unwrap();
        assert_eq!(engine.read().vertex_count(), 1);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let engine = engine();
        let mut tx = engine.write("seed", true, "test");
        let name = tx.add_attribute("label", ElementKind::Vertex, false).unwrap();
        let v = tx.add_vertex();
        tx.set_vertex_value(name, v, Some(Value::Integer(1))).unwrap();
        tx.commit("seed").unwrap();
        let base_counter = engine.read().modification_counter();

        let mut tx = engine.write("bump", true, "test");
        tx.set_vertex_value(name, v, Some(Value::Integer(2))).unwrap();
        tx.commit("bump").unwrap();
        let committed_counter = engine.read().modification_counter();
        let delta = committed_counter - base_counter;

        engine.undo_blocking();
        let after_undo = {
            let read = engine.read();
            assert_eq!(read.vertex_value(name, v).unwrap(), Some(&Value::Integer(1)));
            read.modification_counter()
        };
        assert!(engine.can_redo());

        engine.redo_blocking();
        let read = engine.read();
        assert_eq!(read.vertex_value(name, v).unwrap(), Some(&Value::Integer(2)));
        // Redo covers the same counter distance as the original commit.
        assert_eq!(read.modification_counter() - after_undo, delta);
    }

    #[test]
    fn test_undo_names() {
        let engine = engine();
        let mut tx = engine.write("add one vertex", true, "test");
        tx.add_vertex();
        tx.commit("done").unwrap();

        assert_eq!(engine.undo_name().as_deref(), Some("add one vertex"));
        engine.undo_blocking();
        assert_eq!(engine.undo_name(), None);
        assert_eq!(engine.redo_name().as_deref(), Some("add one vertex"));
    }

    #[test]
    fn test_async_undo_applies() {
        let engine = engine();
        let mut tx = engine.write("add", true, "test");
        tx.add_vertex();
        tx.commit("done").unwrap();

        engine.undo();
        // The worker replays in the background; wait for it to land.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if engine.read().vertex_count() == 0 {
                break;
            }
            assert!(Instant::now() < deadline, "async undo never applied");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_flush_keeps_session_open() {
        let engine = engine();
        let mut tx = engine.write("staged", true, "test");
        tx.add_vertex();
        assert_eq!(tx.flush("first stage").unwrap(), CommitOutcome::Committed);

        // Published: the writer's own view and the stable read copy agree.
        assert_eq!(tx.vertex_count(), 1);

        // Session still writable.
        tx.add_vertex();
        tx.commit("second stage").unwrap();
        assert_eq!(engine.read().vertex_count(), 2);
    }

    #[test]
    fn test_try_write_refused_while_locked() {
        let engine = DualGraphEngine::new(EngineConfig::default());
        let engine = Arc::new(engine);

        let tx = engine.write("held", true, "test");
        let other = Arc::clone(&engine);
        let refused = thread::spawn(move || other.try_write("contender", true, "test").is_none())
            .join()
            .unwrap();
        assert!(refused);
        drop(tx);

        assert!(engine.try_write("now free", true, "test").is_some());
    }

    #[test]
    fn test_write_timeout_expires() {
        let engine = Arc::new(DualGraphEngine::new(EngineConfig::default()));
        let tx = engine.write("held", true, "test");

        let other = Arc::clone(&engine);
        let result = thread::spawn(move || {
            other
                .write_timeout("waiter", true, "test", Duration::from_millis(50))
                .err()
        })
        .join()
        .unwrap();
        assert!(matches!(result, Some(GraphError::WaitTimeout { .. })));
        drop(tx);
    }

    #[test]
    #[should_panic(expected = "while holding a read handle")]
    fn test_write_while_reading_panics() {
        let engine = engine();
        let _read = engine.read();
        let _tx = engine.write("illegal", true, "test");
    }

    #[test]
    #[should_panic(expected = "registered event thread")]
    fn test_event_thread_write_panics() {
        let engine = engine();
        engine.register_event_thread();
        let _tx = engine.write("illegal", true, "test");
    }

    #[test]
    #[should_panic(expected = "nothing to undo")]
    fn test_undo_without_history_panics() {
        let engine = engine();
        engine.undo_blocking();
    }

    #[test]
    fn test_commit_event_reaches_listener() {
        use std::sync::atomic::AtomicUsize;

        struct Remember {
            commits: Arc<AtomicUsize>,
        }
        impl GraphListener for Remember {
            fn graph_changed(&self, event: &GraphEvent) {
                if event.kind == EventKind::Commit {
                    self.commits.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let engine = engine();
        let commits = Arc::new(AtomicUsize::new(0));
        engine.add_listener(Box::new(Remember { commits: Arc::clone(&commits) }));

        let mut tx = engine.write("add", true, "test");
        tx.add_vertex();
        tx.commit("done").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while commits.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "commit event never dispatched");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
