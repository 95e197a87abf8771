//! Change notification: explicit listener registration with asynchronous
//! fan-out.
//!
//! Events are queued onto a dedicated dispatch thread so notification never
//! blocks the committing thread or the next writer waiting on the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

/// What kind of publication produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Commit,
    Undo,
    Redo,
}

/// A graph-changed notification.
#[derive(Debug, Clone)]
pub struct GraphEvent {
    pub kind: EventKind,
    /// Presentation name of the edit
    pub name: String,
    /// Commit/flush description
    pub description: String,
    /// Modification counter of the read copy after publication
    pub counter: u64,
}

/// Receives graph-changed notifications on the dispatch thread.
pub trait GraphListener: Send {
    fn graph_changed(&self, event: &GraphEvent);
}

/// Handle returned by [`ListenerHub::add_listener`]; pass to
/// `remove_listener` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ListenerList = Arc<Mutex<Vec<(u64, Box<dyn GraphListener>)>>>;

/// Listener registry plus the background dispatch thread.
pub(crate) struct ListenerHub {
    listeners: ListenerList,
    next_id: AtomicU64,
    tx: Mutex<Option<Sender<GraphEvent>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ListenerHub {
    pub fn new() -> Self {
        let listeners: ListenerList = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel::<GraphEvent>();

        let dispatch_list = Arc::clone(&listeners);
        let thread = thread::Builder::new()
            .name("duograph-events".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let listeners = dispatch_list.lock();
                    for (_, listener) in listeners.iter() {
                        listener.graph_changed(&event);
                    }
                }
            })
            .expect("failed to spawn event dispatch thread");

        Self {
            listeners,
            next_id: AtomicU64::new(1),
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn add_listener(&self, listener: Box<dyn GraphListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        ListenerId(id)
    }

    /// Returns true if the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    /// Queue an event for asynchronous delivery. A no-op after shutdown.
    pub fn dispatch(&self, event: GraphEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Stop the dispatch thread after draining queued events.
    pub fn shutdown(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ListenerHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
