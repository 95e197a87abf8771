//! Cross-thread engine scenarios: mutual exclusion, read stability,
//! commit visibility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use duograph_core::{DualGraphEngine, ElementKind, EngineConfig, Value};

fn engine() -> Arc<DualGraphEngine> {
    Arc::new(DualGraphEngine::new(EngineConfig::default()))
}

#[test]
fn test_at_most_one_writer() {
    let engine = engine();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                let mut tx = engine.write("contend", true, "test");
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tx.add_vertex();
                active.fetch_sub(1, Ordering::SeqCst);
                tx.commit("one").unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1, "write transactions must serialize");
    assert_eq!(engine.read().vertex_count(), 8 * 20);
}

#[test]
fn test_read_stability_across_commit() {
    let engine = engine();
    let mut tx = engine.write("seed", true, "test");
    tx.add_vertex();
    tx.commit("seed").unwrap();

    let read = engine.read();
    let observed = read.vertex_count();
    let counter = read.modification_counter();

    let (started_tx, started_rx) = mpsc::channel();
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut tx = engine.write("grow", true, "test");
            tx.add_vertex();
            tx.add_vertex();
            started_tx.send(()).unwrap();
            // Publication blocks until the outstanding reader releases.
            tx.commit("grow").unwrap();
        })
    };

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));

    // The handle's view is frozen even though a commit is in flight.
    assert_eq!(read.vertex_count(), observed);
    assert_eq!(read.modification_counter(), counter);
    drop(read);

    writer.join().unwrap();
    let read = engine.read();
    assert_eq!(read.vertex_count(), 3);
}

#[test]
fn test_commit_visibility_is_exact() {
    let engine = engine();

    // Bring the store to counter 5: one attribute, two vertices, two values.
    let mut tx = engine.write("seed", true, "test");
    let label = tx.add_attribute("label", ElementKind::Vertex, false).unwrap();
    let a = tx.add_vertex();
    let b = tx.add_vertex();
    tx.set_vertex_value(label, a, Some(Value::Integer(1))).unwrap();
    tx.set_vertex_value(label, b, Some(Value::Integer(2))).unwrap();
    tx.commit("seed").unwrap();
    assert_eq!(engine.read().modification_counter(), 5);

    // A reader that starts before the next commit keeps seeing counter 5.
    let read = engine.read();
    assert_eq!(read.modification_counter(), 5);

    let (committing_tx, committing_rx) = mpsc::channel();
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut tx = engine.write("bump", true, "test");
            tx.set_vertex_value(label, a, Some(Value::Integer(10))).unwrap();
            tx.set_vertex_value(label, b, Some(Value::Integer(20))).unwrap();
            tx.set_vertex_value(label, a, Some(Value::Integer(11))).unwrap();
            committing_tx.send(()).unwrap();
            tx.commit("three value sets").unwrap();
        })
    };

    committing_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(read.modification_counter(), 5, "pre-commit reader sees the old version");
    drop(read);

    writer.join().unwrap();

    // A reader that starts after the commit sees exactly the new version.
    let read = engine.read();
    assert_eq!(read.modification_counter(), 8);
    assert_eq!(read.vertex_value(label, a).unwrap(), Some(&Value::Integer(11)));
    assert_eq!(read.vertex_value(label, b).unwrap(), Some(&Value::Integer(20)));
}

#[test]
fn test_concurrent_readers_agree_during_write() {
    let engine = engine();
    let mut tx = engine.write("seed", true, "test");
    for _ in 0..10 {
        tx.add_vertex();
    }
    tx.commit("seed").unwrap();

    // A writer mutates without committing while readers look on.
    let (mutated_tx, mutated_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut tx = engine.write("uncommitted", true, "test");
            for _ in 0..5 {
                tx.add_vertex();
            }
            mutated_tx.send(()).unwrap();
            // Hold the transaction open until the readers are done.
            done_rx.recv().unwrap();
            tx.rollback();
        })
    };
    mutated_rx.recv().unwrap();

    let mut readers = vec![];
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        readers.push(thread::spawn(move || {
            let read = engine.read();
            read.vertex_count()
        }));
    }
    let counts: Vec<usize> = readers.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(
        counts.iter().all(|&c| c == 10),
        "readers must agree on the committed state, got {:?}",
        counts
    );

    done_tx.send(()).unwrap();
    writer.join().unwrap();
    assert_eq!(engine.read().vertex_count(), 10);
}

#[test]
fn test_nested_read_handles_survive_pending_commit() {
    let engine = engine();
    let mut tx = engine.write("seed", true, "test");
    tx.add_vertex();
    tx.commit("seed").unwrap();

    let outer = engine.read();

    let (started_tx, started_rx) = mpsc::channel();
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let mut tx = engine.write("grow", true, "test");
            tx.add_vertex();
            started_tx.send(()).unwrap();
            // Publication parks on the read copy until both handles drop.
            tx.commit("grow").unwrap();
        })
    };
    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));

    // A second handle on the same thread must not queue behind the parked
    // publication.
    let inner = engine.read();
    assert_eq!(inner.vertex_count(), outer.vertex_count());
    drop(inner);
    drop(outer);

    writer.join().unwrap();
    assert_eq!(engine.read().vertex_count(), 2);
}

#[test]
fn test_undo_redo_round_trip_content() {
    let engine = engine();
    let mut tx = engine.write("seed", true, "test");
    let label = tx.add_attribute("label", ElementKind::Vertex, false).unwrap();
    let v = tx.add_vertex();
    tx.set_vertex_value(label, v, Some(Value::Text("original".into()))).unwrap();
    tx.commit("seed").unwrap();

    let mut tx = engine.write("rework", true, "test");
    let w = tx.add_vertex();
    tx.add_edge(v, w).unwrap();
    tx.set_vertex_value(label, v, Some(Value::Text("reworked".into()))).unwrap();
    tx.commit("rework").unwrap();

    let (vertices, edges, value) = {
        let read = engine.read();
        (
            read.vertex_count(),
            read.edge_count(),
            read.vertex_value(label, v).unwrap().cloned(),
        )
    };

    engine.undo_blocking();
    {
        let read = engine.read();
        assert_eq!(read.vertex_count(), 1);
        assert_eq!(read.edge_count(), 0);
        assert_eq!(read.vertex_value(label, v).unwrap(), Some(&Value::Text("original".into())));
    }

    engine.redo_blocking();
    let read = engine.read();
    assert_eq!(read.vertex_count(), vertices);
    assert_eq!(read.edge_count(), edges);
    assert_eq!(read.vertex_value(label, v).unwrap().cloned(), value);
}

#[test]
fn test_interleaved_commits_and_reads() {
    let engine = engine();
    let rounds = 30;

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..rounds {
                let mut tx = engine.write("grow", true, "test");
                tx.add_vertex();
                tx.commit("grow").unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..100 {
                    let count = engine.read().vertex_count();
                    // Vertex count only grows; a torn or stale view would regress.
                    assert!(count >= last, "count regressed from {} to {}", last, count);
                    last = count;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for h in readers {
        h.join().unwrap();
    }
    assert_eq!(engine.read().vertex_count(), rounds);
}
