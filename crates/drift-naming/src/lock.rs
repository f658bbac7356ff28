//! Per-node reader/writer locks with FIFO fairness.
//!
//! Each tree node gets an independent [`NodeLock`]. The lock grants a
//! request immediately only when nothing is waiting and the request is
//! compatible with the current holders; otherwise the request joins a
//! ticketed queue and is served strictly in arrival order. A reader
//! arriving behind a queued writer therefore blocks even while other
//! readers hold the lock — that is what prevents writer starvation.
//! Consecutive queued readers are granted as a batch.
//!
//! Acquire and release are deliberately not an RAII guard: the naming
//! server's advisory `lock`/`unlock` operations are separate remote
//! calls, so lock state must outlive any one stack frame.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use drift_proto::VPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    mode: Mode,
}

#[derive(Debug, Default)]
struct LockState {
    holders: usize,
    /// Mode of the current holders; meaningful only while `holders > 0`.
    exclusive: bool,
    next_ticket: u64,
    queue: VecDeque<Waiter>,
}

impl LockState {
    fn grantable_now(&self, mode: Mode) -> bool {
        if !self.queue.is_empty() {
            return false;
        }
        match mode {
            Mode::Exclusive => self.holders == 0,
            Mode::Shared => self.holders == 0 || !self.exclusive,
        }
    }

    fn grant(&mut self, mode: Mode) {
        self.holders += 1;
        self.exclusive = mode == Mode::Exclusive;
    }
}

/// A reader/writer lock with strict arrival-order fairness.
#[derive(Debug, Default)]
pub struct NodeLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl NodeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held in `mode`.
    pub fn acquire(&self, mode: Mode) {
        let mut state = self.state.lock().unwrap();
        if state.grantable_now(mode) {
            state.grant(mode);
            return;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(Waiter { ticket, mode });

        loop {
            state = self.cond.wait(state).unwrap();
            if state.queue.front().map(|w| w.ticket) != Some(ticket) {
                continue;
            }
            let compatible = match mode {
                Mode::Exclusive => state.holders == 0,
                Mode::Shared => state.holders == 0 || !state.exclusive,
            };
            if compatible {
                state.queue.pop_front();
                state.grant(mode);
                if mode == Mode::Shared {
                    // Wake the next waiter too: a run of queued readers
                    // is admitted as a batch.
                    self.cond.notify_all();
                }
                return;
            }
        }
    }

    /// Release one hold. Returns `false` if nothing was held (a stray
    /// unlock), which callers surface as an argument error.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.holders == 0 {
            return false;
        }
        state.holders -= 1;
        if state.holders == 0 {
            self.cond.notify_all();
        }
        true
    }

    #[cfg(test)]
    fn holders(&self) -> usize {
        self.state.lock().unwrap().holders
    }
}

/// The lock of every path ever locked, created on demand.
///
/// Entries persist after deletion: a waiter blocked on a deleted node
/// drains normally and the operation re-checks existence afterwards.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<VPath, std::sync::Arc<NodeLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a path, creating it if this is the first time the
    /// path is locked.
    pub fn lock_of(&self, path: &VPath) -> std::sync::Arc<NodeLock> {
        let mut locks = self.locks.lock().unwrap();
        std::sync::Arc::clone(
            locks
                .entry(path.clone())
                .or_insert_with(|| std::sync::Arc::new(NodeLock::new())),
        )
    }

    /// Whether a path has ever been locked.
    pub fn known(&self, path: &VPath) -> bool {
        self.locks.lock().unwrap().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_holders_coexist() {
        let lock = NodeLock::new();
        lock.acquire(Mode::Shared);
        lock.acquire(Mode::Shared);
        assert_eq!(lock.holders(), 2);
        assert!(lock.release());
        assert!(lock.release());
        assert!(!lock.release());
    }

    #[test]
    fn writers_are_mutually_exclusive() {
        let lock = Arc::new(NodeLock::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    lock.acquire(Mode::Exclusive);
                    let seen = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(seen, 0, "two writers inside the lock");
                    counter.fetch_sub(1, Ordering::SeqCst);
                    lock.release();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn reader_behind_queued_writer_waits() {
        let lock = Arc::new(NodeLock::new());
        lock.acquire(Mode::Shared);

        // A writer queues behind the reader.
        let (writer_in, writer_observed) = mpsc::channel();
        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.acquire(Mode::Exclusive);
                writer_in.send(()).unwrap();
                lock.release();
            })
        };
        // Give the writer time to enter the queue.
        thread::sleep(Duration::from_millis(50));

        // A second reader arrives. FIFO fairness: it must not overtake
        // the queued writer even though the lock is held shared.
        let (reader_in, reader_observed) = mpsc::channel();
        let reader = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.acquire(Mode::Shared);
                reader_in.send(()).unwrap();
                lock.release();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(
            reader_observed.try_recv().is_err(),
            "reader overtook a queued writer"
        );
        assert!(writer_observed.try_recv().is_err());

        // First reader leaves; the writer goes first, then the reader.
        lock.release();
        writer_observed
            .recv_timeout(Duration::from_secs(5))
            .expect("writer never ran");
        reader_observed
            .recv_timeout(Duration::from_secs(5))
            .expect("reader never ran");

        writer.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn queued_readers_are_admitted_as_a_batch() {
        let lock = Arc::new(NodeLock::new());
        lock.acquire(Mode::Exclusive);

        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                lock.acquire(Mode::Shared);
                inside.fetch_add(1, Ordering::SeqCst);
                // All three readers must be inside simultaneously.
                barrier.wait();
                lock.release();
            }));
        }

        thread::sleep(Duration::from_millis(50));
        assert_eq!(inside.load(Ordering::SeqCst), 0);

        lock.release();
        barrier.wait();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(inside.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn lock_table_reuses_entries() {
        let table = LockTable::new();
        let path = VPath::parse("/a/b").unwrap();
        assert!(!table.known(&path));

        let first = table.lock_of(&path);
        let second = table.lock_of(&path);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(table.known(&path));
    }
}
