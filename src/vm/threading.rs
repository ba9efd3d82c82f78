//! Registry of mutator threads and checkpoint delivery.
//!
//! A checkpoint is a closure every attached thread must run once. Runnable
//! threads pick it up at their next [`ThreadList::safe_point`] or when they
//! suspend themselves; for threads that are already suspended the requester
//! runs it on their behalf. Either way, when a thread's copy has run it has
//! passed through a lock handoff, which orders its later reads after every
//! write the requester made before asking.
use crate::utils::sync::{current_thread_id, Arc, AtomicUsize, Mutex, Ordering};
use std::{collections::HashMap, fmt, thread::ThreadId};
use tracing::{debug, trace};

/// A closure run once per thread. The argument is the managed id of the
/// thread it runs for.
pub type Checkpoint = Arc<dyn Fn(u64) + Send + Sync>;

/// Represents the state of a mutator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Running managed code; must reach a safe point to run checkpoints.
    Runnable,
    /// Blocked or in native code; checkpoints run on its behalf.
    Suspended,
}

struct ThreadSlot {
    state: ThreadState,
    pending: Vec<Checkpoint>,
}

/// Information about one attached thread.
struct ManagedThread {
    native_id: ThreadId,
    slot: Mutex<ThreadSlot>,
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("ManagedThread")
            .field("native_id", &self.native_id)
            .field("state", &slot.state)
            .field("pending", &slot.pending.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ThreadList {
    /// Map from managed thread ID to thread info
    threads: Mutex<HashMap<u64, Arc<ManagedThread>>>,
    /// Checkpoints queued on some thread and not yet run.
    pending_checkpoints: AtomicUsize,
}

impl ThreadList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread. Returns its managed thread ID.
    pub fn register_thread(&self) -> u64 {
        let managed_id = current_thread_id();
        let thread = Arc::new(ManagedThread {
            native_id: std::thread::current().id(),
            slot: Mutex::new(ThreadSlot {
                state: ThreadState::Runnable,
                pending: vec![],
            }),
        });
        self.threads.lock().insert(managed_id, thread);
        debug!(managed_id, "thread attached");
        managed_id
    }

    /// Unregister the calling thread, then run anything queued for it.
    pub fn unregister_thread(&self) {
        let managed_id = current_thread_id();
        // Once out of the map no requester can queue more work on it.
        let Some(thread) = self.threads.lock().remove(&managed_id) else {
            return;
        };
        let pending = std::mem::take(&mut thread.slot.lock().pending);
        self.run_checkpoints(managed_id, pending);
        debug!(managed_id, "thread detached");
    }

    pub fn is_registered(&self, managed_id: u64) -> bool {
        self.threads.lock().contains_key(&managed_id)
    }

    /// Get the number of currently attached threads.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn thread_state(&self, managed_id: u64) -> Option<ThreadState> {
        let thread = self.threads.lock().get(&managed_id).cloned()?;
        let state = thread.slot.lock().state;
        Some(state)
    }

    /// The thread's state and the number of checkpoints queued on it, read
    /// together.
    pub fn thread_snapshot(&self, managed_id: u64) -> Option<(ThreadState, usize)> {
        let thread = self.threads.lock().get(&managed_id).cloned()?;
        let slot = thread.slot.lock();
        Some((slot.state, slot.pending.len()))
    }

    #[inline]
    pub fn has_pending_checkpoints(&self) -> bool {
        self.pending_checkpoints.load(Ordering::Acquire) != 0
    }

    /// Runs every checkpoint queued for the calling thread.
    pub fn safe_point(&self) {
        if !self.has_pending_checkpoints() {
            return;
        }
        self.run_pending(current_thread_id());
    }

    fn run_pending(&self, managed_id: u64) {
        let Some(thread) = self.threads.lock().get(&managed_id).cloned() else {
            return;
        };
        let pending = std::mem::take(&mut thread.slot.lock().pending);
        self.run_checkpoints(managed_id, pending);
    }

    fn run_checkpoints(&self, managed_id: u64, pending: Vec<Checkpoint>) {
        if pending.is_empty() {
            return;
        }
        trace!(managed_id, count = pending.len(), "running checkpoints");
        for checkpoint in &pending {
            checkpoint(managed_id);
        }
        self.pending_checkpoints
            .fetch_sub(pending.len(), Ordering::AcqRel);
    }

    fn set_state(&self, managed_id: u64, state: ThreadState) {
        let thread = self.threads.lock().get(&managed_id).cloned();
        if let Some(thread) = thread {
            thread.slot.lock().state = state;
        }
    }

    /// Marks the calling thread suspended until the guard is dropped.
    /// Checkpoints queued before the transition run first.
    pub fn suspend(&self) -> ScopedSuspension<'_> {
        let managed_id = current_thread_id();
        let thread = self.threads.lock().get(&managed_id).cloned();
        if let Some(thread) = thread {
            // Taking the queue and changing state under one slot lock leaves
            // no window for a requester to queue on a thread about to park.
            let pending = {
                let mut slot = thread.slot.lock();
                slot.state = ThreadState::Suspended;
                std::mem::take(&mut slot.pending)
            };
            self.run_checkpoints(managed_id, pending);
        }
        ScopedSuspension {
            list: self,
            managed_id,
        }
    }

    /// Requests `checkpoint` on every attached thread, the caller included.
    ///
    /// Returns how many times the closure will have run once every thread
    /// has caught up. Some of those runs may already have happened when this
    /// returns: the caller's own and those done for suspended threads.
    pub fn run_checkpoint(&self, checkpoint: Checkpoint) -> usize {
        let requester = current_thread_id();
        let mut queued = 0;
        let mut on_behalf = vec![];
        {
            let threads = self.threads.lock();
            for (&managed_id, thread) in threads.iter() {
                if managed_id == requester {
                    continue;
                }
                let mut slot = thread.slot.lock();
                match slot.state {
                    ThreadState::Runnable => {
                        slot.pending.push(Arc::clone(&checkpoint));
                        queued += 1;
                    }
                    ThreadState::Suspended => on_behalf.push(managed_id),
                }
            }
            self.pending_checkpoints.fetch_add(queued, Ordering::AcqRel);
        }
        debug!(
            queued,
            suspended = on_behalf.len(),
            "checkpoint requested"
        );

        for managed_id in &on_behalf {
            checkpoint(*managed_id);
        }
        checkpoint(requester);
        queued + on_behalf.len() + 1
    }
}

/// The calling thread counts as suspended while this is alive.
pub struct ScopedSuspension<'a> {
    list: &'a ThreadList,
    managed_id: u64,
}

impl Drop for ScopedSuspension<'_> {
    fn drop(&mut self) {
        self.list.set_state(self.managed_id, ThreadState::Runnable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sync::{AtomicBool, AtomicU64};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_register_and_unregister() {
        let list = ThreadList::new();
        let id = list.register_thread();
        assert!(list.is_registered(id));
        assert_eq!(list.thread_state(id), Some(ThreadState::Runnable));
        {
            let _suspended = list.suspend();
            assert_eq!(list.thread_state(id), Some(ThreadState::Suspended));
        }
        assert_eq!(list.thread_state(id), Some(ThreadState::Runnable));
        list.unregister_thread();
        assert!(!list.is_registered(id));
    }

    #[test]
    fn test_checkpoint_runs_for_requester_only_when_alone() {
        let list = ThreadList::new();
        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();
        let count = list.run_checkpoint(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checkpoint_reaches_runnable_and_suspended_threads() {
        let list = Arc::new(ThreadList::new());
        let stop = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicU64::new(0));

        let (tx, rx) = std::sync::mpsc::channel();
        let mut handles = vec![];
        for i in 0..4 {
            let list = list.clone();
            let stop = stop.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                list.register_thread();
                if i % 2 == 0 {
                    let _suspended = list.suspend();
                    tx.send(()).unwrap();
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                } else {
                    tx.send(()).unwrap();
                    while !stop.load(Ordering::Acquire) {
                        list.safe_point();
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                list.unregister_thread();
            }));
        }
        for _ in 0..4 {
            rx.recv().unwrap();
        }

        let counter = runs.clone();
        let count = list.run_checkpoint(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count, 5);

        while runs.load(Ordering::SeqCst) < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!list.has_pending_checkpoints());

        stop.store(true, Ordering::Release);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(list.thread_count(), 0);
    }

    #[test]
    fn test_suspended_thread_never_holds_queued_checkpoints() {
        let list = Arc::new(ThreadList::new());
        let stop = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicU64::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let list = list.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let id = list.register_thread();
                tx.send(id).unwrap();
                while !stop.load(Ordering::Acquire) {
                    let _suspended = list.suspend();
                    thread::yield_now();
                }
                list.unregister_thread();
            })
        };
        let worker_id = rx.recv().unwrap();

        let mut expected = 0;
        for _ in 0..20_000 {
            let counter = runs.clone();
            expected += list.run_checkpoint(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            if let Some((ThreadState::Suspended, pending)) = list.thread_snapshot(worker_id) {
                assert_eq!(pending, 0);
            }
        }
        stop.store(true, Ordering::Release);
        worker.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), expected as u64);
        assert!(!list.has_pending_checkpoints());
    }

    #[test]
    fn test_unregister_runs_pending() {
        let list = Arc::new(ThreadList::new());
        let (attached_tx, attached_rx) = std::sync::mpsc::channel();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let worker = {
            let list = list.clone();
            thread::spawn(move || {
                list.register_thread();
                attached_tx.send(()).unwrap();
                go_rx.recv().unwrap();
                list.unregister_thread();
            })
        };
        attached_rx.recv().unwrap();

        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();
        list.run_checkpoint(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        go_tx.send(()).unwrap();
        worker.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
