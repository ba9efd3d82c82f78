//! Basic synchronization primitives.
//!
//! Every lock in the crate goes through these re-exports so that low-level
//! modules can depend on this without pulling in the linker.
pub use std::sync::{
    atomic::{
        AtomicBool, AtomicI32, AtomicIsize, AtomicU16, AtomicU32, AtomicU64, AtomicU8,
        AtomicUsize, Ordering,
    },
    Arc, Weak,
};

pub use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::cell::Cell;

/// Thread id 0 is reserved to mean "no thread".
pub const NO_THREAD: u64 = 0;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Cached managed thread ID for the current thread
    static MANAGED_THREAD_ID: Cell<u64> = const { Cell::new(NO_THREAD) };
}

/// Get the current thread's managed ID, allocating one on first use.
///
/// The id is stable for the lifetime of the OS thread and never reused, so it
/// can be stored in a type object to identify the thread linking or
/// initializing it.
pub fn current_thread_id() -> u64 {
    MANAGED_THREAD_ID.with(|id| {
        let cached = id.get();
        if cached != NO_THREAD {
            return cached;
        }
        let fresh = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        id.set(fresh);
        fresh
    })
}

/// A counting barrier.
///
/// Threads that want to wait call [`Barrier::increment`] with the number of
/// passes they expect; every [`Barrier::pass`] brings the count one step
/// back towards zero. Passes may arrive before the waiter increments.
#[derive(Debug, Default)]
pub struct Barrier {
    count: Mutex<isize>,
    condvar: Condvar,
}

impl Barrier {
    pub fn new(count: isize) -> Self {
        Self {
            count: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    pub fn pass(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.condvar.notify_all();
        }
    }

    /// Adds `delta` to the count and blocks until it drops back to zero.
    pub fn increment(&self, delta: isize) {
        let mut count = self.count.lock();
        *count += delta;
        while *count != 0 {
            self.condvar.wait(&mut count);
        }
    }

    pub fn count(&self) -> isize {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_thread_ids_are_unique_and_stable() {
        let main_id = current_thread_id();
        assert_ne!(main_id, NO_THREAD);
        assert_eq!(main_id, current_thread_id());

        let other = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(other, NO_THREAD);
        assert_ne!(other, main_id);
    }

    #[test]
    fn test_barrier_passes_before_increment() {
        let barrier = Barrier::new(0);
        barrier.pass();
        barrier.pass();
        barrier.increment(2);
        assert_eq!(barrier.count(), 0);
    }

    #[test]
    fn test_barrier_waits_for_passes() {
        let barrier = Arc::new(Barrier::new(0));
        let mut handles = vec![];
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(5));
                barrier.pass();
            }));
        }
        barrier.increment(4);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(barrier.count(), 0);
    }
}
