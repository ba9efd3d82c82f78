use crate::{
    utils::sync::{current_thread_id, Condvar, Mutex, NO_THREAD},
    vm::metrics::LinkerMetrics,
};
use std::time::Instant;

#[derive(Debug)]
struct MonitorState {
    /// Thread ID of the current lock owner (0 means unlocked)
    owner_thread_id: u64,
    /// Lock recursion count (for nested locks by the same thread)
    recursion_count: usize,
    /// Bumped by every `notify_all`; waiters sleep until it moves.
    notify_epoch: u64,
}

/// The intrinsic lock of a type object.
///
/// Recursive like a managed monitor: the owner may enter again and must exit
/// as many times before another thread gets in. Threads waiting for another
/// thread to finish linking or initializing a type release the monitor in
/// [`Monitor::wait`] and are woken by [`Monitor::notify_all`], which the type
/// issues on every observable status change.
#[derive(Debug)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    /// Signalled when the monitor becomes free.
    entry: Condvar,
    /// Signalled on `notify_all`.
    waiters: Condvar,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                owner_thread_id: NO_THREAD,
                recursion_count: 0,
                notify_epoch: 0,
            }),
            entry: Condvar::new(),
            waiters: Condvar::new(),
        }
    }

    /// Try to enter the monitor (non-blocking).
    /// Returns true if lock was acquired, false otherwise.
    pub fn try_enter(&self, thread_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.owner_thread_id == NO_THREAD {
            state.owner_thread_id = thread_id;
            state.recursion_count = 1;
            true
        } else if state.owner_thread_id == thread_id {
            state.recursion_count += 1;
            true
        } else {
            false
        }
    }

    /// Enter the monitor (blocking).
    pub fn enter(&self, thread_id: u64, metrics: &LinkerMetrics) {
        let mut state = self.state.lock();

        if state.owner_thread_id == thread_id {
            state.recursion_count += 1;
            return;
        }

        if state.owner_thread_id != NO_THREAD {
            let start_wait = Instant::now();
            while state.owner_thread_id != NO_THREAD {
                self.entry.wait(&mut state);
            }
            metrics.record_lock_contention(start_wait.elapsed());
        }

        state.owner_thread_id = thread_id;
        state.recursion_count = 1;
    }

    /// Exit the monitor.
    /// Returns true if successfully exited, false if not owned by this thread.
    pub fn exit(&self, thread_id: u64) -> bool {
        let mut state = self.state.lock();

        if state.owner_thread_id != thread_id || thread_id == NO_THREAD {
            return false;
        }
        if state.recursion_count == 0 {
            return false;
        }

        state.recursion_count -= 1;
        if state.recursion_count == 0 {
            state.owner_thread_id = NO_THREAD;
            self.entry.notify_one();
        }
        true
    }

    pub fn is_held_by(&self, thread_id: u64) -> bool {
        self.state.lock().owner_thread_id == thread_id
    }

    pub fn owner(&self) -> u64 {
        self.state.lock().owner_thread_id
    }

    /// Releases the monitor completely, sleeps until the next
    /// [`Monitor::notify_all`], then reacquires it with the same recursion
    /// depth. Returns false without waiting if the caller is not the owner.
    ///
    /// Spurious returns are possible; callers re-check their condition.
    pub fn wait(&self, thread_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.owner_thread_id != thread_id || thread_id == NO_THREAD {
            return false;
        }

        let recursion = state.recursion_count;
        state.owner_thread_id = NO_THREAD;
        state.recursion_count = 0;
        self.entry.notify_one();

        let epoch = state.notify_epoch;
        while state.notify_epoch == epoch {
            self.waiters.wait(&mut state);
        }
        while state.owner_thread_id != NO_THREAD {
            self.entry.wait(&mut state);
        }

        state.owner_thread_id = thread_id;
        state.recursion_count = recursion;
        true
    }

    /// Wakes every thread sleeping in [`Monitor::wait`]. Does not require
    /// ownership; the state a waiter re-checks must have been published
    /// under the monitor before this is called.
    pub fn notify_all(&self) {
        let mut state = self.state.lock();
        state.notify_epoch = state.notify_epoch.wrapping_add(1);
        self.waiters.notify_all();
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of a [`Monitor`] by the current thread.
pub struct ObjectLock<'a> {
    monitor: &'a Monitor,
    thread_id: u64,
}

impl<'a> ObjectLock<'a> {
    pub fn new(monitor: &'a Monitor, metrics: &LinkerMetrics) -> Self {
        let thread_id = current_thread_id();
        monitor.enter(thread_id, metrics);
        Self { monitor, thread_id }
    }

    pub fn try_new(monitor: &'a Monitor) -> Option<Self> {
        let thread_id = current_thread_id();
        monitor
            .try_enter(thread_id)
            .then_some(Self { monitor, thread_id })
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn wait(&self) {
        let waited = self.monitor.wait(self.thread_id);
        debug_assert!(waited, "ObjectLock held by a thread that does not own it");
    }

    pub fn notify_all(&self) {
        self.monitor.notify_all();
    }
}

impl Drop for ObjectLock<'_> {
    fn drop(&mut self) {
        self.monitor.exit(self.thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sync::{Arc, AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monitor_recursion() {
        let monitor = Monitor::new();
        let tid = 1;
        let metrics = LinkerMetrics::new();

        assert!(monitor.try_enter(tid));
        monitor.enter(tid, &metrics);
        assert_eq!(monitor.state.lock().recursion_count, 2);

        assert!(monitor.exit(tid));
        assert_eq!(monitor.state.lock().recursion_count, 1);
        assert!(monitor.exit(tid));
        assert_eq!(monitor.state.lock().recursion_count, 0);
        assert_eq!(monitor.owner(), NO_THREAD);
        assert!(!monitor.exit(tid));
    }

    #[test]
    fn test_monitor_contention() {
        let monitor = Arc::new(Monitor::new());
        let monitor_clone = monitor.clone();
        let metrics = Arc::new(LinkerMetrics::new());
        let metrics_clone = metrics.clone();

        monitor.enter(1, &metrics);

        let handle = thread::spawn(move || {
            monitor_clone.enter(2, &metrics_clone);
            let recursion = monitor_clone.state.lock().recursion_count;
            monitor_clone.exit(2);
            recursion
        });

        thread::sleep(Duration::from_millis(50));
        monitor.exit(1);

        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(metrics.snapshot().lock_contentions, 1);
    }

    #[test]
    fn test_monitor_try_enter() {
        let monitor = Monitor::new();
        assert!(monitor.try_enter(1));
        assert!(!monitor.try_enter(2));
        monitor.exit(1);
        assert!(monitor.try_enter(2));
    }

    #[test]
    fn test_stress_heavy_contention() {
        let monitor = Arc::new(Monitor::new());
        let counter = Arc::new(Mutex::new(0u64));
        let metrics = Arc::new(LinkerMetrics::new());
        let mut handles = vec![];

        for tid in 1..=10 {
            let monitor = monitor.clone();
            let counter = counter.clone();
            let metrics = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    monitor.enter(tid, &metrics);
                    *counter.lock() += 1;
                    thread::sleep(Duration::from_micros(10));
                    monitor.exit(tid);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 1000);
    }

    #[test]
    fn test_wait_requires_ownership() {
        let monitor = Monitor::new();
        assert!(!monitor.wait(7));
    }

    #[test]
    fn test_wait_releases_and_restores_recursion() {
        let monitor = Arc::new(Monitor::new());
        let metrics = Arc::new(LinkerMetrics::new());
        let ready = Arc::new(AtomicBool::new(false));

        let waiter = {
            let monitor = monitor.clone();
            let metrics = metrics.clone();
            let ready = ready.clone();
            thread::spawn(move || {
                let lock = ObjectLock::new(&monitor, &metrics);
                let _nested = ObjectLock::new(&monitor, &metrics);
                while !ready.load(Ordering::Acquire) {
                    lock.wait();
                }
                let recursion = monitor.state.lock().recursion_count;
                recursion
            })
        };

        // The waiter must have released the monitor for this to get in.
        thread::sleep(Duration::from_millis(20));
        {
            let lock = ObjectLock::new(&monitor, &metrics);
            ready.store(true, Ordering::Release);
            lock.notify_all();
        }

        assert_eq!(waiter.join().unwrap(), 2);
        assert_eq!(monitor.owner(), NO_THREAD);
    }

    #[test]
    fn test_object_lock_try_new() {
        let monitor = Arc::new(Monitor::new());
        let metrics = LinkerMetrics::new();
        let held = ObjectLock::new(&monitor, &metrics);
        assert!(ObjectLock::try_new(&monitor).is_some());

        let other = {
            let monitor = monitor.clone();
            thread::spawn(move || ObjectLock::try_new(&monitor).is_some())
        };
        assert!(!other.join().unwrap());
        drop(held);
        assert_eq!(monitor.owner(), NO_THREAD);
    }
}
