//! Publishing initialized types as visibly initialized.
//!
//! Readers test the `Initialized` status without a fence. On weakly ordered
//! hardware that is only safe once every thread has executed a full barrier
//! after the type's static state was written. Freshly initialized types are
//! collected into batches, and each batch is published with one
//! process-wide `membarrier(2)` or, where that is unavailable, a checkpoint
//! that every attached thread runs. Only after that do the types become
//! `VisiblyInitialized`.
use crate::{
    config::FenceStrategy,
    linker::ClassLinker,
    types::{Class, ClassStatus},
    utils::sync::{Arc, AtomicIsize, Barrier, Mutex, Ordering},
    vm::{metrics::LinkerMetrics, threading::ThreadList, EntryPointSelector},
};
use std::sync::OnceLock;
use tracing::{debug, trace, warn};

/// Types initialized but not yet published, and the barriers of threads
/// waiting for them.
struct Batch {
    classes: Vec<Arc<Class>>,
    /// Outstanding checkpoint runs; may go negative before the requester
    /// learns how many runs to expect.
    remaining: AtomicIsize,
    barriers: Mutex<Vec<Arc<Barrier>>>,
}

impl Batch {
    fn new(classes: Vec<Arc<Class>>) -> Arc<Self> {
        Arc::new(Self {
            classes,
            remaining: AtomicIsize::new(0),
            barriers: Mutex::new(vec![]),
        })
    }
}

struct Shared {
    entry_points: Arc<dyn EntryPointSelector>,
    metrics: Arc<LinkerMetrics>,
    /// Batches whose checkpoint has been requested and not yet completed.
    running: Mutex<Vec<Arc<Batch>>>,
}

impl Shared {
    /// Flips every type of `batch` to `VisiblyInitialized` and releases the
    /// threads waiting for it.
    fn make_visible(&self, batch: &Arc<Batch>) {
        for class in &batch.classes {
            if class.status() == ClassStatus::Initialized {
                class.set_status(ClassStatus::VisiblyInitialized);
                fixup_static_trampolines(&*self.entry_points, class);
            }
        }
        LinkerMetrics::bump(&self.metrics.visibility_batches);
        trace!(classes = batch.classes.len(), "batch visibly initialized");

        self.running.lock().retain(|b| !Arc::ptr_eq(b, batch));
        let barriers = std::mem::take(&mut *batch.barriers.lock());
        for barrier in barriers {
            barrier.pass();
        }
    }
}

pub struct VisibilityPublisher {
    batch_size: usize,
    shared: Arc<Shared>,
    pending: Mutex<Vec<Arc<Class>>>,
}

impl VisibilityPublisher {
    pub fn new(
        batch_size: usize,
        entry_points: Arc<dyn EntryPointSelector>,
        metrics: Arc<LinkerMetrics>,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            shared: Arc::new(Shared {
                entry_points,
                metrics,
                running: Mutex::new(vec![]),
            }),
            pending: Mutex::new(Vec::with_capacity(batch_size)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Types waiting for the current batch to fill.
    pub fn num_pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Batches published but not yet completed by every thread.
    pub fn num_running(&self) -> usize {
        self.shared.running.lock().len()
    }

    /// Queues a freshly `Initialized` type, publishing the batch once full.
    pub(crate) fn add_class(&self, class: Arc<Class>, fence: FenceStrategy, threads: &ThreadList) {
        let full = {
            let mut pending = self.pending.lock();
            pending.push(class);
            if pending.len() >= self.batch_size {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(classes) = full {
            self.publish(classes, fence, threads);
        }
    }

    fn publish(&self, classes: Vec<Arc<Class>>, fence: FenceStrategy, threads: &ThreadList) {
        let batch = Batch::new(classes);
        debug!(classes = batch.classes.len(), %fence, "publishing initialized classes");
        if fence == FenceStrategy::Membarrier {
            if issue_membarrier() {
                LinkerMetrics::bump(&self.shared.metrics.membarrier_publications);
                self.shared.make_visible(&batch);
                return;
            }
            warn!("membarrier failed, publishing with a checkpoint");
        }
        if fence == FenceStrategy::Immediate {
            self.shared.make_visible(&batch);
            return;
        }

        self.shared.running.lock().push(Arc::clone(&batch));
        LinkerMetrics::bump(&self.shared.metrics.checkpoint_publications);
        let checkpoint = {
            let shared = Arc::clone(&self.shared);
            let batch = Arc::clone(&batch);
            Arc::new(move |_thread_id: u64| {
                if batch.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    shared.make_visible(&batch);
                }
            })
        };
        let runs = threads.run_checkpoint(checkpoint) as isize;
        if batch.remaining.fetch_add(runs, Ordering::AcqRel) == -runs {
            self.shared.make_visible(&batch);
        }
    }

    /// Publishes the partially filled batch. With `wait`, blocks until every
    /// batch published so far has completed.
    pub(crate) fn make_initialized_classes_visibly_initialized(
        &self,
        fence: FenceStrategy,
        threads: &ThreadList,
        wait: bool,
    ) {
        let classes = std::mem::take(&mut *self.pending.lock());
        if !classes.is_empty() {
            self.publish(classes, fence, threads);
        }
        if !wait {
            return;
        }
        let barrier = Arc::new(Barrier::new(0));
        let count = {
            let running = self.shared.running.lock();
            for batch in running.iter() {
                batch.barriers.lock().push(Arc::clone(&barrier));
            }
            running.len() as isize
        };
        if count > 0 {
            let _suspended = threads.suspend();
            barrier.increment(count);
        }
    }
}

/// Re-selects the entry points of static methods, which pointed at the
/// resolution trampoline while the type was not initialized.
pub(crate) fn fixup_static_trampolines(selector: &dyn EntryPointSelector, class: &Class) {
    let status = class.status();
    for method in class.direct_methods().iter() {
        if method.is_static() && !method.is_class_initializer() {
            method.set_entry_point(selector.select(method, status));
        }
    }
}

#[cfg(target_os = "linux")]
mod membarrier {
    pub const CMD_QUERY: libc::c_long = 0;
    pub const CMD_PRIVATE_EXPEDITED: libc::c_long = 1 << 3;
    pub const CMD_REGISTER_PRIVATE_EXPEDITED: libc::c_long = 1 << 4;

    pub fn call(cmd: libc::c_long) -> libc::c_long {
        // SAFETY: membarrier takes two integer arguments and touches no memory
        // of ours.
        unsafe { libc::syscall(libc::SYS_membarrier, cmd, 0 as libc::c_long) }
    }
}

/// Whether the kernel offers private expedited `membarrier(2)`. The process
/// registers for it on the first query.
pub fn membarrier_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        #[cfg(target_os = "linux")]
        {
            let commands = membarrier::call(membarrier::CMD_QUERY);
            if commands < 0 || commands & membarrier::CMD_PRIVATE_EXPEDITED == 0 {
                return false;
            }
            membarrier::call(membarrier::CMD_REGISTER_PRIVATE_EXPEDITED) == 0
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    })
}

fn issue_membarrier() -> bool {
    #[cfg(target_os = "linux")]
    {
        membarrier_supported() && membarrier::call(membarrier::CMD_PRIVATE_EXPEDITED) == 0
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

impl ClassLinker {
    /// Publishes every initialized type that is not yet visibly initialized.
    /// With `wait`, returns only once they all are.
    pub fn make_initialized_classes_visibly_initialized(&self, wait: bool) {
        self.publisher
            .make_initialized_classes_visibly_initialized(self.fence, &self.threads, wait);
    }

    /// Moves a type whose static initializer completed to `Initialized`, or
    /// straight to `VisiblyInitialized` where no publication step is needed.
    /// The caller holds the type's monitor.
    pub(crate) fn mark_class_initialized(&self, class: &Arc<Class>) {
        if self.fence == FenceStrategy::Immediate {
            class.set_status(ClassStatus::Initialized);
            class.set_status(ClassStatus::VisiblyInitialized);
            fixup_static_trampolines(self.entry_point_selector(), class);
        } else {
            class.set_status(ClassStatus::Initialized);
            self.publisher
                .add_class(Arc::clone(class), self.fence, &self.threads);
        }
    }
}
