//! The class linker: resolution, definition, linking and initialization of
//! runtime types.
//!
//! A [`ClassLinker`] is the runtime context every operation goes through. It
//! owns the boot loader, the dex cache registry, the visibility publisher and
//! handles to the external collaborators. Work is split by stage:
//!
//! - [`resolver`]: descriptor lookup along loader delegation, arrays, primitives
//! - [`define`]: class definition to unlinked type object
//! - [`link`] with [`methods`] and [`fields`]: tables and layout
//! - [`verify`] and [`init`]: the initialization state machine
//! - [`visibility`]: batched publication of initialized types
use crate::{
    config::{FenceStrategy, LinkerConfig},
    dex::DexFile,
    error::LinkError,
    types::{descriptor::Primitive, tables::IfTable, Class},
    utils::sync::{Arc, AtomicBool, Mutex, Ordering, RwLock},
    vm::{
        metrics::LinkerMetrics, threading::ThreadList, DefaultEntryPointSelector,
        EntryPointSelector, HeapCallbacks, Interpreter, NoHeap, NoopInterpreter,
        PermissiveVerifier, Verifier,
    },
};
use tracing::{debug, info};

pub mod arena;
pub mod class_table;
pub mod define;
pub mod dex_cache;
pub mod dispatch;
pub mod fields;
pub mod image;
pub mod init;
pub mod link;
pub mod loader;
pub mod methods;
pub mod resolver;
pub mod verify;
pub mod visibility;

use dex_cache::DexCacheRegistry;
use loader::ClassLoader;
use visibility::VisibilityPublisher;

/// Id of the boot class loader.
pub const BOOT_LOADER_ID: u64 = 0;

pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";
pub const CLONEABLE_DESCRIPTOR: &str = "Ljava/lang/Cloneable;";
pub const SERIALIZABLE_DESCRIPTOR: &str = "Ljava/io/Serializable;";
pub const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

pub struct ClassLinker {
    config: LinkerConfig,
    fence: FenceStrategy,
    metrics: Arc<LinkerMetrics>,
    threads: Arc<ThreadList>,
    boot_loader: Arc<ClassLoader>,
    /// Runtime-wide guard over every loader's class table. Readers look
    /// types up; writers insert, freeze and purge.
    classes_lock: RwLock<()>,
    dex_caches: DexCacheRegistry,
    verifier: Arc<dyn Verifier>,
    interpreter: Arc<dyn Interpreter>,
    heap: Arc<dyn HeapCallbacks>,
    entry_points: Arc<dyn EntryPointSelector>,
    primitives: Vec<Arc<Class>>,
    /// `[Cloneable, Serializable]`, shared by every array type.
    array_iftable: Mutex<Option<Arc<IfTable>>>,
    publisher: VisibilityPublisher,
    startup_completed: AtomicBool,
}

impl ClassLinker {
    pub fn builder(boot_class_path: Vec<Arc<DexFile>>) -> ClassLinkerBuilder {
        ClassLinkerBuilder {
            boot_class_path,
            config: LinkerConfig::default(),
            threads: None,
            verifier: Arc::new(PermissiveVerifier),
            interpreter: Arc::new(NoopInterpreter),
            heap: Arc::new(NoHeap),
            entry_points: Arc::new(DefaultEntryPointSelector::default()),
        }
    }

    /// A linker over `boot_class_path` with default collaborators.
    pub fn new(boot_class_path: Vec<Arc<DexFile>>) -> Self {
        Self::builder(boot_class_path).build()
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    /// The publication strategy in effect, never `Auto`.
    pub fn fence_strategy(&self) -> FenceStrategy {
        self.fence
    }

    pub fn metrics(&self) -> &LinkerMetrics {
        &self.metrics
    }

    pub fn threads(&self) -> &Arc<ThreadList> {
        &self.threads
    }

    pub fn boot_loader(&self) -> &Arc<ClassLoader> {
        &self.boot_loader
    }

    pub fn boot_class_path(&self) -> &[Arc<DexFile>] {
        self.boot_loader.dex_files()
    }

    pub fn dex_caches(&self) -> &DexCacheRegistry {
        &self.dex_caches
    }

    pub(crate) fn verifier(&self) -> &dyn Verifier {
        &*self.verifier
    }

    pub(crate) fn interpreter(&self) -> &dyn Interpreter {
        &*self.interpreter
    }

    pub(crate) fn heap(&self) -> &dyn HeapCallbacks {
        &*self.heap
    }

    pub(crate) fn entry_point_selector(&self) -> &dyn EntryPointSelector {
        &*self.entry_points
    }

    pub(crate) fn publisher(&self) -> &VisibilityPublisher {
        &self.publisher
    }

    pub fn primitive_class(&self, primitive: Primitive) -> &Arc<Class> {
        let index = Primitive::ALL
            .iter()
            .position(|p| *p == primitive)
            .unwrap_or_default();
        &self.primitives[index]
    }

    /// A new path loader delegating to the boot loader.
    pub fn create_path_class_loader(&self, dex_files: Vec<Arc<DexFile>>) -> Arc<ClassLoader> {
        ClassLoader::new_path(dex_files, None)
    }

    /// Resolves and initializes the core types every other type depends on.
    pub fn bootstrap(&self) -> Result<(), LinkError> {
        for descriptor in [
            OBJECT_DESCRIPTOR,
            CLONEABLE_DESCRIPTOR,
            SERIALIZABLE_DESCRIPTOR,
        ] {
            let class = self.find_system_class(descriptor)?;
            self.ensure_initialized(&class, true, true)?;
        }
        if let Ok(string) = self.find_system_class(STRING_DESCRIPTOR) {
            self.ensure_initialized(&string, true, true)?;
        }
        info!(
            boot_classes = self.boot_loader.num_defined_classes(),
            "class linker bootstrapped"
        );
        Ok(())
    }

    pub fn is_startup_completed(&self) -> bool {
        self.startup_completed.load(Ordering::Acquire)
    }

    /// Trims every live dex cache. Only the first call has an effect.
    pub fn on_startup_completed(&self) -> usize {
        if self.startup_completed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let trimmed = self
            .dex_caches
            .live_caches()
            .iter()
            .filter(|cache| cache.trim())
            .count();
        debug!(trimmed, "startup completed, dex caches trimmed");
        trimmed
    }
}

pub struct ClassLinkerBuilder {
    boot_class_path: Vec<Arc<DexFile>>,
    config: LinkerConfig,
    threads: Option<Arc<ThreadList>>,
    verifier: Arc<dyn Verifier>,
    interpreter: Arc<dyn Interpreter>,
    heap: Arc<dyn HeapCallbacks>,
    entry_points: Arc<dyn EntryPointSelector>,
}

impl ClassLinkerBuilder {
    pub fn config(mut self, config: LinkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn threads(mut self, threads: Arc<ThreadList>) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn interpreter(mut self, interpreter: impl Interpreter + 'static) -> Self {
        self.interpreter = Arc::new(interpreter);
        self
    }

    pub fn heap(mut self, heap: impl HeapCallbacks + 'static) -> Self {
        self.heap = Arc::new(heap);
        self
    }

    pub fn entry_points(mut self, selector: impl EntryPointSelector + 'static) -> Self {
        self.entry_points = Arc::new(selector);
        self
    }

    pub fn build(self) -> ClassLinker {
        let boot_loader = ClassLoader::new_boot(self.boot_class_path);
        let primitives = Primitive::ALL
            .iter()
            .map(|p| Arc::new(Class::new_primitive(*p, &boot_loader)))
            .collect();
        let fence = self.config.fence.resolve();
        debug!(%fence, batch = self.config.visibility_batch_size, "class linker created");
        let metrics = Arc::new(LinkerMetrics::new());
        ClassLinker {
            publisher: VisibilityPublisher::new(
                self.config.visibility_batch_size,
                Arc::clone(&self.entry_points),
                Arc::clone(&metrics),
            ),
            fence,
            config: self.config,
            metrics,
            threads: self.threads.unwrap_or_default(),
            boot_loader,
            classes_lock: RwLock::new(()),
            dex_caches: DexCacheRegistry::new(),
            verifier: self.verifier,
            interpreter: self.interpreter,
            heap: self.heap,
            entry_points: self.entry_points,
            primitives,
            array_iftable: Mutex::new(None),
            startup_completed: AtomicBool::new(false),
        }
    }
}
