//! Class loaders and their delegation shapes.
use crate::{
    dex::DexFile,
    error::LinkError,
    linker::{arena::LinearAlloc, class_table::ClassTable, ClassLinker, BOOT_LOADER_ID},
    types::Class,
    utils::sync::{Arc, AtomicU64, Ordering},
};
use enum_dispatch::enum_dispatch;
use std::fmt::{Debug, Formatter};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(BOOT_LOADER_ID + 1);

/// One step of a loader's search for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// The boot class path.
    BootClassPath,
    /// Delegate to the parent loader.
    Parent,
    /// Shared libraries consulted before the loader's own units.
    SharedLibraries,
    /// The loader's own compiled units.
    OwnDexFiles,
    /// Shared libraries consulted after the loader's own units.
    SharedLibrariesAfter,
}

const PARENT_FIRST: &[SearchStep] = &[
    SearchStep::Parent,
    SearchStep::SharedLibraries,
    SearchStep::OwnDexFiles,
    SearchStep::SharedLibrariesAfter,
];

const DELEGATE_LAST: &[SearchStep] = &[
    SearchStep::BootClassPath,
    SearchStep::SharedLibraries,
    SearchStep::OwnDexFiles,
    SearchStep::SharedLibrariesAfter,
    SearchStep::Parent,
];

/// Search contract of a loader whose shape the resolver does not know.
/// Typically backed by managed code; may define the type itself through
/// [`ClassLinker::define_class`] or delegate anywhere.
pub trait FindClassCallback: Send + Sync {
    fn load_class(
        &self,
        linker: &ClassLinker,
        loader: &Arc<ClassLoader>,
        descriptor: &str,
    ) -> Result<Option<Arc<Class>>, LinkError>;
}

impl<F> FindClassCallback for F
where
    F: Fn(&ClassLinker, &Arc<ClassLoader>, &str) -> Result<Option<Arc<Class>>, LinkError>
        + Send
        + Sync,
{
    fn load_class(
        &self,
        linker: &ClassLinker,
        loader: &Arc<ClassLoader>,
        descriptor: &str,
    ) -> Result<Option<Arc<Class>>, LinkError> {
        self(linker, loader, descriptor)
    }
}

#[enum_dispatch]
pub trait LoaderShape {
    /// Binary name of the loader's class, as reported in diagnostics.
    fn kind_name(&self) -> &str;
    /// The fixed search order, `None` when the loader's own callback decides.
    fn search_order(&self) -> Option<&'static [SearchStep]>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BootClassLoader;

impl LoaderShape for BootClassLoader {
    fn kind_name(&self) -> &str {
        "java.lang.BootClassLoader"
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        Some(&[SearchStep::BootClassPath])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathClassLoader;

impl LoaderShape for PathClassLoader {
    fn kind_name(&self) -> &str {
        "dalvik.system.PathClassLoader"
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        Some(PARENT_FIRST)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DexClassLoader;

impl LoaderShape for DexClassLoader {
    fn kind_name(&self) -> &str {
        "dalvik.system.DexClassLoader"
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        Some(PARENT_FIRST)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryDexClassLoader;

impl LoaderShape for InMemoryDexClassLoader {
    fn kind_name(&self) -> &str {
        "dalvik.system.InMemoryDexClassLoader"
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        Some(PARENT_FIRST)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DelegateLastClassLoader;

impl LoaderShape for DelegateLastClassLoader {
    fn kind_name(&self) -> &str {
        "dalvik.system.DelegateLastClassLoader"
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        Some(DELEGATE_LAST)
    }
}

/// A loader of some other class; lookups go through its callback.
#[derive(Clone)]
pub struct CustomClassLoader {
    pub name: String,
    pub callback: Arc<dyn FindClassCallback>,
}

impl Debug for CustomClassLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomClassLoader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl LoaderShape for CustomClassLoader {
    fn kind_name(&self) -> &str {
        &self.name
    }

    fn search_order(&self) -> Option<&'static [SearchStep]> {
        None
    }
}

#[enum_dispatch(LoaderShape)]
#[derive(Debug, Clone)]
pub enum LoaderKind {
    BootClassLoader,
    PathClassLoader,
    DexClassLoader,
    InMemoryDexClassLoader,
    DelegateLastClassLoader,
    CustomClassLoader,
}

/// A class loader: a delegation shape, the compiled units it defines types
/// from, and the table of types it defined or initiated.
pub struct ClassLoader {
    id: u64,
    kind: LoaderKind,
    parent: Option<Arc<ClassLoader>>,
    dex_files: Vec<Arc<DexFile>>,
    shared_libraries: Vec<Arc<ClassLoader>>,
    shared_libraries_after: Vec<Arc<ClassLoader>>,
    class_table: ClassTable,
    arena: LinearAlloc,
}

impl ClassLoader {
    pub fn builder(kind: impl Into<LoaderKind>) -> ClassLoaderBuilder {
        ClassLoaderBuilder {
            kind: kind.into(),
            parent: None,
            dex_files: vec![],
            shared_libraries: vec![],
            shared_libraries_after: vec![],
        }
    }

    /// The boot loader over the given boot class path.
    pub fn new_boot(boot_class_path: Vec<Arc<DexFile>>) -> Arc<Self> {
        Arc::new(Self {
            id: BOOT_LOADER_ID,
            kind: BootClassLoader.into(),
            parent: None,
            dex_files: boot_class_path,
            shared_libraries: vec![],
            shared_libraries_after: vec![],
            class_table: ClassTable::new(),
            arena: LinearAlloc::new(),
        })
    }

    pub fn new_path(dex_files: Vec<Arc<DexFile>>, parent: Option<Arc<ClassLoader>>) -> Arc<Self> {
        let mut builder = Self::builder(PathClassLoader).dex_files(dex_files);
        builder.parent = parent;
        builder.build()
    }

    pub fn new_delegate_last(
        dex_files: Vec<Arc<DexFile>>,
        parent: Option<Arc<ClassLoader>>,
    ) -> Arc<Self> {
        let mut builder = Self::builder(DelegateLastClassLoader).dex_files(dex_files);
        builder.parent = parent;
        builder.build()
    }

    pub fn new_custom(
        name: impl Into<String>,
        parent: Option<Arc<ClassLoader>>,
        callback: Arc<dyn FindClassCallback>,
    ) -> Arc<Self> {
        let mut builder = Self::builder(CustomClassLoader {
            name: name.into(),
            callback,
        });
        builder.parent = parent;
        builder.build()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_boot(&self) -> bool {
        self.id == BOOT_LOADER_ID
    }

    pub fn kind(&self) -> &LoaderKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &str {
        self.kind.kind_name()
    }

    pub fn search_order(&self) -> Option<&'static [SearchStep]> {
        self.kind.search_order()
    }

    pub(crate) fn find_class_callback(&self) -> Option<&Arc<dyn FindClassCallback>> {
        match &self.kind {
            LoaderKind::CustomClassLoader(custom) => Some(&custom.callback),
            _ => None,
        }
    }

    /// `None` means the boot loader is the parent.
    pub fn parent(&self) -> Option<&Arc<ClassLoader>> {
        self.parent.as_ref()
    }

    pub fn dex_files(&self) -> &[Arc<DexFile>] {
        &self.dex_files
    }

    pub fn shared_libraries(&self) -> &[Arc<ClassLoader>] {
        &self.shared_libraries
    }

    pub fn shared_libraries_after(&self) -> &[Arc<ClassLoader>] {
        &self.shared_libraries_after
    }

    pub fn class_table(&self) -> &ClassTable {
        &self.class_table
    }

    pub fn arena(&self) -> &LinearAlloc {
        &self.arena
    }

    /// Number of types this loader defined.
    pub fn num_defined_classes(&self) -> usize {
        self.class_table.len()
    }
}

impl Debug for ClassLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind_name(), self.id)
    }
}

pub struct ClassLoaderBuilder {
    kind: LoaderKind,
    parent: Option<Arc<ClassLoader>>,
    dex_files: Vec<Arc<DexFile>>,
    shared_libraries: Vec<Arc<ClassLoader>>,
    shared_libraries_after: Vec<Arc<ClassLoader>>,
}

impl ClassLoaderBuilder {
    pub fn parent(mut self, parent: Arc<ClassLoader>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn dex_file(mut self, dex_file: Arc<DexFile>) -> Self {
        self.dex_files.push(dex_file);
        self
    }

    pub fn dex_files(mut self, dex_files: Vec<Arc<DexFile>>) -> Self {
        self.dex_files.extend(dex_files);
        self
    }

    pub fn shared_library(mut self, library: Arc<ClassLoader>) -> Self {
        self.shared_libraries.push(library);
        self
    }

    pub fn shared_library_after(mut self, library: Arc<ClassLoader>) -> Self {
        self.shared_libraries_after.push(library);
        self
    }

    pub fn build(self) -> Arc<ClassLoader> {
        Arc::new(ClassLoader {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            kind: self.kind,
            parent: self.parent,
            dex_files: self.dex_files,
            shared_libraries: self.shared_libraries,
            shared_libraries_after: self.shared_libraries_after,
            class_table: ClassTable::new(),
            arena: LinearAlloc::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_orders() {
        let boot = ClassLoader::new_boot(vec![]);
        assert!(boot.is_boot());
        assert_eq!(boot.search_order(), Some(&[SearchStep::BootClassPath][..]));

        let path = ClassLoader::new_path(vec![], Some(boot.clone()));
        assert!(!path.is_boot());
        assert_eq!(path.search_order().unwrap()[0], SearchStep::Parent);
        assert_eq!(path.kind_name(), "dalvik.system.PathClassLoader");

        let last = ClassLoader::new_delegate_last(vec![], Some(path.clone()));
        let order = last.search_order().unwrap();
        assert_eq!(order.first(), Some(&SearchStep::BootClassPath));
        assert_eq!(order.last(), Some(&SearchStep::Parent));
        assert_ne!(last.id(), path.id());
    }

    #[test]
    fn test_custom_loader_has_no_fixed_order() {
        let callback: Arc<dyn FindClassCallback> =
            Arc::new(
                |_: &ClassLinker,
                 _: &Arc<ClassLoader>,
                 _: &str|
                 -> Result<Option<Arc<Class>>, LinkError> { Ok(None) },
            );
        let custom = ClassLoader::new_custom("com.example.MyLoader", None, callback);
        assert!(custom.search_order().is_none());
        assert!(custom.find_class_callback().is_some());
        assert_eq!(custom.kind_name(), "com.example.MyLoader");
        assert_eq!(format!("{:?}", custom), format!("com.example.MyLoader#{}", custom.id()));
    }

    #[test]
    fn test_builder_collects_libraries() {
        let lib = ClassLoader::new_path(vec![], None);
        let after = ClassLoader::new_path(vec![], None);
        let loader = ClassLoader::builder(DexClassLoader)
            .shared_library(lib.clone())
            .shared_library_after(after)
            .parent(lib)
            .build();
        assert_eq!(loader.shared_libraries().len(), 1);
        assert_eq!(loader.shared_libraries_after().len(), 1);
        assert!(loader.parent().is_some());
    }
}
