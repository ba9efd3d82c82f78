//! Descriptor resolution along class loader delegation.
use crate::{
    dex::{AccessFlags, MethodSignature},
    error::LinkError,
    linker::{
        loader::{ClassLoader, SearchStep},
        ClassLinker, CLONEABLE_DESCRIPTOR, OBJECT_DESCRIPTOR, SERIALIZABLE_DESCRIPTOR,
    },
    types::{
        descriptor::{
            compute_modified_utf8_hash, component_descriptor, is_array_descriptor,
            is_valid_descriptor, pretty_descriptor, Primitive,
        },
        tables::{IfTable, IfTableEntry, SharedTable},
        Class, ClassStatus, Field, Method,
    },
    utils::sync::{Arc, Ordering},
    vm::sync::ObjectLock,
};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Yields before switching to sleeps while waiting for another thread to
/// finish linking a type.
const NUM_YIELD_ITERATIONS: usize = 1000;
const SLEEP_DURATION: Duration = Duration::from_millis(1);

/// How a resolved method is going to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeType {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

/// A method reference as it appears in a compiled unit.
#[derive(Debug, Clone, Copy)]
pub struct MethodRef<'a> {
    pub method_idx: u32,
    pub class: &'a str,
    pub name: &'a str,
    pub signature: &'a MethodSignature,
}

/// A field reference as it appears in a compiled unit.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<'a> {
    pub field_idx: u32,
    pub class: &'a str,
    pub name: &'a str,
    pub type_descriptor: &'a str,
}

impl ClassLinker {
    /// Finds `descriptor` as seen from `loader`, defining it if needed.
    pub fn find_class(
        &self,
        descriptor: &str,
        loader: &Arc<ClassLoader>,
    ) -> Result<Arc<Class>, LinkError> {
        if descriptor.len() == 1 {
            return descriptor
                .chars()
                .next()
                .and_then(|c| self.find_primitive_class(c))
                .ok_or_else(|| LinkError::ClassNotFound(descriptor.to_string()));
        }
        let hash = compute_modified_utf8_hash(descriptor);
        if let Some(class) = self.table_lookup(loader, descriptor, hash) {
            return self.ensure_resolved(class);
        }
        if is_array_descriptor(descriptor) {
            return self.create_array_class(descriptor, hash, loader);
        }
        if !is_valid_descriptor(descriptor) {
            return Err(LinkError::ClassNotFound(descriptor.to_string()));
        }
        let found = if loader.is_boot() {
            self.find_in_boot_class_path(descriptor, hash)?
        } else if loader.search_order().is_some() {
            self.find_in_loader(descriptor, hash, loader)?
        } else {
            return self.find_with_callback(descriptor, hash, loader);
        };
        match found {
            Some(class) => {
                if class.loader_id() != loader.id() {
                    self.table_insert_initiating(loader, &class);
                }
                Ok(class)
            }
            None => Err(LinkError::ClassNotFound(descriptor.to_string())),
        }
    }

    pub fn find_system_class(&self, descriptor: &str) -> Result<Arc<Class>, LinkError> {
        self.find_class(descriptor, &self.boot_loader)
    }

    /// Class table lookup only; never defines anything.
    pub fn lookup_class(&self, descriptor: &str, loader: &ClassLoader) -> Option<Arc<Class>> {
        if descriptor.len() == 1 {
            return self.find_primitive_class(descriptor.chars().next()?);
        }
        self.table_lookup(loader, descriptor, compute_modified_utf8_hash(descriptor))
    }

    pub fn find_primitive_class(&self, type_char: char) -> Option<Arc<Class>> {
        Primitive::from_char(type_char).map(|p| Arc::clone(self.primitive_class(p)))
    }

    /// The loader to resolve from when `class` is the referrer. Boot types
    /// always map to this linker's boot loader, adopted image types included.
    pub(crate) fn loader_of(&self, class: &Class) -> Result<Arc<ClassLoader>, LinkError> {
        if class.is_boot_class() {
            return Ok(Arc::clone(&self.boot_loader));
        }
        class.class_loader().ok_or_else(|| {
            LinkError::no_class_def(format!(
                "Class loader of {} has been unloaded",
                class.pretty_descriptor()
            ))
        })
    }

    /// Waits until another thread has finished linking `class`.
    pub(crate) fn ensure_resolved(&self, class: Arc<Class>) -> Result<Arc<Class>, LinkError> {
        let mut index = 0;
        while !class.is_resolved() && class.status() != ClassStatus::ErrorUnresolved {
            if let Some(lock) = ObjectLock::try_new(class.monitor()) {
                if !class.is_resolved() && class.clinit_thread_id() == lock.thread_id() {
                    let error = LinkError::ClassCircularity(class.pretty_descriptor());
                    class.set_erroneous(&error);
                    return Err(error);
                }
            }
            {
                let _suspended = self.threads.suspend();
                if index < NUM_YIELD_ITERATIONS {
                    std::thread::yield_now();
                } else {
                    std::thread::sleep(SLEEP_DURATION);
                }
            }
            index += 1;
        }
        if class.status() == ClassStatus::ErrorUnresolved {
            return Err(self.earlier_failure(&class));
        }
        Ok(class)
    }

    /// Searches the boot class path, defining the type with the boot loader
    /// on a hit.
    fn find_in_boot_class_path(
        &self,
        descriptor: &str,
        hash: u32,
    ) -> Result<Option<Arc<Class>>, LinkError> {
        if let Some(class) = self.table_lookup(&self.boot_loader, descriptor, hash) {
            return self.ensure_resolved(class).map(Some);
        }
        for dex_file in self.boot_loader.dex_files() {
            if let Some((idx, _)) = dex_file.find_class_def(descriptor) {
                let class =
                    self.define_class_at(descriptor, &self.boot_loader, dex_file, idx)?;
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    /// Walks the fixed search order of a known loader shape. `Ok(None)` means
    /// not found; errors from defining a found type are returned as is.
    fn find_in_loader(
        &self,
        descriptor: &str,
        hash: u32,
        loader: &Arc<ClassLoader>,
    ) -> Result<Option<Arc<Class>>, LinkError> {
        if loader.is_boot() {
            return self.find_in_boot_class_path(descriptor, hash);
        }
        if let Some(class) = self.table_lookup(loader, descriptor, hash) {
            return self.ensure_resolved(class).map(Some);
        }
        let Some(order) = loader.search_order() else {
            // A custom loader in the delegation chain answers through its
            // callback; a miss there is just a miss.
            return match self.find_with_callback(descriptor, hash, loader) {
                Ok(class) => Ok(Some(class)),
                Err(LinkError::ClassNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        };
        for step in order {
            let found = match step {
                SearchStep::BootClassPath => self.find_in_boot_class_path(descriptor, hash)?,
                SearchStep::Parent => match loader.parent() {
                    Some(parent) => self.find_in_loader(descriptor, hash, parent)?,
                    None => self.find_in_boot_class_path(descriptor, hash)?,
                },
                SearchStep::SharedLibraries => {
                    self.find_in_libraries(descriptor, hash, loader.shared_libraries())?
                }
                SearchStep::OwnDexFiles => self.find_in_own_dex_files(descriptor, loader)?,
                SearchStep::SharedLibrariesAfter => {
                    self.find_in_libraries(descriptor, hash, loader.shared_libraries_after())?
                }
            };
            if let Some(class) = found {
                trace!(descriptor, loader = ?loader, ?step, "found class");
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    fn find_in_libraries(
        &self,
        descriptor: &str,
        hash: u32,
        libraries: &[Arc<ClassLoader>],
    ) -> Result<Option<Arc<Class>>, LinkError> {
        for library in libraries {
            if let Some(class) = self.find_in_loader(descriptor, hash, library)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }

    fn find_in_own_dex_files(
        &self,
        descriptor: &str,
        loader: &Arc<ClassLoader>,
    ) -> Result<Option<Arc<Class>>, LinkError> {
        for dex_file in loader.dex_files() {
            if let Some((idx, _)) = dex_file.find_class_def(descriptor) {
                return self
                    .define_class_at(descriptor, loader, dex_file, idx)
                    .map(Some);
            }
        }
        Ok(None)
    }

    /// Asks a loader of unknown shape through its own search contract.
    fn find_with_callback(
        &self,
        descriptor: &str,
        hash: u32,
        loader: &Arc<ClassLoader>,
    ) -> Result<Arc<Class>, LinkError> {
        let Some(callback) = loader.find_class_callback() else {
            return Err(LinkError::ClassNotFound(descriptor.to_string()));
        };
        let Some(result) = callback.load_class(self, loader, descriptor)? else {
            return Err(LinkError::ClassNotFound(descriptor.to_string()));
        };
        if result.descriptor() != descriptor {
            let message = format!(
                "Initiating class loader of type {} returned class {} instead of {}.",
                loader.kind_name(),
                result.pretty_descriptor(),
                pretty_descriptor(descriptor)
            );
            warn!("{}", message);
            return Err(LinkError::no_class_def(message));
        }
        // The loader may have been asked concurrently and returned a
        // different object for the same name. Keep whichever got in first.
        if let Some(existing) = self.table_lookup(loader, descriptor, hash) {
            if !Arc::ptr_eq(&existing, &result) {
                warn!(
                    "Initiating class loader of type {} is not well-behaved; it returned a different Class for racing loadClass(\"{}\").",
                    loader.kind_name(),
                    pretty_descriptor(descriptor)
                );
            }
            return self.ensure_resolved(existing);
        }
        if let Some(existing) = self.table_insert_initiating(loader, &result) {
            if !Arc::ptr_eq(&existing, &result) {
                warn!(
                    "Initiating class loader of type {} is not well-behaved; it returned a different Class for racing loadClass(\"{}\").",
                    loader.kind_name(),
                    pretty_descriptor(descriptor)
                );
                return self.ensure_resolved(existing);
            }
        }
        self.ensure_resolved(result)
    }

    /// Synthesizes the array type `descriptor` in its component's defining
    /// loader.
    fn create_array_class(
        &self,
        descriptor: &str,
        hash: u32,
        loader: &Arc<ClassLoader>,
    ) -> Result<Arc<Class>, LinkError> {
        let component_desc = component_descriptor(descriptor)
            .ok_or_else(|| LinkError::ClassNotFound(descriptor.to_string()))?;
        let component = self.find_class(component_desc, loader)?;
        if component.primitive_type() == Some(Primitive::Void) {
            return Err(LinkError::no_class_def(
                "Attempt to create array of void primitive type",
            ));
        }
        let defining = self.loader_of(&component)?;
        if defining.id() != loader.id() {
            if let Some(existing) = self.table_lookup(&defining, descriptor, hash) {
                self.table_insert_initiating(loader, &existing);
                return Ok(existing);
            }
        }

        let object = self.find_system_class(OBJECT_DESCRIPTOR)?;
        let iftable = self.array_iftable()?;
        let flags = ((component.access_flags() & AccessFlags::JAVA_FLAGS_MASK)
            - AccessFlags::INTERFACE)
            | AccessFlags::ABSTRACT
            | AccessFlags::FINAL;
        let class = Arc::new(Class::new_array(
            descriptor,
            Arc::clone(&component),
            &defining,
            flags,
        ));
        {
            let _lock = ObjectLock::new(class.monitor(), &self.metrics);
            {
                let mut linkage = class.linkage_mut();
                linkage.vtable = object.vtable();
                linkage.imt = object.imt();
                linkage.object_size = object.object_size();
                linkage.iftable = iftable;
                linkage.super_class = Some(object);
            }
            class.set_status(ClassStatus::VisiblyInitialized);
        }
        let class = match self.table_insert(&defining, Arc::clone(&class)) {
            Some(existing) => existing,
            None => {
                debug!(descriptor, loader = ?defining, "created array class");
                class
            }
        };
        if defining.id() != loader.id() {
            self.table_insert_initiating(loader, &class);
        }
        Ok(class)
    }

    /// `[Cloneable, Serializable]`, resolved once and shared by every array.
    fn array_iftable(&self) -> Result<Arc<IfTable>, LinkError> {
        let mut cached = self.array_iftable.lock();
        if let Some(iftable) = cached.as_ref() {
            return Ok(Arc::clone(iftable));
        }
        let mut entries = vec![];
        for descriptor in [CLONEABLE_DESCRIPTOR, SERIALIZABLE_DESCRIPTOR] {
            entries.push(IfTableEntry {
                interface: self.find_system_class(descriptor)?,
                methods: SharedTable::empty(),
            });
        }
        let iftable = Arc::new(IfTable::new(entries));
        *cached = Some(Arc::clone(&iftable));
        Ok(iftable)
    }

    /// Resolves a type named by code in `referrer`, caching it in the
    /// referrer's dex cache.
    pub fn resolve_type(
        &self,
        descriptor: &str,
        referrer: &Class,
    ) -> Result<Arc<Class>, LinkError> {
        if let Some(cached) = referrer
            .dex_cache()
            .and_then(|cache| cache.resolved_type(descriptor))
        {
            return Ok(cached);
        }
        let loader = self.loader_of(referrer)?;
        let class = self.find_class(descriptor, &loader).map_err(|e| match e {
            LinkError::ClassNotFound(_) => LinkError::NoClassDefFound {
                message: format!("Failed resolution of: {}", descriptor),
                cause: Some(Box::new(e)),
            },
            other => other,
        })?;
        if let Some(cache) = referrer.dex_cache() {
            cache.set_resolved_type(descriptor, &class);
        }
        Ok(class)
    }

    /// Resolves a method reference made by code in `referrer`.
    pub fn resolve_method(
        &self,
        method_ref: MethodRef<'_>,
        referrer: &Class,
        invoke_type: InvokeType,
    ) -> Result<Arc<Method>, LinkError> {
        let cache = referrer.dex_cache();
        if let Some(cached) = cache.and_then(|c| c.resolved_method(method_ref.method_idx)) {
            check_invoke_type(&cached, invoke_type)?;
            return Ok(cached);
        }
        let class = self.resolve_type(method_ref.class, referrer)?;
        let found = if class.is_interface() {
            if invoke_type != InvokeType::Interface && invoke_type != InvokeType::Static
                && invoke_type != InvokeType::Direct && invoke_type != InvokeType::Super
            {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "Found interface {}, but class was expected",
                    class.pretty_descriptor()
                )));
            }
            class.find_interface_method(method_ref.name, method_ref.signature)
        } else {
            if invoke_type == InvokeType::Interface {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "Found class {}, but interface was expected",
                    class.pretty_descriptor()
                )));
            }
            class.find_class_method(method_ref.name, method_ref.signature)
        };
        let method = found.ok_or_else(|| {
            LinkError::NoSuchMethod(format!(
                "No {} method {}{} in class {} or its super classes",
                invoke_type_name(invoke_type),
                method_ref.name,
                method_ref.signature,
                class.pretty_descriptor()
            ))
        })?;
        check_invoke_type(&method, invoke_type)?;
        let declaring = method.declaring_class().unwrap_or_else(|| Arc::clone(&class));
        if !referrer.can_access_member(&declaring, method.access_flags()) {
            return Err(LinkError::IllegalAccess(format!(
                "Method '{}' is inaccessible to class '{}'",
                method.pretty_method(),
                referrer.pretty_descriptor()
            )));
        }
        if let Some(cache) = cache {
            cache.set_resolved_method(method_ref.method_idx, &method);
        }
        Ok(method)
    }

    /// Resolves a field reference made by code in `referrer`.
    pub fn resolve_field(
        &self,
        field_ref: FieldRef<'_>,
        referrer: &Class,
        is_static: bool,
    ) -> Result<Arc<Field>, LinkError> {
        let cache = referrer.dex_cache();
        if let Some(cached) = cache.and_then(|c| c.resolved_field(field_ref.field_idx)) {
            return Ok(cached);
        }
        let class = self.resolve_type(field_ref.class, referrer)?;
        let found = if is_static {
            class.find_static_field(field_ref.name, field_ref.type_descriptor)
        } else {
            class.find_instance_field(field_ref.name, field_ref.type_descriptor)
        };
        let field = found.ok_or_else(|| {
            LinkError::NoSuchField(format!(
                "No {}field {} of type {} in class {} or its superclasses",
                if is_static { "static " } else { "" },
                field_ref.name,
                field_ref.type_descriptor,
                class.pretty_descriptor()
            ))
        })?;
        let declaring = field.declaring_class().unwrap_or_else(|| Arc::clone(&class));
        if !referrer.can_access_member(&declaring, field.access_flags()) {
            return Err(LinkError::IllegalAccess(format!(
                "Field '{}' is inaccessible to class '{}'",
                field.pretty_field(),
                referrer.pretty_descriptor()
            )));
        }
        if let Some(cache) = cache {
            cache.set_resolved_field(field_ref.field_idx, &field);
        }
        Ok(field)
    }

    /// The interned string constant `value` of `referrer`'s compiled unit.
    pub fn resolve_string(&self, value: &str, referrer: &Class) -> Arc<str> {
        match referrer.dex_cache() {
            Some(cache) => cache.intern_string(value),
            None => Arc::from(value),
        }
    }

    pub fn num_loaded_classes(&self, loader: &ClassLoader) -> usize {
        let mut count = 0;
        self.visit_classes(loader, |_| {
            count += 1;
            true
        });
        count
    }

    pub(crate) fn record_arena_bytes(&self, bytes: u64) {
        self.metrics.arena_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

fn invoke_type_name(invoke_type: InvokeType) -> &'static str {
    match invoke_type {
        InvokeType::Static => "static",
        InvokeType::Direct => "direct",
        InvokeType::Virtual => "virtual",
        InvokeType::Super => "super",
        InvokeType::Interface => "interface",
    }
}

fn check_invoke_type(method: &Method, invoke_type: InvokeType) -> Result<(), LinkError> {
    let is_static = method.is_static();
    if is_static != (invoke_type == InvokeType::Static) {
        return Err(LinkError::IncompatibleClassChange(format!(
            "The method '{}' was expected to be of type {} but instead was found to be of type {}",
            method.pretty_method(),
            invoke_type_name(invoke_type),
            if is_static { "static" } else { "virtual" }
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::builder::DexFileBuilder;

    fn core() -> Arc<crate::dex::DexFile> {
        DexFileBuilder::new("core.dex").with_core_library().build_arc()
    }

    #[test]
    fn test_missing_class() {
        let linker = ClassLinker::new(vec![core()]);
        let err = linker.find_system_class("Lcom/example/Missing;").unwrap_err();
        assert_eq!(err, LinkError::ClassNotFound("Lcom/example/Missing;".into()));
        assert!(linker.find_system_class("Q").is_err());
    }

    #[test]
    fn test_array_classes_share_iftable() {
        let linker = ClassLinker::new(vec![core()]);
        let ints = linker.find_system_class("[I").unwrap();
        let strings = linker.find_system_class("[[Ljava/lang/String;").unwrap();
        assert!(ints.is_array());
        assert!(ints.is_visibly_initialized());
        assert!(ints.is_final() && ints.is_abstract());
        assert!(Arc::ptr_eq(&ints.iftable(), &strings.iftable()));
        assert_eq!(ints.iftable().len(), 2);
        let object = linker.find_system_class(OBJECT_DESCRIPTOR).unwrap();
        assert!(ints.vtable().ptr_eq(&object.vtable()));
        assert!(Arc::ptr_eq(&ints, &linker.find_system_class("[I").unwrap()));
        assert_eq!(strings.component_type().unwrap().descriptor(), "[Ljava/lang/String;");
    }

    #[test]
    fn test_void_arrays_are_rejected() {
        let linker = ClassLinker::new(vec![core()]);
        let err = linker.find_system_class("[V").unwrap_err();
        assert!(matches!(err, LinkError::NoClassDefFound { .. }));
    }

    #[test]
    fn test_resolve_type_wraps_not_found() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LApp;", |c| c.public())
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![dex]);
        let app = linker.find_class("LApp;", &loader).unwrap();
        let err = linker.resolve_type("LGone;", &app).unwrap_err();
        assert_eq!(err.to_string(), "Failed resolution of: LGone;");
        let object = linker.resolve_type(OBJECT_DESCRIPTOR, &app).unwrap();
        assert!(object.is_object_class());
        assert_eq!(app.dex_cache().unwrap().num_resolved_types(), 1);
    }

    #[test]
    fn test_resolve_members() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LApp;", |c| {
                c.public()
                    .static_field("COUNT", "I")
                    .instance_field("name", "Ljava/lang/String;")
                    .virtual_method("run", "()V")
            })
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![dex]);
        let app = linker.find_class("LApp;", &loader).unwrap();

        let sig = MethodSignature::parse("()V").unwrap();
        let run = MethodRef {
            method_idx: 100,
            class: "LApp;",
            name: "run",
            signature: &sig,
        };
        let method = linker.resolve_method(run, &app, InvokeType::Virtual).unwrap();
        assert_eq!(method.name(), "run");
        let err = linker.resolve_method(run, &app, InvokeType::Static).unwrap_err();
        assert!(matches!(err, LinkError::IncompatibleClassChange(_)));

        let hash = MethodRef {
            method_idx: 101,
            class: "LApp;",
            name: "hashCode",
            signature: &MethodSignature::parse("()I").unwrap(),
        };
        let inherited = linker.resolve_method(hash, &app, InvokeType::Virtual).unwrap();
        assert!(inherited.declaring_class().unwrap().is_object_class());

        let count = FieldRef {
            field_idx: 7,
            class: "LApp;",
            name: "COUNT",
            type_descriptor: "I",
        };
        assert!(linker.resolve_field(count, &app, true).is_ok());
        let err = linker.resolve_field(
            FieldRef { name: "missing", field_idx: 8, ..count },
            &app,
            true,
        );
        assert!(matches!(err, Err(LinkError::NoSuchField(_))));

        let s = linker.resolve_string("hi", &app);
        assert!(Arc::ptr_eq(&s, &linker.resolve_string("hi", &app)));
    }
}
