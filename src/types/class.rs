//! The runtime type object.
use crate::{
    dex::{AccessFlags, ClassDef, DexFile, MethodSignature},
    error::LinkError,
    linker::{dex_cache::DexCache, loader::ClassLoader, BOOT_LOADER_ID},
    types::{
        descriptor::{compute_modified_utf8_hash, package_of, pretty_descriptor, Primitive},
        members::{Field, Method},
        status::ClassStatus,
        tables::{IfTable, ImTable, VTable},
    },
    utils::sync::{
        current_thread_id, Arc, AtomicU32, AtomicU64, AtomicU8, Mutex, Ordering, RwLock,
        RwLockReadGuard, RwLockWriteGuard, Weak, NO_THREAD,
    },
    value::Value,
    vm::sync::Monitor,
};
use std::fmt::{Debug, Formatter};

/// Bytes every instance carries before its first field.
pub const OBJECT_HEADER_SIZE: u32 = 8;
/// Bytes of the type object itself before its first static field.
pub const CLASS_HEADER_SIZE: u32 = 128;
/// Reference bitmap value meaning "too many references, walk the fields".
pub const CLASS_WALK_SUPER: u32 = 0x8000_0000;
/// References representable in the bitmap; the top bit is the walk marker.
pub const MAX_BITMAP_REFERENCES: u32 = 31;

/// Everything linking fills in after allocation. Written by the defining
/// thread while it holds the type's monitor, read-only from `Resolved` on.
pub(crate) struct ClassLinkage {
    pub super_class: Option<Arc<Class>>,
    pub interfaces: Vec<Arc<Class>>,
    pub static_fields: Arc<[Arc<Field>]>,
    pub instance_fields: Arc<[Arc<Field>]>,
    pub direct_methods: Arc<[Arc<Method>]>,
    pub virtual_methods: Arc<[Arc<Method>]>,
    pub copied_methods: Arc<[Arc<Method>]>,
    pub vtable: VTable,
    pub iftable: Arc<IfTable>,
    pub imt: Option<Arc<ImTable>>,
    pub object_size: u32,
    pub class_size: u32,
    pub num_reference_instance_fields: u32,
    pub num_reference_static_fields: u32,
    pub reference_instance_offsets: u32,
}

impl ClassLinkage {
    fn empty() -> Self {
        Self {
            super_class: None,
            interfaces: vec![],
            static_fields: Arc::from(Vec::new()),
            instance_fields: Arc::from(Vec::new()),
            direct_methods: Arc::from(Vec::new()),
            virtual_methods: Arc::from(Vec::new()),
            copied_methods: Arc::from(Vec::new()),
            vtable: VTable::empty(),
            iftable: Arc::new(IfTable::default()),
            imt: None,
            object_size: 0,
            class_size: CLASS_HEADER_SIZE,
            num_reference_instance_fields: 0,
            num_reference_static_fields: 0,
            reference_instance_offsets: 0,
        }
    }
}

/// A type known to the runtime: a class or interface defined from a compiled
/// unit, a synthesized array type, or a primitive type.
pub struct Class {
    descriptor: Box<str>,
    descriptor_hash: u32,
    loader: Weak<ClassLoader>,
    loader_id: u64,
    dex_file: Option<Arc<DexFile>>,
    class_def_idx: Option<u32>,
    dex_cache: Option<Arc<DexCache>>,
    primitive_type: Option<Primitive>,
    component_type: Option<Arc<Class>>,
    status: AtomicU8,
    access_flags: AtomicU32,
    /// Thread defining, verifying or initializing the type.
    clinit_thread_id: AtomicU64,
    monitor: Monitor,
    linkage: RwLock<ClassLinkage>,
    static_values: RwLock<Vec<Value>>,
    /// First failure, replayed on every later attempt.
    erroneous_cause: Mutex<Option<LinkError>>,
}

impl Class {
    /// An unlinked type for a class definition, in status `NotReady`.
    pub(crate) fn new_unlinked(
        descriptor: &str,
        loader: &Arc<ClassLoader>,
        dex_file: Arc<DexFile>,
        class_def_idx: u32,
        dex_cache: Arc<DexCache>,
        access_flags: AccessFlags,
    ) -> Self {
        let mut class = Self::bare(descriptor, loader, access_flags);
        class.dex_file = Some(dex_file);
        class.class_def_idx = Some(class_def_idx);
        class.dex_cache = Some(dex_cache);
        class
    }

    pub(crate) fn new_primitive(primitive: Primitive, boot: &Arc<ClassLoader>) -> Self {
        let mut class = Self::bare(
            primitive.descriptor(),
            boot,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
        );
        class.primitive_type = Some(primitive);
        class.status = AtomicU8::new(ClassStatus::VisiblyInitialized as u8);
        class
    }

    /// An array type. Linkage is filled in by the resolver before the type is
    /// published.
    pub(crate) fn new_array(
        descriptor: &str,
        component: Arc<Class>,
        loader: &Arc<ClassLoader>,
        access_flags: AccessFlags,
    ) -> Self {
        let mut class = Self::bare(descriptor, loader, access_flags);
        class.component_type = Some(component);
        class
    }

    fn bare(descriptor: &str, loader: &Arc<ClassLoader>, access_flags: AccessFlags) -> Self {
        Self {
            descriptor: descriptor.into(),
            descriptor_hash: compute_modified_utf8_hash(descriptor),
            loader: Arc::downgrade(loader),
            loader_id: loader.id(),
            dex_file: None,
            class_def_idx: None,
            dex_cache: None,
            primitive_type: None,
            component_type: None,
            status: AtomicU8::new(ClassStatus::NotReady as u8),
            access_flags: AtomicU32::new(access_flags.bits()),
            clinit_thread_id: AtomicU64::new(NO_THREAD),
            monitor: Monitor::new(),
            linkage: RwLock::new(ClassLinkage::empty()),
            static_values: RwLock::new(vec![]),
            erroneous_cause: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn descriptor_hash(&self) -> u32 {
        self.descriptor_hash
    }

    pub fn pretty_descriptor(&self) -> String {
        pretty_descriptor(&self.descriptor)
    }

    /// The defining loader, `None` once it has been unloaded.
    pub fn class_loader(&self) -> Option<Arc<ClassLoader>> {
        self.loader.upgrade()
    }

    pub fn loader_id(&self) -> u64 {
        self.loader_id
    }

    pub fn is_boot_class(&self) -> bool {
        self.loader_id == BOOT_LOADER_ID
    }

    pub fn dex_file(&self) -> Option<&Arc<DexFile>> {
        self.dex_file.as_ref()
    }

    pub fn class_def_idx(&self) -> Option<u32> {
        self.class_def_idx
    }

    pub fn class_def(&self) -> Option<&ClassDef> {
        Some(self.dex_file.as_ref()?.class_def(self.class_def_idx?))
    }

    pub fn dex_cache(&self) -> Option<&Arc<DexCache>> {
        self.dex_cache.as_ref()
    }

    pub fn source_file(&self) -> Option<&str> {
        self.class_def()?.source_file.as_deref()
    }

    pub fn primitive_type(&self) -> Option<Primitive> {
        self.primitive_type
    }

    pub fn component_type(&self) -> Option<&Arc<Class>> {
        self.component_type.as_ref()
    }

    pub fn status(&self) -> ClassStatus {
        ClassStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn access_flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags.load(Ordering::Acquire))
    }

    pub(crate) fn add_access_flags(&self, flags: AccessFlags) {
        self.access_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn is_public(&self) -> bool {
        self.access_flags().is_public()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags().is_final()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags().is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags().is_abstract()
    }

    pub fn is_instantiable(&self) -> bool {
        !self.is_primitive() && !self.is_interface() && !self.is_abstract() || self.is_array()
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive_type.is_some()
    }

    pub fn is_array(&self) -> bool {
        self.component_type.is_some()
    }

    pub fn is_object_class(&self) -> bool {
        self.is_boot_class() && &*self.descriptor == "Ljava/lang/Object;"
    }

    pub fn is_finalizable(&self) -> bool {
        self.access_flags().contains(AccessFlags::FINALIZABLE)
    }

    pub fn has_default_methods(&self) -> bool {
        self.access_flags().contains(AccessFlags::HAS_DEFAULT_METHOD)
    }

    pub fn is_recursively_initialized(&self) -> bool {
        self.access_flags()
            .contains(AccessFlags::RECURSIVELY_INITIALIZED)
    }

    pub fn is_verification_attempted(&self) -> bool {
        self.access_flags()
            .contains(AccessFlags::VERIFICATION_ATTEMPTED)
    }

    pub fn is_erroneous(&self) -> bool {
        self.status().is_erroneous()
    }

    pub fn is_resolved(&self) -> bool {
        self.status().is_resolved()
    }

    pub fn is_verified(&self) -> bool {
        self.status().is_verified()
    }

    pub fn is_initialized(&self) -> bool {
        self.status().is_initialized()
    }

    pub fn is_visibly_initialized(&self) -> bool {
        self.status() == ClassStatus::VisiblyInitialized
    }

    pub fn clinit_thread_id(&self) -> u64 {
        self.clinit_thread_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_clinit_thread_id(&self, thread_id: u64) {
        self.clinit_thread_id.store(thread_id, Ordering::Release);
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Moves the type to `status` and wakes waiters on its monitor.
    ///
    /// Callers hold the monitor, except for the publisher's final step to
    /// `VisiblyInitialized` which nobody waits for. Moving into an error
    /// state goes through [`Class::set_erroneous`].
    pub(crate) fn set_status(&self, status: ClassStatus) {
        let old = self.status();
        debug_assert!(
            status >= old
                || status.is_erroneous()
                || (old == ClassStatus::RetryVerificationAtRuntime
                    && status == ClassStatus::Verifying),
            "illegal status change of {} from {} to {}",
            self.descriptor,
            old,
            status
        );
        debug_assert!(
            status == ClassStatus::VisiblyInitialized || old == ClassStatus::NotReady
                || self.monitor.is_held_by(current_thread_id()),
            "status of {} changed to {} without holding its lock",
            self.descriptor,
            status
        );
        if old.is_erroneous() && status.is_erroneous() {
            return;
        }
        self.status.store(status as u8, Ordering::Release);

        let hidden = old == ClassStatus::Initialized && status == ClassStatus::VisiblyInitialized;
        if !hidden
            && (old >= ClassStatus::Resolved
                || status >= ClassStatus::Resolved
                || status.is_erroneous())
        {
            self.monitor.notify_all();
        }
    }

    /// Records `error` (unless an earlier one is already recorded) and moves
    /// the type to the matching error state.
    pub(crate) fn set_erroneous(&self, error: &LinkError) {
        {
            let mut cause = self.erroneous_cause.lock();
            if cause.is_none() {
                *cause = Some(error.clone());
            }
        }
        let status = if self.is_resolved() {
            ClassStatus::ErrorResolved
        } else {
            ClassStatus::ErrorUnresolved
        };
        self.set_status(status);
    }

    /// The failure that made this type erroneous.
    pub fn erroneous_cause(&self) -> Option<LinkError> {
        self.erroneous_cause.lock().clone()
    }

    pub(crate) fn linkage(&self) -> RwLockReadGuard<'_, ClassLinkage> {
        self.linkage.read()
    }

    pub(crate) fn linkage_mut(&self) -> RwLockWriteGuard<'_, ClassLinkage> {
        self.linkage.write()
    }

    pub fn super_class(&self) -> Option<Arc<Class>> {
        self.linkage.read().super_class.clone()
    }

    pub fn interfaces(&self) -> Vec<Arc<Class>> {
        self.linkage.read().interfaces.clone()
    }

    pub fn static_fields(&self) -> Arc<[Arc<Field>]> {
        self.linkage.read().static_fields.clone()
    }

    pub fn instance_fields(&self) -> Arc<[Arc<Field>]> {
        self.linkage.read().instance_fields.clone()
    }

    pub fn direct_methods(&self) -> Arc<[Arc<Method>]> {
        self.linkage.read().direct_methods.clone()
    }

    /// Virtual methods declared by this type.
    pub fn virtual_methods(&self) -> Arc<[Arc<Method>]> {
        self.linkage.read().virtual_methods.clone()
    }

    /// Miranda, default and default-conflict methods synthesized for this type.
    pub fn copied_methods(&self) -> Arc<[Arc<Method>]> {
        self.linkage.read().copied_methods.clone()
    }

    pub fn vtable(&self) -> VTable {
        self.linkage.read().vtable.clone()
    }

    pub fn iftable(&self) -> Arc<IfTable> {
        self.linkage.read().iftable.clone()
    }

    pub fn imt(&self) -> Option<Arc<ImTable>> {
        self.linkage.read().imt.clone()
    }

    /// Instance size in bytes, header included.
    pub fn object_size(&self) -> u32 {
        self.linkage.read().object_size
    }

    /// Size of the type object, header plus static fields.
    pub fn class_size(&self) -> u32 {
        self.linkage.read().class_size
    }

    pub fn num_reference_instance_fields(&self) -> u32 {
        self.linkage.read().num_reference_instance_fields
    }

    pub fn num_reference_static_fields(&self) -> u32 {
        self.linkage.read().num_reference_static_fields
    }

    pub fn reference_instance_offsets(&self) -> u32 {
        self.linkage.read().reference_instance_offsets
    }

    pub fn class_initializer(&self) -> Option<Arc<Method>> {
        self.linkage
            .read()
            .direct_methods
            .iter()
            .find(|m| m.is_class_initializer())
            .cloned()
    }

    pub fn static_value(&self, index: usize) -> Option<Value> {
        self.static_values.read().get(index).cloned()
    }

    pub(crate) fn set_static_value(&self, index: usize, value: Value) {
        if let Some(slot) = self.static_values.write().get_mut(index) {
            *slot = value;
        }
    }

    pub(crate) fn allocate_statics(&self, values: Vec<Value>) {
        *self.static_values.write() = values;
    }

    /// Reads a static field by name.
    pub fn get_static(&self, name: &str) -> Option<Value> {
        let index = self
            .linkage
            .read()
            .static_fields
            .iter()
            .position(|f| f.name() == name)?;
        self.static_value(index)
    }

    pub fn is_subclass_of(&self, other: &Class) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut current = self.super_class();
        while let Some(class) = current {
            if std::ptr::eq(&*class, other) {
                return true;
            }
            current = class.super_class();
        }
        false
    }

    pub fn implements(&self, interface: &Class) -> bool {
        self.iftable().contains(interface)
    }

    /// Whether a value of type `src` can be stored in a location of this type.
    pub fn is_assignable_from(&self, src: &Class) -> bool {
        if std::ptr::eq(self, src) {
            return true;
        }
        if self.is_object_class() {
            return !src.is_primitive();
        }
        if self.is_interface() {
            return src.implements(self);
        }
        if src.is_array() {
            return match (self.component_type(), src.component_type()) {
                (Some(dst), Some(src)) => !src.is_primitive() && dst.is_assignable_from(src),
                _ => false,
            };
        }
        !src.is_interface() && src.is_subclass_of(self)
    }

    /// Same runtime package: same defining loader and same descriptor package.
    pub fn is_in_same_package(&self, other: &Class) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.loader_id != other.loader_id {
            return false;
        }
        package_of(&self.descriptor) == package_of(&other.descriptor)
    }

    /// Whether code in this type may name `other`.
    pub fn can_access(&self, other: &Class) -> bool {
        other.is_public() || self.is_in_same_package(other)
    }

    /// Whether code in this type may use a member of `declaring` with the
    /// given access flags.
    pub fn can_access_member(&self, declaring: &Class, member_flags: AccessFlags) -> bool {
        if member_flags.is_public() {
            return true;
        }
        if member_flags.is_private() {
            return std::ptr::eq(self, declaring);
        }
        if self.is_in_same_package(declaring) {
            return true;
        }
        member_flags.is_protected() && !self.is_interface() && self.is_subclass_of(declaring)
    }

    pub fn find_declared_direct_method(
        &self,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<Arc<Method>> {
        self.linkage
            .read()
            .direct_methods
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
            .cloned()
    }

    pub fn find_declared_virtual_method(
        &self,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<Arc<Method>> {
        self.linkage
            .read()
            .virtual_methods
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
            .cloned()
    }

    pub fn find_declared_method(
        &self,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<Arc<Method>> {
        self.find_declared_direct_method(name, signature)
            .or_else(|| self.find_declared_virtual_method(name, signature))
    }

    /// Searches this type and its superclasses, then the copied methods of
    /// this type.
    pub fn find_class_method(
        &self,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<Arc<Method>> {
        if let Some(found) = self.find_declared_method(name, signature) {
            return Some(found);
        }
        let mut current = self.super_class();
        while let Some(class) = current {
            if let Some(found) = class.find_declared_method(name, signature) {
                return Some(found);
            }
            current = class.super_class();
        }
        self.linkage
            .read()
            .copied_methods
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
            .cloned()
    }

    /// Searches this interface, its super-interfaces, then the public
    /// virtual methods of `Object`.
    pub fn find_interface_method(
        &self,
        name: &str,
        signature: &MethodSignature,
    ) -> Option<Arc<Method>> {
        if let Some(found) = self.find_declared_virtual_method(name, signature) {
            return Some(found);
        }
        for entry in self.iftable().entries() {
            if let Some(found) = entry.interface.find_declared_virtual_method(name, signature) {
                return Some(found);
            }
        }
        let object = self.super_class()?;
        object
            .find_declared_virtual_method(name, signature)
            .filter(|m| m.is_public())
    }

    pub fn find_declared_instance_field(&self, name: &str, ty: &str) -> Option<Arc<Field>> {
        self.linkage
            .read()
            .instance_fields
            .iter()
            .find(|f| f.name() == name && f.type_descriptor() == ty)
            .cloned()
    }

    pub fn find_declared_static_field(&self, name: &str, ty: &str) -> Option<Arc<Field>> {
        self.linkage
            .read()
            .static_fields
            .iter()
            .find(|f| f.name() == name && f.type_descriptor() == ty)
            .cloned()
    }

    pub fn find_instance_field(&self, name: &str, ty: &str) -> Option<Arc<Field>> {
        if let Some(found) = self.find_declared_instance_field(name, ty) {
            return Some(found);
        }
        self.super_class()?.find_instance_field(name, ty)
    }

    /// This type, then its direct interfaces (recursively), then its
    /// superclass.
    pub fn find_static_field(&self, name: &str, ty: &str) -> Option<Arc<Field>> {
        if let Some(found) = self.find_declared_static_field(name, ty) {
            return Some(found);
        }
        for interface in self.interfaces() {
            if let Some(found) = interface.find_static_field(name, ty) {
                return Some(found);
            }
        }
        self.super_class()?.find_static_field(name, ty)
    }

    /// Byte offsets of every reference field of an instance, superclass
    /// fields included.
    pub fn reference_instance_field_offsets(&self) -> Vec<u32> {
        let bitmap = self.reference_instance_offsets();
        if bitmap != CLASS_WALK_SUPER {
            return (0..MAX_BITMAP_REFERENCES)
                .filter(|bit| bitmap & (1 << bit) != 0)
                .map(|bit| OBJECT_HEADER_SIZE + bit * 4)
                .collect();
        }
        let mut offsets = vec![];
        let mut current = Some(self.instance_fields());
        let mut super_class = self.super_class();
        while let Some(fields) = current {
            offsets.extend(fields.iter().filter(|f| f.is_reference()).map(|f| f.offset()));
            current = super_class.as_ref().map(|c| c.instance_fields());
            super_class = super_class.and_then(|c| c.super_class());
        }
        offsets.sort_unstable();
        offsets
    }

    /// Multi-line description of the linked layout.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let linkage = self.linkage.read();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} [{}] flags={:#x} status={}",
            self.pretty_descriptor(),
            self.descriptor,
            self.access_flags().bits(),
            self.status()
        );
        if let Some(super_class) = &linkage.super_class {
            let _ = writeln!(out, "  super: {}", super_class.pretty_descriptor());
        }
        for interface in &linkage.interfaces {
            let _ = writeln!(out, "  implements: {}", interface.pretty_descriptor());
        }
        let _ = writeln!(
            out,
            "  object_size={} class_size={} reference_offsets={:#010x}",
            linkage.object_size, linkage.class_size, linkage.reference_instance_offsets
        );
        for field in linkage.static_fields.iter() {
            let _ = writeln!(out, "  static {} @ {}", field.name(), field.offset());
        }
        for field in linkage.instance_fields.iter() {
            let _ = writeln!(out, "  field {} {} @ {}", field.type_descriptor(), field.name(), field.offset());
        }
        for (slot, method) in linkage.vtable.iter().enumerate() {
            let _ = writeln!(out, "  vtable[{}] {:?}", slot, method);
        }
        for entry in linkage.iftable.entries() {
            let _ = writeln!(
                out,
                "  iftable {} ({} methods)",
                entry.interface.pretty_descriptor(),
                entry.methods.len()
            );
            for (i, method) in entry.methods.iter().enumerate() {
                let _ = writeln!(out, "    [{}] {:?}", i, method);
            }
        }
        for method in linkage.copied_methods.iter() {
            let _ = writeln!(out, "  copied {:?}", method);
        }
        if let Some(imt) = &linkage.imt {
            let _ = writeln!(
                out,
                "  imt: {} occupied, {} conflicts",
                imt.occupied_slots(),
                imt.conflict_slots()
            );
        }
        out
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.pretty_descriptor(), self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::loader::ClassLoader;

    fn boot() -> Arc<ClassLoader> {
        ClassLoader::new_boot(vec![])
    }

    #[test]
    fn test_primitive_classes_start_initialized() {
        let boot = boot();
        let int = Class::new_primitive(Primitive::Int, &boot);
        assert_eq!(int.descriptor(), "I");
        assert!(int.is_primitive());
        assert!(int.is_visibly_initialized());
        assert!(int.is_boot_class());
        assert!(!int.is_instantiable());
    }

    #[test]
    fn test_erroneous_keeps_first_cause() {
        let boot = boot();
        let class = Class::new_primitive(Primitive::Int, &boot);
        class.status.store(ClassStatus::Loaded as u8, Ordering::Release);
        let lock = crate::vm::sync::ObjectLock::new(class.monitor(), &Default::default());
        class.set_erroneous(&LinkError::verify("first"));
        class.set_erroneous(&LinkError::verify("second"));
        drop(lock);
        assert_eq!(class.status(), ClassStatus::ErrorUnresolved);
        assert_eq!(class.erroneous_cause(), Some(LinkError::verify("first")));
    }

    #[test]
    fn test_same_package_requires_same_loader() {
        let boot = boot();
        let other = ClassLoader::new_path(vec![], Some(boot.clone()));
        let component = Arc::new(Class::new_primitive(Primitive::Int, &boot));
        let a = Class::new_array("[Lp/A;", component.clone(), &boot, AccessFlags::PUBLIC);
        let b = Class::new_array("[Lp/B;", component.clone(), &boot, AccessFlags::PUBLIC);
        let c = Class::new_array("[Lp/C;", component, &other, AccessFlags::PUBLIC);
        assert!(a.is_in_same_package(&b));
        assert!(!a.is_in_same_package(&c));
        assert!(a.can_access(&c));
    }
}
