use crate::{
    dex::{AccessFlags, CodeItem, MethodSignature},
    types::{
        class::Class,
        descriptor::{compute_modified_utf8_hash, field_size, is_reference_descriptor, pretty_descriptor, Primitive},
        tables::IMT_SIZE,
    },
    utils::sync::{Arc, AtomicU16, AtomicU32, AtomicU8, Ordering, Weak},
};
use std::fmt::{Debug, Formatter};

/// Where a call to a method lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryPoint {
    Unset = 0,
    /// Initializes the declaring type on first call, then patches itself.
    ResolutionTrampoline = 1,
    InterpreterBridge = 2,
    CompiledCode = 3,
    JniStub = 4,
    AbstractMethodStub = 5,
    DefaultConflictStub = 6,
}

impl EntryPoint {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EntryPoint::ResolutionTrampoline,
            2 => EntryPoint::InterpreterBridge,
            3 => EntryPoint::CompiledCode,
            4 => EntryPoint::JniStub,
            5 => EntryPoint::AbstractMethodStub,
            6 => EntryPoint::DefaultConflictStub,
            _ => EntryPoint::Unset,
        }
    }
}

/// A field record. Owned by its declaring type's field array.
pub struct Field {
    declaring_class: Weak<Class>,
    field_idx: u32,
    name: Box<str>,
    type_descriptor: Box<str>,
    access_flags: AccessFlags,
    offset: AtomicU32,
}

impl Field {
    pub(crate) fn new(
        declaring_class: Weak<Class>,
        field_idx: u32,
        name: &str,
        type_descriptor: &str,
        access_flags: AccessFlags,
    ) -> Self {
        Self {
            declaring_class,
            field_idx,
            name: name.into(),
            type_descriptor: type_descriptor.into(),
            access_flags,
            offset: AtomicU32::new(0),
        }
    }

    /// The declaring type, `None` once it has been unloaded.
    pub fn declaring_class(&self) -> Option<Arc<Class>> {
        self.declaring_class.upgrade()
    }

    pub fn field_idx(&self) -> u32 {
        self.field_idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_descriptor(&self) -> &str {
        &self.type_descriptor
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_reference(&self) -> bool {
        is_reference_descriptor(&self.type_descriptor)
    }

    pub fn primitive(&self) -> Option<Primitive> {
        Primitive::from_descriptor(&self.type_descriptor)
    }

    /// Storage size in bytes.
    pub fn size(&self) -> u32 {
        field_size(&self.type_descriptor)
    }

    /// Byte offset within the instance (or, for statics, the type object).
    pub fn offset(&self) -> u32 {
        self.offset.load(Ordering::Acquire)
    }

    pub(crate) fn set_offset(&self, offset: u32) {
        self.offset.store(offset, Ordering::Release);
    }

    pub fn pretty_field(&self) -> String {
        let owner = self
            .declaring_class()
            .map(|c| pretty_descriptor(c.descriptor()))
            .unwrap_or_else(|| "<unloaded>".to_string());
        format!(
            "{} {}.{}",
            pretty_descriptor(&self.type_descriptor),
            owner,
            self.name
        )
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.pretty_field(), self.offset())
    }
}

/// How a copied method came to exist on a class that does not declare it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopiedKind {
    /// An abstract interface method with no implementation anywhere.
    Miranda,
    /// The single most specific default method.
    Default,
    /// Two or more unrelated default methods remain unmasked.
    DefaultConflict,
}

/// A method record. Declared methods are owned by their type's method
/// array; copied methods are appended to the array of the class they were
/// synthesized for and keep their interface as declaring type.
pub struct Method {
    declaring_class: Weak<Class>,
    method_idx: u32,
    name: Box<str>,
    signature: MethodSignature,
    access_flags: AtomicU32,
    method_index: AtomicU16,
    entry_point: AtomicU8,
    code: Option<CodeItem>,
    copied_from: Option<Arc<Method>>,
}

impl Method {
    pub(crate) fn new(
        declaring_class: Weak<Class>,
        method_idx: u32,
        name: &str,
        signature: MethodSignature,
        access_flags: AccessFlags,
        code: Option<CodeItem>,
    ) -> Self {
        Self {
            declaring_class,
            method_idx,
            name: name.into(),
            signature,
            access_flags: AtomicU32::new(access_flags.bits()),
            method_index: AtomicU16::new(0),
            entry_point: AtomicU8::new(EntryPoint::Unset as u8),
            code,
            copied_from: None,
        }
    }

    /// Synthesizes a copy of an interface method for an implementing class.
    pub(crate) fn new_copied(origin: &Arc<Method>, kind: CopiedKind) -> Self {
        let origin = origin.origin();
        let mut flags = origin.access_flags() | AccessFlags::COPIED;
        flags.remove(AccessFlags::SKIP_ACCESS_CHECKS);
        match kind {
            CopiedKind::Miranda => {
                flags.remove(AccessFlags::DEFAULT);
                flags.insert(AccessFlags::ABSTRACT);
            }
            CopiedKind::Default => {
                flags.remove(AccessFlags::ABSTRACT);
                flags.insert(AccessFlags::DEFAULT);
            }
            CopiedKind::DefaultConflict => {
                flags.remove(AccessFlags::ABSTRACT | AccessFlags::DEFAULT);
                flags.insert(AccessFlags::DEFAULT_CONFLICT);
            }
        }
        Self {
            declaring_class: origin.declaring_class.clone(),
            method_idx: origin.method_idx,
            name: origin.name.clone(),
            signature: origin.signature.clone(),
            access_flags: AtomicU32::new(flags.bits()),
            method_index: AtomicU16::new(0),
            entry_point: AtomicU8::new(EntryPoint::Unset as u8),
            code: origin.code.clone(),
            copied_from: Some(Arc::clone(origin)),
        }
    }

    pub fn declaring_class(&self) -> Option<Arc<Class>> {
        self.declaring_class.upgrade()
    }

    pub fn method_idx(&self) -> u32 {
        self.method_idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn code(&self) -> Option<&CodeItem> {
        self.code.as_ref()
    }

    pub fn access_flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags.load(Ordering::Acquire))
    }

    pub(crate) fn add_access_flags(&self, flags: AccessFlags) {
        self.access_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Vtable slot for class methods, declaration position for interface
    /// methods. Meaningless for direct methods.
    pub fn method_index(&self) -> u16 {
        self.method_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_method_index(&self, index: u16) {
        self.method_index.store(index, Ordering::Release);
    }

    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint::from_u8(self.entry_point.load(Ordering::Acquire))
    }

    pub(crate) fn set_entry_point(&self, entry_point: EntryPoint) {
        self.entry_point.store(entry_point as u8, Ordering::Release);
    }

    /// The interface method a copied method stands in for.
    pub fn copied_from(&self) -> Option<&Arc<Method>> {
        self.copied_from.as_ref()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags().is_public()
    }

    pub fn is_private(&self) -> bool {
        self.access_flags().is_private()
    }

    pub fn is_static(&self) -> bool {
        self.access_flags().is_static()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags().is_final()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags().is_abstract()
    }

    pub fn is_native(&self) -> bool {
        self.access_flags().is_native()
    }

    pub fn is_constructor(&self) -> bool {
        self.access_flags().is_constructor()
    }

    pub fn is_package_private(&self) -> bool {
        self.access_flags().is_package_private()
    }

    /// Static, private and constructor methods never take a vtable slot.
    pub fn is_direct(&self) -> bool {
        let flags = self.access_flags();
        flags.is_static() || flags.is_private() || flags.is_constructor()
    }

    pub fn is_class_initializer(&self) -> bool {
        self.is_static() && &*self.name == "<clinit>"
    }

    pub fn is_copied(&self) -> bool {
        self.access_flags().contains(AccessFlags::COPIED)
    }

    pub fn is_miranda(&self) -> bool {
        self.is_copied() && self.is_abstract()
    }

    /// A non-abstract interface method, or a copy of one.
    pub fn is_default(&self) -> bool {
        self.access_flags().contains(AccessFlags::DEFAULT)
    }

    pub fn is_default_conflicting(&self) -> bool {
        self.access_flags().contains(AccessFlags::DEFAULT_CONFLICT)
    }

    pub fn skip_access_checks(&self) -> bool {
        self.access_flags().contains(AccessFlags::SKIP_ACCESS_CHECKS)
    }

    pub fn has_same_name_and_signature(&self, other: &Method) -> bool {
        self.name == other.name && self.signature == other.signature
    }

    /// Slot in the interface method table.
    pub fn imt_index(&self) -> usize {
        imt_index_for(&self.name, &self.signature)
    }

    /// The method this one resolves to for identity purposes: copies compare
    /// equal to their interface origin.
    pub fn origin(self: &Arc<Self>) -> &Arc<Method> {
        self.copied_from.as_ref().unwrap_or(self)
    }

    pub fn pretty_method(&self) -> String {
        let owner = self
            .declaring_class()
            .map(|c| pretty_descriptor(c.descriptor()))
            .unwrap_or_else(|| "<unloaded>".to_string());
        let params: Vec<String> = self
            .signature
            .parameters
            .iter()
            .map(|p| pretty_descriptor(p))
            .collect();
        format!(
            "{} {}.{}({})",
            pretty_descriptor(&self.signature.return_type),
            owner,
            self.name,
            params.join(", ")
        )
    }
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pretty_method())?;
        if self.is_copied() {
            write!(f, " [copied]")?;
        }
        Ok(())
    }
}

/// IMT slot for a name and signature. Deterministic across runs so that
/// snapshots stay valid.
pub fn imt_index_for(name: &str, signature: &MethodSignature) -> usize {
    let name_hash = compute_modified_utf8_hash(name);
    let sig_hash = signature
        .parameters
        .iter()
        .chain(std::iter::once(&signature.return_type))
        .fold(0u32, |h, p| {
            h.wrapping_mul(31)
                .wrapping_add(compute_modified_utf8_hash(p))
        });
    (name_hash.wrapping_mul(37).wrapping_add(sig_hash) as usize) % IMT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> MethodSignature {
        MethodSignature::parse(s).unwrap()
    }

    fn detached(name: &str, signature: &str, flags: AccessFlags) -> Arc<Method> {
        Arc::new(Method::new(Weak::new(), 0, name, sig(signature), flags, None))
    }

    #[test]
    fn test_imt_index_in_range_and_stable() {
        let a = imt_index_for("run", &sig("()V"));
        let b = imt_index_for("run", &sig("()V"));
        assert_eq!(a, b);
        assert!(a < IMT_SIZE);
        // Distinct signatures usually land apart; the table only has to
        // cope when they do not.
        let _ = imt_index_for("run", &sig("(I)V"));
    }

    #[test]
    fn test_copied_method_flags() {
        let origin = detached("m", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT);
        let miranda = Method::new_copied(&origin, CopiedKind::Miranda);
        assert!(miranda.is_miranda());
        assert!(!miranda.is_default());

        let default_origin = detached("m", "()V", AccessFlags::PUBLIC | AccessFlags::DEFAULT);
        let default = Method::new_copied(&default_origin, CopiedKind::Default);
        assert!(default.is_copied());
        assert!(default.is_default());
        assert!(!default.is_abstract());

        let conflict = Method::new_copied(&default_origin, CopiedKind::DefaultConflict);
        assert!(conflict.is_default_conflicting());
        assert!(!conflict.is_default());
        assert!(Arc::ptr_eq(conflict.copied_from().unwrap(), &default_origin));
    }

    #[test]
    fn test_entry_point_updates() {
        let m = detached("m", "()V", AccessFlags::PUBLIC);
        assert_eq!(m.entry_point(), EntryPoint::Unset);
        m.set_entry_point(EntryPoint::InterpreterBridge);
        assert_eq!(m.entry_point(), EntryPoint::InterpreterBridge);
    }

    #[test]
    fn test_direct_methods() {
        assert!(detached("<init>", "()V", AccessFlags::CONSTRUCTOR).is_direct());
        assert!(detached("p", "()V", AccessFlags::PRIVATE).is_direct());
        assert!(!detached("v", "()V", AccessFlags::PUBLIC).is_direct());
        assert!(detached("<clinit>", "()V", AccessFlags::STATIC).is_class_initializer());
    }
}
