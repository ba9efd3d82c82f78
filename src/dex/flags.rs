use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Access flags for classes, fields and methods.
    ///
    /// The low 16 bits are the flags a compiled unit may carry; everything
    /// above is set by the linker at runtime and is stripped from input.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;

        // Method flags set by the linker.
        const CONSTRUCTOR = 0x0001_0000;
        const DECLARED_SYNCHRONIZED = 0x0002_0000;
        const SKIP_ACCESS_CHECKS = 0x0008_0000;
        const COPIED = 0x0010_0000;
        const DEFAULT = 0x0040_0000;
        const DEFAULT_CONFLICT = 0x0100_0000;

        // Class flags set by the linker.
        const VERIFICATION_ATTEMPTED = 0x0200_0000;
        const HAS_DEFAULT_METHOD = 0x0400_0000;
        const RECURSIVELY_INITIALIZED = 0x0800_0000;
        const FINALIZABLE = 0x8000_0000;
    }
}

impl AccessFlags {
    /// Flags a compiled class definition may legally carry.
    pub const VALID_CLASS_FLAGS: AccessFlags = AccessFlags::PUBLIC
        .union(AccessFlags::FINAL)
        .union(AccessFlags::SUPER_OR_SYNCHRONIZED)
        .union(AccessFlags::INTERFACE)
        .union(AccessFlags::ABSTRACT)
        .union(AccessFlags::SYNTHETIC)
        .union(AccessFlags::ANNOTATION)
        .union(AccessFlags::ENUM);

    pub const VALID_INTERFACE_FLAGS: AccessFlags = AccessFlags::PUBLIC
        .union(AccessFlags::INTERFACE)
        .union(AccessFlags::ABSTRACT)
        .union(AccessFlags::SYNTHETIC)
        .union(AccessFlags::ANNOTATION);

    pub const VALID_FIELD_FLAGS: AccessFlags = AccessFlags::PUBLIC
        .union(AccessFlags::PRIVATE)
        .union(AccessFlags::PROTECTED)
        .union(AccessFlags::STATIC)
        .union(AccessFlags::FINAL)
        .union(AccessFlags::VOLATILE)
        .union(AccessFlags::TRANSIENT)
        .union(AccessFlags::SYNTHETIC)
        .union(AccessFlags::ENUM);

    /// Everything a method may carry in a compiled unit, constructor marker
    /// included.
    pub const VALID_METHOD_FLAGS: AccessFlags = AccessFlags::from_bits_truncate(0xFFFF)
        .union(AccessFlags::CONSTRUCTOR)
        .union(AccessFlags::DECLARED_SYNCHRONIZED)
        .difference(AccessFlags::INTERFACE)
        .difference(AccessFlags::ANNOTATION)
        .difference(AccessFlags::ENUM);

    /// Alias used by class definitions: bit 0x20 means `ACC_SUPER` there.
    pub const SUPER_OR_SYNCHRONIZED: AccessFlags = AccessFlags::SYNCHRONIZED;

    /// The flags visible to managed code.
    pub const JAVA_FLAGS_MASK: AccessFlags = AccessFlags::from_bits_truncate(0xFFFF);

    pub fn is_public(self) -> bool {
        self.contains(AccessFlags::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(AccessFlags::PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.contains(AccessFlags::PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.contains(AccessFlags::STATIC)
    }

    pub fn is_final(self) -> bool {
        self.contains(AccessFlags::FINAL)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(AccessFlags::INTERFACE)
    }

    pub fn is_native(self) -> bool {
        self.contains(AccessFlags::NATIVE)
    }

    pub fn is_constructor(self) -> bool {
        self.contains(AccessFlags::CONSTRUCTOR)
    }

    /// Neither public, protected nor private.
    pub fn is_package_private(self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PROTECTED | AccessFlags::PRIVATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_flags_do_not_overlap_input_bits() {
        let runtime = AccessFlags::CONSTRUCTOR
            | AccessFlags::SKIP_ACCESS_CHECKS
            | AccessFlags::COPIED
            | AccessFlags::DEFAULT
            | AccessFlags::DEFAULT_CONFLICT
            | AccessFlags::HAS_DEFAULT_METHOD
            | AccessFlags::RECURSIVELY_INITIALIZED
            | AccessFlags::FINALIZABLE;
        assert!(!runtime.intersects(AccessFlags::JAVA_FLAGS_MASK));
    }

    #[test]
    fn test_package_private() {
        assert!(AccessFlags::FINAL.is_package_private());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::FINAL).is_package_private());
        assert!(!AccessFlags::PRIVATE.is_package_private());
    }

    #[test]
    fn test_valid_method_flags_keep_constructor() {
        let raw = AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR | AccessFlags::COPIED;
        let masked = raw & AccessFlags::VALID_METHOD_FLAGS;
        assert_eq!(masked, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR);
    }
}
