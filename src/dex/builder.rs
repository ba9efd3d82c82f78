//! Programmatic construction of compiled units.
//!
//! ```
//! use dexlink::dex::builder::DexFileBuilder;
//!
//! let dex = DexFileBuilder::new("app.dex")
//!     .class("Lcom/example/Greeter;", |c| {
//!         c.public()
//!             .instance_field("name", "Ljava/lang/String;")
//!             .virtual_method("greet", "()V")
//!     })
//!     .build();
//! assert!(dex.find_class_def("Lcom/example/Greeter;").is_some());
//! ```
use super::{AccessFlags, ClassDef, CodeItem, DexFile, EncodedValue, FieldDef, MethodDef, MethodSignature};
use crate::types::descriptor::Primitive;
use std::sync::Arc;

pub const OBJECT: &str = "Ljava/lang/Object;";

const UNASSIGNED: u32 = u32::MAX;

pub struct DexFileBuilder {
    location: String,
    classes: Vec<ClassDef>,
    next_field_idx: u32,
    next_method_idx: u32,
}

impl DexFileBuilder {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            classes: vec![],
            next_field_idx: 0,
            next_method_idx: 0,
        }
    }

    /// Adds the bootstrap classes every runtime needs before it can create
    /// arrays or report errors.
    pub fn with_core_library(self) -> Self {
        self.class(OBJECT, |c| {
            c.public()
                .no_superclass()
                .constructor("()V")
                .virtual_method("equals", "(Ljava/lang/Object;)Z")
                .virtual_method("hashCode", "()I")
                .virtual_method("toString", "()Ljava/lang/String;")
                .method("finalize", "()V", AccessFlags::PROTECTED)
        })
        .class("Ljava/lang/Cloneable;", |c| c.interface())
        .class("Ljava/io/Serializable;", |c| c.interface())
        .class("Ljava/lang/String;", |c| {
            c.public()
                .final_()
                .implements("Ljava/io/Serializable;")
                .instance_field("count", "I")
                .instance_field("hash", "I")
                .virtual_method("length", "()I")
        })
        .class("Ljava/lang/Throwable;", |c| {
            c.public()
                .implements("Ljava/io/Serializable;")
                .instance_field("detailMessage", "Ljava/lang/String;")
                .instance_field("cause", "Ljava/lang/Throwable;")
                .virtual_method("getMessage", "()Ljava/lang/String;")
        })
        .class("Ljava/lang/Error;", |c| c.public().extends("Ljava/lang/Throwable;"))
        .class("Ljava/lang/Exception;", |c| {
            c.public().extends("Ljava/lang/Throwable;")
        })
    }

    pub fn class(
        mut self,
        descriptor: &str,
        build: impl FnOnce(ClassDefBuilder) -> ClassDefBuilder,
    ) -> Self {
        let mut def = build(ClassDefBuilder::new(descriptor)).def;
        for field in def
            .static_fields
            .iter_mut()
            .chain(def.instance_fields.iter_mut())
        {
            if field.field_idx == UNASSIGNED {
                field.field_idx = self.next_field_idx;
                self.next_field_idx += 1;
            }
        }
        for method in def
            .direct_methods
            .iter_mut()
            .chain(def.virtual_methods.iter_mut())
        {
            if method.method_idx == UNASSIGNED {
                method.method_idx = self.next_method_idx;
                self.next_method_idx += 1;
            }
        }
        self.classes.push(def);
        self
    }

    pub fn build(self) -> DexFile {
        DexFile::new(self.location, self.classes)
    }

    pub fn build_arc(self) -> Arc<DexFile> {
        Arc::new(self.build())
    }
}

pub struct ClassDefBuilder {
    def: ClassDef,
}

impl ClassDefBuilder {
    fn new(descriptor: &str) -> Self {
        Self {
            def: ClassDef {
                descriptor: descriptor.to_string(),
                access_flags: AccessFlags::empty(),
                superclass: Some(OBJECT.to_string()),
                interfaces: vec![],
                static_fields: vec![],
                instance_fields: vec![],
                direct_methods: vec![],
                virtual_methods: vec![],
                static_values: vec![],
                source_file: None,
            },
        }
    }

    pub fn flags(mut self, flags: AccessFlags) -> Self {
        self.def.access_flags = flags;
        self
    }

    pub fn public(mut self) -> Self {
        self.def.access_flags |= AccessFlags::PUBLIC;
        self
    }

    pub fn final_(mut self) -> Self {
        self.def.access_flags |= AccessFlags::FINAL;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.def.access_flags |= AccessFlags::ABSTRACT;
        self
    }

    pub fn interface(mut self) -> Self {
        self.def.access_flags |= AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        self
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.def.superclass = Some(superclass.to_string());
        self
    }

    pub fn no_superclass(mut self) -> Self {
        self.def.superclass = None;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.def.interfaces.push(interface.to_string());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.def.source_file = Some(name.to_string());
        self
    }

    pub fn instance_field(self, name: &str, ty: &str) -> Self {
        self.field(name, ty, AccessFlags::empty())
    }

    pub fn static_field(self, name: &str, ty: &str) -> Self {
        self.field(name, ty, AccessFlags::STATIC)
    }

    /// A static field whose initial value is encoded in the unit. Static
    /// fields declared earlier without a value get their type's zero value.
    pub fn static_field_with_value(mut self, name: &str, ty: &str, value: EncodedValue) -> Self {
        while self.def.static_values.len() < self.def.static_fields.len() {
            let previous = &self.def.static_fields[self.def.static_values.len()];
            let zero = zero_value(&previous.type_descriptor);
            self.def.static_values.push(zero);
        }
        self = self.field(name, ty, AccessFlags::STATIC);
        self.def.static_values.push(value);
        self
    }

    pub fn field(mut self, name: &str, ty: &str, flags: AccessFlags) -> Self {
        let field = FieldDef {
            field_idx: UNASSIGNED,
            name: name.to_string(),
            type_descriptor: ty.to_string(),
            access_flags: flags,
        };
        if flags.is_static() {
            self.def.static_fields.push(field);
        } else {
            self.def.instance_fields.push(field);
        }
        self
    }

    /// Appends a field exactly as given, index included.
    pub fn raw_field(mut self, field: FieldDef) -> Self {
        if field.access_flags.is_static() {
            self.def.static_fields.push(field);
        } else {
            self.def.instance_fields.push(field);
        }
        self
    }

    /// A method with a body, placed in the direct or virtual list depending
    /// on its flags.
    pub fn method(self, name: &str, signature: &str, flags: AccessFlags) -> Self {
        let code = if flags.intersects(AccessFlags::ABSTRACT | AccessFlags::NATIVE) {
            None
        } else {
            Some(CodeItem {
                registers_size: 1,
                insns: vec![0x000e],
            })
        };
        let direct = flags.intersects(AccessFlags::STATIC | AccessFlags::PRIVATE)
            || name == "<init>"
            || name == "<clinit>";
        self.raw_method(
            MethodDef {
                method_idx: UNASSIGNED,
                name: name.to_string(),
                signature: parse_signature(signature),
                access_flags: flags,
                code,
            },
            direct,
        )
    }

    /// Appends a method exactly as given.
    pub fn raw_method(mut self, method: MethodDef, direct: bool) -> Self {
        if direct {
            self.def.direct_methods.push(method);
        } else {
            self.def.virtual_methods.push(method);
        }
        self
    }

    pub fn virtual_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC)
    }

    pub fn final_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC | AccessFlags::FINAL)
    }

    pub fn abstract_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
    }

    /// An interface method with a body.
    pub fn default_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC)
    }

    pub fn native_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC | AccessFlags::NATIVE)
    }

    pub fn static_method(self, name: &str, signature: &str) -> Self {
        self.method(name, signature, AccessFlags::PUBLIC | AccessFlags::STATIC)
    }

    pub fn constructor(self, signature: &str) -> Self {
        self.method(
            "<init>",
            signature,
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
    }

    pub fn clinit(self) -> Self {
        self.method(
            "<clinit>",
            "()V",
            AccessFlags::STATIC | AccessFlags::CONSTRUCTOR,
        )
    }
}

fn parse_signature(signature: &str) -> MethodSignature {
    MethodSignature::parse(signature)
        .unwrap_or_else(|| panic!("malformed method signature {} in builder", signature))
}

fn zero_value(ty: &str) -> EncodedValue {
    match Primitive::from_descriptor(ty) {
        Some(Primitive::Boolean) => EncodedValue::Boolean(false),
        Some(Primitive::Byte) => EncodedValue::Byte(0),
        Some(Primitive::Char) => EncodedValue::Char(0),
        Some(Primitive::Short) => EncodedValue::Short(0),
        Some(Primitive::Int) => EncodedValue::Int(0),
        Some(Primitive::Long) => EncodedValue::Long(0),
        Some(Primitive::Float) => EncodedValue::Float(0.0),
        Some(Primitive::Double) => EncodedValue::Double(0.0),
        Some(Primitive::Void) | None => EncodedValue::Null,
    }
}
