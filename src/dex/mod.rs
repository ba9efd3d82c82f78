//! The compiled-unit view the linker consumes.
//!
//! A [`DexFile`] is what an external bytecode parser hands to the linker: a
//! list of class definitions with their fields, methods and encoded static
//! values. The linker never mutates it. Units can be built in code with
//! [`builder::DexFileBuilder`] or read from JSON with [`DexFile::from_json_path`].
use crate::{error::DexError, types::descriptor::split_field_type};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    path::Path,
    sync::Arc,
};

pub mod builder;
mod flags;

pub use flags::AccessFlags;

/// A method's parameter and return types, e.g. `(ILjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodSignature {
    pub parameters: Vec<String>,
    pub return_type: String,
}

impl MethodSignature {
    pub fn parse(signature: &str) -> Option<Self> {
        let mut rest = signature.strip_prefix('(')?;
        let mut parameters = vec![];
        while !rest.starts_with(')') {
            let (ty, tail) = split_field_type(rest)?;
            if ty == "V" {
                return None;
            }
            parameters.push(ty.to_string());
            rest = tail;
        }
        let (return_type, tail) = split_field_type(&rest[1..])?;
        if !tail.is_empty() {
            return None;
        }
        Some(Self {
            parameters,
            return_type: return_type.to_string(),
        })
    }

    /// Every reference type mentioned by the signature, return type first.
    pub fn reference_types(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.return_type.as_str())
            .chain(self.parameters.iter().map(String::as_str))
            .filter(|d| d.starts_with('L') || d.starts_with('['))
    }
}

impl Display for MethodSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for p in &self.parameters {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.return_type)
    }
}

impl TryFrom<String> for MethodSignature {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("malformed method signature {}", value))
    }
}

impl From<MethodSignature> for String {
    fn from(value: MethodSignature) -> Self {
        value.to_string()
    }
}

/// A constant assigned to a static field before the static initializer runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EncodedValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A class literal, by descriptor.
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub field_idx: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub type_descriptor: String,
    #[serde(default)]
    pub access_flags: AccessFlags,
}

/// Opaque method body, only inspected by the verifier and interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeItem {
    pub registers_size: u16,
    #[serde(default)]
    pub insns: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub method_idx: u32,
    pub name: String,
    pub signature: MethodSignature,
    #[serde(default)]
    pub access_flags: AccessFlags,
    #[serde(default)]
    pub code: Option<CodeItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub descriptor: String,
    #[serde(default)]
    pub access_flags: AccessFlags,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub static_fields: Vec<FieldDef>,
    #[serde(default)]
    pub instance_fields: Vec<FieldDef>,
    #[serde(default)]
    pub direct_methods: Vec<MethodDef>,
    #[serde(default)]
    pub virtual_methods: Vec<MethodDef>,
    /// Initial values for the leading static fields, in declaration order.
    #[serde(default)]
    pub static_values: Vec<EncodedValue>,
    #[serde(default)]
    pub source_file: Option<String>,
}

impl ClassDef {
    /// Access flags with anything a compiled unit may not carry removed.
    pub fn java_access_flags(&self) -> AccessFlags {
        if self.access_flags.is_interface() {
            (self.access_flags & AccessFlags::VALID_INTERFACE_FLAGS) | AccessFlags::ABSTRACT
        } else {
            self.access_flags & AccessFlags::VALID_CLASS_FLAGS
        }
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDef> {
        self.direct_methods
            .iter()
            .chain(self.virtual_methods.iter())
            .find(|m| m.name == name)
    }
}

#[derive(Deserialize)]
struct DexFileRepr {
    #[serde(default)]
    location: Option<String>,
    class_defs: Vec<ClassDef>,
}

/// One compiled unit.
#[derive(Debug)]
pub struct DexFile {
    location: String,
    checksum: u32,
    class_defs: Vec<ClassDef>,
    index: HashMap<String, u32>,
}

impl DexFile {
    pub fn new(location: impl Into<String>, class_defs: Vec<ClassDef>) -> Self {
        let location = location.into();
        let mut index = HashMap::with_capacity(class_defs.len());
        for (i, def) in class_defs.iter().enumerate() {
            // A unit may only define a descriptor once, the first one wins.
            index.entry(def.descriptor.clone()).or_insert(i as u32);
        }
        let checksum = compute_checksum(&location, &class_defs);
        Self {
            location,
            checksum,
            class_defs,
            index,
        }
    }

    pub fn from_json_str(location: &str, json: &str) -> Result<Self, DexError> {
        let repr: DexFileRepr =
            serde_json::from_str(json).map_err(|source| DexError::Malformed {
                path: location.to_string(),
                source,
            })?;
        Ok(Self::new(
            repr.location.unwrap_or_else(|| location.to_string()),
            repr.class_defs,
        ))
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Arc<Self>, DexError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| DexError::Io {
            path: display.clone(),
            source,
        })?;
        Ok(Arc::new(Self::from_json_str(&display, &json)?))
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn class_defs(&self) -> &[ClassDef] {
        &self.class_defs
    }

    pub fn class_def(&self, idx: u32) -> &ClassDef {
        &self.class_defs[idx as usize]
    }

    pub fn find_class_def(&self, descriptor: &str) -> Option<(u32, &ClassDef)> {
        let idx = *self.index.get(descriptor)?;
        Some((idx, &self.class_defs[idx as usize]))
    }
}

/// Adler-32 over the serialized definitions, the same checksum family the
/// on-disk format uses.
fn compute_checksum(location: &str, class_defs: &[ClassDef]) -> u32 {
    const MOD: u32 = 65521;
    let body = serde_json::to_vec(class_defs).unwrap_or_default();
    let (mut a, mut b) = (1u32, 0u32);
    for byte in location.bytes().chain(body) {
        a = (a + byte as u32) % MOD;
        b = (b + a) % MOD;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_parse() {
        let sig = MethodSignature::parse("(I[JLjava/lang/String;)V").unwrap();
        assert_eq!(sig.parameters, vec!["I", "[J", "Ljava/lang/String;"]);
        assert_eq!(sig.return_type, "V");
        assert_eq!(sig.to_string(), "(I[JLjava/lang/String;)V");
        assert_eq!(
            sig.reference_types().collect::<Vec<_>>(),
            vec!["[J", "Ljava/lang/String;"]
        );

        assert!(MethodSignature::parse("()").is_none());
        assert!(MethodSignature::parse("(V)V").is_none());
        assert!(MethodSignature::parse("(I)VV").is_none());
    }

    #[test]
    fn test_json_round_trip_of_a_unit() {
        let json = r#"{
            "location": "app.dex",
            "class_defs": [{
                "descriptor": "LFoo;",
                "access_flags": "PUBLIC | FINAL",
                "superclass": "Ljava/lang/Object;",
                "instance_fields": [
                    {"field_idx": 0, "name": "count", "type": "I", "access_flags": "PRIVATE"}
                ],
                "virtual_methods": [
                    {"method_idx": 3, "name": "run", "signature": "()V", "access_flags": "PUBLIC"}
                ],
                "static_values": [{"kind": "int", "value": 7}]
            }]
        }"#;
        let dex = DexFile::from_json_str("fallback.dex", json).unwrap();
        assert_eq!(dex.location(), "app.dex");
        let (idx, def) = dex.find_class_def("LFoo;").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(def.access_flags, AccessFlags::PUBLIC | AccessFlags::FINAL);
        assert_eq!(def.instance_fields[0].type_descriptor, "I");
        assert_eq!(def.virtual_methods[0].signature.return_type, "V");
        assert_eq!(def.static_values, vec![EncodedValue::Int(7)]);
        assert!(dex.find_class_def("LBar;").is_none());
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = DexFile::from_json_str("bad.dex", "{\"class_defs\": 3}").unwrap_err();
        assert!(matches!(err, DexError::Malformed { .. }));
    }

    #[test]
    fn test_checksum_depends_on_content() {
        let a = DexFile::new("a.dex", vec![]);
        let b = DexFile::new("a.dex", vec![]);
        let c = DexFile::new("c.dex", vec![]);
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_interface_flags_are_normalized() {
        let def = ClassDef {
            descriptor: "LI;".into(),
            access_flags: AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::FINAL,
            superclass: Some("Ljava/lang/Object;".into()),
            interfaces: vec![],
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
            static_values: vec![],
            source_file: None,
        };
        assert_eq!(
            def.java_access_flags(),
            AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT
        );
    }
}
