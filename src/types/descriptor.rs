//! Type descriptor helpers.
//!
//! Descriptors are the canonical names of types: `I` for `int`,
//! `Ljava/lang/String;` for a class, `[[J` for `long[][]`.

/// Size in bytes of a (compressed) heap reference.
pub const REFERENCE_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Primitive {
    pub const ALL: [Primitive; 9] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Char,
        Primitive::Short,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
        Primitive::Void,
    ];

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'Z' => Primitive::Boolean,
            'B' => Primitive::Byte,
            'C' => Primitive::Char,
            'S' => Primitive::Short,
            'I' => Primitive::Int,
            'J' => Primitive::Long,
            'F' => Primitive::Float,
            'D' => Primitive::Double,
            'V' => Primitive::Void,
            _ => return None,
        })
    }

    pub fn from_descriptor(descriptor: &str) -> Option<Self> {
        let mut chars = descriptor.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            Primitive::Boolean => "Z",
            Primitive::Byte => "B",
            Primitive::Char => "C",
            Primitive::Short => "S",
            Primitive::Int => "I",
            Primitive::Long => "J",
            Primitive::Float => "F",
            Primitive::Double => "D",
            Primitive::Void => "V",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Void => "void",
        }
    }

    /// Storage size of a field of this type.
    pub fn component_size(self) -> u32 {
        match self {
            Primitive::Boolean | Primitive::Byte => 1,
            Primitive::Char | Primitive::Short => 2,
            Primitive::Int | Primitive::Float => 4,
            Primitive::Long | Primitive::Double => 8,
            Primitive::Void => 0,
        }
    }
}

pub fn is_primitive_descriptor(descriptor: &str) -> bool {
    Primitive::from_descriptor(descriptor).is_some()
}

pub fn is_array_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('[')
}

pub fn is_reference_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

/// The element descriptor one dimension down, `None` if not an array.
pub fn component_descriptor(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// Storage size of a field with the given type descriptor.
pub fn field_size(descriptor: &str) -> u32 {
    match Primitive::from_descriptor(descriptor) {
        Some(p) => p.component_size(),
        None => REFERENCE_SIZE,
    }
}

/// Splits the first complete field type off the front of `input`.
pub fn split_field_type(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut dims = 0;
    while dims < bytes.len() && bytes[dims] == b'[' {
        dims += 1;
    }
    let first = *bytes.get(dims)?;
    let end = match first {
        b'L' => dims + input[dims..].find(';')? + 1,
        b'V' if dims > 0 => return None,
        c if Primitive::from_char(c as char).is_some() => dims + 1,
        _ => return None,
    };
    Some(input.split_at(end))
}

/// Whether `descriptor` names exactly one well-formed type.
pub fn is_valid_descriptor(descriptor: &str) -> bool {
    match split_field_type(descriptor) {
        Some((ty, "")) => !ty.ends_with(';') || ty.trim_start_matches('[').len() > 2,
        _ => false,
    }
}

/// The modified UTF-8 string hash, stable across runs.
pub fn compute_modified_utf8_hash(s: &str) -> u32 {
    s.bytes()
        .fold(0u32, |hash, b| hash.wrapping_mul(31).wrapping_add(b as u32))
}

/// Human-readable name, `[[I` becomes `int[][]`.
pub fn pretty_descriptor(descriptor: &str) -> String {
    let element = descriptor.trim_start_matches('[');
    let dims = descriptor.len() - element.len();
    let mut out = match Primitive::from_descriptor(element) {
        Some(p) => p.name().to_string(),
        None => element
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(element)
            .replace('/', "."),
    };
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

/// The binary name a class loader callback receives: `java.lang.String`
/// for classes, `[Ljava.lang.String;` for arrays.
pub fn descriptor_to_dot(descriptor: &str) -> String {
    if is_array_descriptor(descriptor) {
        return descriptor.replace('/', ".");
    }
    match descriptor.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(name) => name.replace('/', "."),
        None => descriptor.to_string(),
    }
}

/// Inverse of [`descriptor_to_dot`].
pub fn dot_to_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        return name.replace('.', "/");
    }
    format!("L{};", name.replace('.', "/"))
}

/// The package portion of a class descriptor (`java/lang` for
/// `Ljava/lang/String;`). Arrays use their element's package.
pub fn package_of(descriptor: &str) -> &str {
    let element = descriptor.trim_start_matches('[');
    match element.rfind('/') {
        Some(end) if element.starts_with('L') => &element[1..end],
        _ => "",
    }
}
