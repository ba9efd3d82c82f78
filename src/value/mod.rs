//! Static field storage.
//!
//! Instance storage belongs to the heap and is not modeled; the linker only
//! owns the static slots of each type object, which it fills with encoded
//! constants before the static initializer runs.
use crate::{
    dex::EncodedValue,
    types::{class::Class, descriptor::Primitive},
    utils::sync::Arc,
};
use std::fmt::{Debug, Formatter};

/// A reference held in a static slot.
#[derive(Clone, Default)]
pub enum HeapRef {
    #[default]
    Null,
    String(Arc<str>),
    Class(Arc<Class>),
}

impl HeapRef {
    pub fn is_null(&self) -> bool {
        matches!(self, HeapRef::Null)
    }
}

impl PartialEq for HeapRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HeapRef::Null, HeapRef::Null) => true,
            (HeapRef::String(a), HeapRef::String(b)) => a == b,
            (HeapRef::Class(a), HeapRef::Class(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for HeapRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapRef::Null => write!(f, "null"),
            HeapRef::String(s) => write!(f, "{:?}", s),
            HeapRef::Class(c) => write!(f, "class {}", c.pretty_descriptor()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(HeapRef),
}

impl Value {
    /// The default value of a field of the given type.
    pub fn zero_for(type_descriptor: &str) -> Self {
        match Primitive::from_descriptor(type_descriptor) {
            Some(Primitive::Boolean) => Value::Boolean(false),
            Some(Primitive::Byte) => Value::Byte(0),
            Some(Primitive::Char) => Value::Char(0),
            Some(Primitive::Short) => Value::Short(0),
            Some(Primitive::Int) => Value::Int(0),
            Some(Primitive::Long) => Value::Long(0),
            Some(Primitive::Float) => Value::Float(0.0),
            Some(Primitive::Double) => Value::Double(0.0),
            Some(Primitive::Void) | None => Value::Reference(HeapRef::Null),
        }
    }

    /// Converts a primitive or string constant. Class literals need the
    /// resolver and are handled by the caller; `None` is returned for them.
    pub fn from_encoded(value: &EncodedValue) -> Option<Self> {
        Some(match value {
            EncodedValue::Null => Value::Reference(HeapRef::Null),
            EncodedValue::Boolean(v) => Value::Boolean(*v),
            EncodedValue::Byte(v) => Value::Byte(*v),
            EncodedValue::Short(v) => Value::Short(*v),
            EncodedValue::Char(v) => Value::Char(*v),
            EncodedValue::Int(v) => Value::Int(*v),
            EncodedValue::Long(v) => Value::Long(*v),
            EncodedValue::Float(v) => Value::Float(*v),
            EncodedValue::Double(v) => Value::Double(*v),
            EncodedValue::String(s) => Value::Reference(HeapRef::String(Arc::from(s.as_str()))),
            EncodedValue::Type(_) => return None,
        })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Boolean(v) => Some(v as i64),
            Value::Byte(v) => Some(v as i64),
            Value::Char(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&HeapRef> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::zero_for("J"), Value::Long(0));
        assert_eq!(Value::zero_for("Z"), Value::Boolean(false));
        assert_eq!(Value::zero_for("[I"), Value::Reference(HeapRef::Null));
        assert_eq!(
            Value::zero_for("Ljava/lang/String;"),
            Value::Reference(HeapRef::Null)
        );
    }

    #[test]
    fn test_encoded_constants() {
        assert_eq!(
            Value::from_encoded(&EncodedValue::Int(-3)),
            Some(Value::Int(-3))
        );
        let s = Value::from_encoded(&EncodedValue::String("hi".into())).unwrap();
        assert_eq!(s.as_reference(), Some(&HeapRef::String(Arc::from("hi"))));
        assert!(Value::from_encoded(&EncodedValue::Type("LFoo;".into())).is_none());
        assert_eq!(Value::Char(65).as_i64(), Some(65));
    }
}
