use crate::types::descriptor::pretty_descriptor;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// An exception raised by an external collaborator (a static initializer, a
/// custom class loader callback) and carried through the linker untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    /// Descriptor of the thrown class, e.g. `Ljava/lang/IllegalStateException;`.
    pub descriptor: String,
    pub message: Option<String>,
    pub cause: Option<Box<Throwable>>,
    /// Whether the thrown class is an unchecked `java.lang.Error`.
    pub is_error: bool,
}

impl Throwable {
    pub fn exception(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            message: Some(message.into()),
            cause: None,
            is_error: false,
        }
    }

    pub fn error(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::exception(descriptor, message)
        }
    }

    pub fn with_cause(mut self, cause: Throwable) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl Display for Throwable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", pretty_descriptor(&self.descriptor))?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Throwable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Every failure the linking core can report. Each variant corresponds to the
/// managed error class a runtime would throw, see [`LinkError::managed_class`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("Class not found: {}", pretty_descriptor(.0))]
    ClassNotFound(String),
    #[error("{message}")]
    NoClassDefFound {
        message: String,
        #[source]
        cause: Option<Box<LinkError>>,
    },
    #[error("{0}")]
    ClassFormat(String),
    #[error("{0}")]
    ClassCircularity(String),
    #[error("{0}")]
    IncompatibleClassChange(String),
    #[error("{0}")]
    IllegalAccess(String),
    #[error("{0}")]
    Linkage(String),
    #[error("{message}")]
    Verify {
        message: String,
        #[source]
        cause: Option<Box<LinkError>>,
    },
    #[error("{0}")]
    AbstractMethod(String),
    #[error("{0}")]
    NoSuchField(String),
    #[error("{0}")]
    NoSuchMethod(String),
    #[error("Exception in initializer of {}: {cause}", pretty_descriptor(.class))]
    ExceptionInInitializer {
        class: String,
        #[source]
        cause: Throwable,
    },
    #[error("{0}")]
    Thrown(Throwable),
    #[error("Out of resources: {0}")]
    OutOfResources(String),
}

impl LinkError {
    pub fn no_class_def(message: impl Into<String>) -> Self {
        LinkError::NoClassDefFound {
            message: message.into(),
            cause: None,
        }
    }

    pub fn verify(message: impl Into<String>) -> Self {
        LinkError::Verify {
            message: message.into(),
            cause: None,
        }
    }

    /// Descriptor of the managed error class this failure maps to.
    pub fn managed_class(&self) -> &str {
        match self {
            LinkError::ClassNotFound(_) => "Ljava/lang/ClassNotFoundException;",
            LinkError::NoClassDefFound { .. } => "Ljava/lang/NoClassDefFoundError;",
            LinkError::ClassFormat(_) => "Ljava/lang/ClassFormatError;",
            LinkError::ClassCircularity(_) => "Ljava/lang/ClassCircularityError;",
            LinkError::IncompatibleClassChange(_) => "Ljava/lang/IncompatibleClassChangeError;",
            LinkError::IllegalAccess(_) => "Ljava/lang/IllegalAccessError;",
            LinkError::Linkage(_) => "Ljava/lang/LinkageError;",
            LinkError::Verify { .. } => "Ljava/lang/VerifyError;",
            LinkError::AbstractMethod(_) => "Ljava/lang/AbstractMethodError;",
            LinkError::NoSuchField(_) => "Ljava/lang/NoSuchFieldError;",
            LinkError::NoSuchMethod(_) => "Ljava/lang/NoSuchMethodError;",
            LinkError::ExceptionInInitializer { .. } => "Ljava/lang/ExceptionInInitializerError;",
            LinkError::Thrown(t) => &t.descriptor,
            LinkError::OutOfResources(_) => "Ljava/lang/OutOfMemoryError;",
        }
    }

    /// Whether the managed class is an unchecked `java.lang.Error`.
    pub fn is_error_kind(&self) -> bool {
        match self {
            LinkError::ClassNotFound(_) => false,
            LinkError::Thrown(t) => t.is_error,
            _ => true,
        }
    }

    pub fn is_verify_error(&self) -> bool {
        matches!(self, LinkError::Verify { .. })
    }

    pub fn to_throwable(&self) -> Throwable {
        Throwable {
            descriptor: self.managed_class().to_string(),
            message: Some(self.to_string()),
            cause: None,
            is_error: self.is_error_kind(),
        }
    }
}

impl From<Throwable> for LinkError {
    fn from(t: Throwable) -> Self {
        LinkError::Thrown(t)
    }
}

/// Failures while validating a pre-linked image.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
    #[error("Image pointer size {image} does not match runtime pointer size {runtime}")]
    PointerSizeMismatch { image: u8, runtime: u8 },
    #[error("Image checksum {image:#010x} does not match boot class path checksum {runtime:#010x}")]
    ChecksumMismatch { image: u32, runtime: u32 },
    #[error("Image class {0} is not resolved")]
    UnresolvedClass(String),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Failures while reading a serialized compiled unit.
#[derive(Debug, Error)]
pub enum DexError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed compiled unit {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(!LinkError::ClassNotFound("LFoo;".into()).is_error_kind());
        assert!(LinkError::verify("bad").is_error_kind());
        let checked = Throwable::exception("Ljava/lang/Exception;", "boom");
        assert!(!LinkError::Thrown(checked).is_error_kind());
    }

    #[test]
    fn test_display_uses_pretty_names() {
        let err = LinkError::ClassNotFound("Lcom/example/Foo;".into());
        assert_eq!(err.to_string(), "Class not found: com.example.Foo");

        let t = Throwable::exception("Ljava/lang/IllegalStateException;", "nope");
        assert_eq!(t.to_string(), "java.lang.IllegalStateException: nope");
        let wrapped = LinkError::ExceptionInInitializer {
            class: "LFoo;".into(),
            cause: t.clone(),
        };
        assert_eq!(
            wrapped.to_throwable().descriptor,
            "Ljava/lang/ExceptionInInitializerError;"
        );
        assert!(wrapped.to_string().contains("nope"));
    }
}
