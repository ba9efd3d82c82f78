//! Runtime services the linker depends on.
//!
//! The thread list, monitors and metrics live here along with the traits
//! through which the linker talks to the subsystems it does not implement:
//! the bytecode verifier, the interpreter that runs static initializers, the
//! heap's write barrier and the entry-point selector.
use crate::{
    error::Throwable,
    linker::ClassLinker,
    types::{Class, ClassStatus, EntryPoint, Method},
    utils::sync::Arc,
};

pub mod metrics;
pub mod sync;
pub mod threading;

/// Verdict severity, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    NoFailure,
    /// Some checks must be redone at runtime; execution may proceed.
    SoftFailure,
    /// Member access checks must be performed at runtime.
    AccessChecksFailure,
    /// Type checks must be performed at runtime.
    TypeChecksFailure,
    /// The type can never be initialized.
    HardFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub kind: FailureKind,
    pub message: Option<String>,
}

impl VerifyOutcome {
    pub fn passed() -> Self {
        Self {
            kind: FailureKind::NoFailure,
            message: None,
        }
    }

    pub fn soft(kind: FailureKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn hard(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::HardFailure,
            message: Some(message.into()),
        }
    }
}

pub trait Verifier: Send + Sync {
    fn verify(&self, class: &Arc<Class>) -> VerifyOutcome;
}

impl<F> Verifier for F
where
    F: Fn(&Arc<Class>) -> VerifyOutcome + Send + Sync,
{
    fn verify(&self, class: &Arc<Class>) -> VerifyOutcome {
        self(class)
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveVerifier;

impl Verifier for PermissiveVerifier {
    fn verify(&self, _class: &Arc<Class>) -> VerifyOutcome {
        VerifyOutcome::passed()
    }
}

/// Executes `<clinit>`. Static fields are reached through the linker.
pub trait Interpreter: Send + Sync {
    fn run_static_initializer(
        &self,
        linker: &ClassLinker,
        method: &Arc<Method>,
    ) -> Result<(), Throwable>;
}

impl<F> Interpreter for F
where
    F: Fn(&ClassLinker, &Arc<Method>) -> Result<(), Throwable> + Send + Sync,
{
    fn run_static_initializer(
        &self,
        linker: &ClassLinker,
        method: &Arc<Method>,
    ) -> Result<(), Throwable> {
        self(linker, method)
    }
}

/// Runs nothing; every static initializer succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInterpreter;

impl Interpreter for NoopInterpreter {
    fn run_static_initializer(
        &self,
        _linker: &ClassLinker,
        _method: &Arc<Method>,
    ) -> Result<(), Throwable> {
        Ok(())
    }
}

pub trait HeapCallbacks: Send + Sync {
    /// A reference was stored at `offset` in an object that may already be
    /// visible to the collector.
    fn write_barrier(&self, _holder: &Class, _offset: u32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeap;

impl HeapCallbacks for NoHeap {}

pub trait EntryPointSelector: Send + Sync {
    fn select(&self, method: &Method, status: ClassStatus) -> EntryPoint;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntryPointSelector {
    /// Prefer compiled code over the interpreter for methods with a body.
    pub use_compiled_code: bool,
}

impl EntryPointSelector for DefaultEntryPointSelector {
    fn select(&self, method: &Method, status: ClassStatus) -> EntryPoint {
        if method.is_default_conflicting() {
            return EntryPoint::DefaultConflictStub;
        }
        if method.is_abstract() {
            return EntryPoint::AbstractMethodStub;
        }
        // Calls into a type that is not yet initialized must go through
        // the trampoline so that the first call triggers initialization.
        if method.is_static() && !method.is_class_initializer() && !status.is_initialized() {
            return EntryPoint::ResolutionTrampoline;
        }
        if method.is_native() {
            return EntryPoint::JniStub;
        }
        if method.code().is_some() && self.use_compiled_code {
            EntryPoint::CompiledCode
        } else {
            EntryPoint::InterpreterBridge
        }
    }
}
