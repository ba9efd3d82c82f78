//! Runtime type objects and the records they own.
pub mod class;
pub mod descriptor;
pub mod members;
pub mod status;
pub mod tables;

pub use class::Class;
pub use members::{CopiedKind, EntryPoint, Field, Method};
pub use status::ClassStatus;
