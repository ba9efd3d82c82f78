//! The initialization state machine.
//!
//! `ensure_initialized` is the only entry point. Types that are already
//! initialized return without taking a lock. Otherwise the type's monitor
//! decides between running the initializer on this thread, returning early
//! on a reentrant call, and waiting for another thread to finish.
use crate::{
    dex::EncodedValue,
    error::{LinkError, Throwable},
    linker::ClassLinker,
    types::{Class, ClassStatus},
    utils::sync::{Arc, NO_THREAD},
    value::{HeapRef, Value},
    vm::{metrics::LinkerMetrics, sync::ObjectLock},
};
use std::cell::Cell;
use tracing::{debug, info, trace, warn};

thread_local! {
    /// Fast-path sightings of initialized but not yet visible types.
    static NOT_VISIBLE_SIGHTINGS: Cell<u32> = const { Cell::new(0) };
}

impl ClassLinker {
    /// Makes sure `class` is initialized, running its static initializer
    /// and those of its superclass and default-method interfaces as needed.
    ///
    /// Returns `Ok(false)` when the type cannot be initialized under the
    /// given permissions (`can_init_fields` allows running static
    /// initializers, `can_init_parents` allows initializing super types).
    pub fn ensure_initialized(
        &self,
        class: &Arc<Class>,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> Result<bool, LinkError> {
        if class.is_visibly_initialized() {
            return Ok(true);
        }
        if class.is_initialized() {
            self.note_not_visible();
            return Ok(true);
        }
        self.initialize_class(class, can_init_fields, can_init_parents)
    }

    /// Asks for a non-blocking publish after enough sightings on this thread
    /// of types that are initialized but not yet visibly so.
    fn note_not_visible(&self) {
        let trigger = self.config.make_visible_trigger;
        let publish = NOT_VISIBLE_SIGHTINGS.with(|count| {
            let seen = count.get() + 1;
            if seen >= trigger {
                count.set(0);
                true
            } else {
                count.set(seen);
                false
            }
        });
        if publish {
            trace!("requesting visibility publication from the fast path");
            self.make_initialized_classes_visibly_initialized(false);
        }
    }

    fn initialize_class(
        &self,
        class: &Arc<Class>,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> Result<bool, LinkError> {
        if can_init_fields && self.config.aot_compiler && !self.config.aot_can_init_statics {
            panic!(
                "initializing {} with static initializers in an ahead-of-time compiler \
                 without the privilege to run them",
                class.pretty_descriptor()
            );
        }
        if !self.can_we_initialize(class, can_init_fields, can_init_parents) {
            return Ok(false);
        }

        {
            let lock = ObjectLock::new(class.monitor(), &self.metrics);
            if class.is_initialized() {
                return Ok(true);
            }
            if class.is_erroneous() {
                return Err(self.earlier_failure(class));
            }
            if !class.is_verified() {
                self.verify_class(class)?;
                if !class.is_verified() {
                    // Deferred to runtime by the ahead-of-time verifier.
                    debug_assert!(self.config.aot_compiler);
                    return Ok(false);
                }
            }
            if class.status() == ClassStatus::Initializing {
                if class.clinit_thread_id() == lock.thread_id() {
                    trace!(descriptor = class.descriptor(), "recursive initialization");
                    return Ok(true);
                }
                return self.wait_for_initialize_class(class, &lock);
            }
            if class.status() < ClassStatus::SuperclassValidated {
                if let Err(error) = self.validate_super_class_descriptors(class) {
                    warn!(descriptor = class.descriptor(), %error, "loader constraint violated");
                    class.set_erroneous(&error);
                    return Err(error);
                }
                class.set_status(ClassStatus::SuperclassValidated);
            }
            class.set_clinit_thread_id(lock.thread_id());
            class.set_status(ClassStatus::Initializing);
        }
        debug!(descriptor = class.descriptor(), "initializing class");

        if let Err(error) = self.initialize_super_types(class, can_init_fields, can_init_parents) {
            return Err(self.fail_initialization(class, error));
        }
        if let Err(error) = self.initialize_static_values(class) {
            return Err(self.fail_initialization(class, error));
        }
        if let Some(clinit) = class.class_initializer() {
            trace!(method = ?clinit, "running static initializer");
            if let Err(thrown) = self.interpreter().run_static_initializer(self, &clinit) {
                let error = wrap_initializer_exception(class, thrown);
                return Err(self.fail_initialization(class, error));
            }
        }

        let _lock = ObjectLock::new(class.monitor(), &self.metrics);
        class.set_clinit_thread_id(NO_THREAD);
        self.mark_class_initialized(class);
        LinkerMetrics::bump(&self.metrics.classes_initialized);
        info!(descriptor = class.descriptor(), status = %class.status(), "initialized class");
        Ok(true)
    }

    /// Whether initialization may proceed without running anything the
    /// permissions forbid.
    fn can_we_initialize(
        &self,
        class: &Class,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> bool {
        if class.is_initialized() {
            return true;
        }
        if !can_init_fields {
            let has_static_values = class
                .class_def()
                .is_some_and(|def| !def.static_values.is_empty());
            if class.class_initializer().is_some() || has_static_values {
                return false;
            }
        }
        match class.super_class() {
            Some(super_class) if !super_class.is_initialized() => {
                can_init_parents
                    && self.can_we_initialize(&super_class, can_init_fields, can_init_parents)
            }
            _ => true,
        }
    }

    /// Blocks until the thread initializing `class` is done with it.
    fn wait_for_initialize_class(
        &self,
        class: &Arc<Class>,
        lock: &ObjectLock<'_>,
    ) -> Result<bool, LinkError> {
        LinkerMetrics::bump(&self.metrics.initialization_waits);
        trace!(
            descriptor = class.descriptor(),
            owner = class.clinit_thread_id(),
            "waiting for initialization"
        );
        loop {
            {
                let _suspended = self.threads.suspend();
                lock.wait();
            }
            if class.is_erroneous() {
                return Err(self.earlier_failure(class));
            }
            if class.is_initialized() {
                return Ok(true);
            }
            if class.status() != ClassStatus::Initializing {
                return Err(LinkError::no_class_def(format!(
                    "Initialization of {} was abandoned",
                    class.pretty_descriptor()
                )));
            }
        }
    }

    /// Initializes the superclass, then every direct interface declaring
    /// default methods together with their super-interfaces.
    fn initialize_super_types(
        &self,
        class: &Arc<Class>,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> Result<(), LinkError> {
        if class.is_interface() {
            return Ok(());
        }
        if let Some(super_class) = class.super_class() {
            if !super_class.is_initialized()
                && !self.ensure_initialized(&super_class, can_init_fields, can_init_parents)?
            {
                return Err(LinkError::no_class_def(format!(
                    "Superclass {} of {} could not be initialized",
                    super_class.pretty_descriptor(),
                    class.pretty_descriptor()
                )));
            }
        }
        if !class.iftable().entries().iter().any(|e| e.interface.has_default_methods()) {
            return Ok(());
        }
        for interface in class.interfaces() {
            if !interface.is_recursively_initialized() {
                self.initialize_default_interface(&interface, can_init_fields, can_init_parents)?;
            }
        }
        Ok(())
    }

    fn initialize_default_interface(
        &self,
        interface: &Arc<Class>,
        can_init_fields: bool,
        can_init_parents: bool,
    ) -> Result<(), LinkError> {
        for super_interface in interface.interfaces() {
            if !super_interface.is_recursively_initialized() {
                self.initialize_default_interface(&super_interface, can_init_fields, can_init_parents)?;
            }
        }
        if interface.has_default_methods()
            && !self.ensure_initialized(interface, can_init_fields, can_init_parents)?
        {
            return Err(LinkError::no_class_def(format!(
                "Interface {} could not be initialized",
                interface.pretty_descriptor()
            )));
        }
        interface.add_access_flags(crate::dex::AccessFlags::RECURSIVELY_INITIALIZED);
        Ok(())
    }

    /// Stores the constant initial values of the leading static fields.
    fn initialize_static_values(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        let Some(def) = class.class_def() else {
            return Ok(());
        };
        let fields = class.static_fields();
        for (index, (encoded, field)) in def.static_values.iter().zip(fields.iter()).enumerate() {
            let value = match encoded {
                EncodedValue::Type(descriptor) => {
                    Value::Reference(HeapRef::Class(self.resolve_type(descriptor, class)?))
                }
                EncodedValue::String(s) => {
                    Value::Reference(HeapRef::String(self.resolve_string(s, class)))
                }
                other => Value::from_encoded(other).unwrap_or_else(|| {
                    Value::zero_for(field.type_descriptor())
                }),
            };
            let is_reference = value.as_reference().is_some_and(|r| !r.is_null());
            class.set_static_value(index, value);
            if is_reference {
                self.heap().write_barrier(class, field.offset());
            }
            trace!(field = field.name(), "static value assigned");
        }
        Ok(())
    }

    /// Overridden methods whose declaring types come from different loaders
    /// must see the same types for every reference in their signatures.
    fn validate_super_class_descriptors(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        if class.is_interface() {
            return Ok(());
        }
        if let Some(super_class) = class.super_class() {
            if super_class.loader_id() != class.loader_id() {
                let vtable = class.vtable();
                for (index, inherited) in super_class.vtable().iter().enumerate() {
                    let Some(method) = vtable.get(index) else {
                        break;
                    };
                    if !Arc::ptr_eq(method, inherited) {
                        self.check_same_signature_types(class, method, &super_class, inherited, "superclass")?;
                    }
                }
            }
        }
        for entry in class.iftable().entries() {
            let interface = &entry.interface;
            if interface.loader_id() == class.loader_id() {
                continue;
            }
            for (declared, implementation) in interface
                .virtual_methods()
                .iter()
                .zip(entry.methods.iter())
            {
                let owner = implementation.declaring_class();
                if owner.as_ref().is_some_and(|o| o.loader_id() != interface.loader_id()) {
                    self.check_same_signature_types(class, implementation, interface, declared, "interface")?;
                }
            }
        }
        Ok(())
    }

    fn check_same_signature_types(
        &self,
        class: &Class,
        method: &Arc<crate::types::Method>,
        other: &Class,
        other_method: &Arc<crate::types::Method>,
        relation: &str,
    ) -> Result<(), LinkError> {
        let loader = match method.declaring_class() {
            Some(owner) => self.loader_of(&owner)?,
            None => self.loader_of(class)?,
        };
        let other_loader = match other_method.declaring_class() {
            Some(owner) => self.loader_of(&owner)?,
            None => self.loader_of(other)?,
        };
        if loader.id() == other_loader.id() {
            return Ok(());
        }
        for descriptor in method.signature().reference_types() {
            let here = self.find_class(descriptor, &loader)?;
            let there = self.find_class(descriptor, &other_loader)?;
            if !Arc::ptr_eq(&here, &there) {
                return Err(LinkError::Linkage(format!(
                    "Class {} method {} resolves differently in {} {}: {}",
                    class.pretty_descriptor(),
                    method.pretty_method(),
                    relation,
                    other.pretty_descriptor(),
                    crate::types::descriptor::pretty_descriptor(descriptor)
                )));
            }
        }
        Ok(())
    }

    /// Records `error` as the reason `class` can never be initialized.
    fn fail_initialization(&self, class: &Arc<Class>, error: LinkError) -> LinkError {
        let _lock = ObjectLock::new(class.monitor(), &self.metrics);
        class.set_clinit_thread_id(NO_THREAD);
        class.set_erroneous(&error);
        LinkerMetrics::bump(&self.metrics.initialization_failures);
        warn!(descriptor = class.descriptor(), %error, "initialization failed");
        error
    }

    /// The error replayed for a type that is already erroneous. Verification
    /// errors and class-definition errors are replayed as recorded; anything
    /// else is wrapped in a `NoClassDefFoundError`.
    pub(crate) fn earlier_failure(&self, class: &Class) -> LinkError {
        let descriptor = class.pretty_descriptor();
        match class.erroneous_cause() {
            Some(cause @ (LinkError::Verify { .. } | LinkError::NoClassDefFound { .. })) => cause,
            Some(cause) if class.is_resolved() => LinkError::NoClassDefFound {
                message: format!("Could not initialize class {}", descriptor),
                cause: Some(Box::new(cause)),
            },
            Some(cause) => LinkError::NoClassDefFound {
                message: format!("Rejecting re-init on previously-failed class {}", descriptor),
                cause: Some(Box::new(cause)),
            },
            None => LinkError::no_class_def(descriptor),
        }
    }
}

/// Checked exceptions from a static initializer are reported as
/// `ExceptionInInitializerError`; unchecked errors pass through.
fn wrap_initializer_exception(class: &Class, thrown: Throwable) -> LinkError {
    if thrown.is_error {
        LinkError::Thrown(thrown)
    } else {
        LinkError::ExceptionInInitializer {
            class: class.descriptor().to_string(),
            cause: thrown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{FenceStrategy, LinkerConfig},
        dex::{builder::DexFileBuilder, DexFile},
        types::Method,
    };
    use std::sync::Mutex as StdMutex;

    fn core() -> Arc<DexFile> {
        DexFileBuilder::new("core.dex").with_core_library().build_arc()
    }

    fn immediate() -> LinkerConfig {
        LinkerConfig {
            fence: FenceStrategy::Immediate,
            ..LinkerConfig::default()
        }
    }

    type Log = Arc<StdMutex<Vec<String>>>;

    fn recording(log: &Log) -> impl Fn(&ClassLinker, &Arc<Method>) -> Result<(), Throwable> {
        let log = Arc::clone(log);
        move |_linker: &ClassLinker, method: &Arc<Method>| {
            let owner = method.declaring_class().unwrap();
            log.lock().unwrap().push(owner.descriptor().to_string());
            Ok(())
        }
    }

    #[test]
    fn test_super_before_subclass() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBase;", |c| c.public().clinit())
            .class("LDerived;", |c| c.public().extends("LBase;").clinit())
            .build_arc();
        let log: Log = Default::default();
        let linker = ClassLinker::builder(vec![core()])
            .config(immediate())
            .interpreter(recording(&log))
            .build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let derived = linker.find_class("LDerived;", &loader).unwrap();
        assert!(linker.ensure_initialized(&derived, true, true).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["LBase;", "LDerived;"]);

        assert!(linker.ensure_initialized(&derived, true, true).unwrap());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_static_values_assigned() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LConsts;", |c| {
                c.public()
                    .static_field_with_value("ANSWER", "I", EncodedValue::Int(42))
                    .static_field_with_value("NAME", "Ljava/lang/String;", EncodedValue::String("x".into()))
                    .static_field_with_value("SELF", "Ljava/lang/Class;", EncodedValue::Type("LConsts;".into()))
                    .static_field("LATER", "J")
            })
            .build_arc();
        let linker = ClassLinker::builder(vec![core()]).config(immediate()).build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LConsts;", &loader).unwrap();
        assert_eq!(class.get_static("ANSWER"), Some(Value::Int(0)));
        linker.ensure_initialized(&class, true, true).unwrap();
        assert_eq!(class.get_static("ANSWER"), Some(Value::Int(42)));
        assert_eq!(
            class.get_static("NAME"),
            Some(Value::Reference(HeapRef::String(Arc::from("x"))))
        );
        match class.get_static("SELF") {
            Some(Value::Reference(HeapRef::Class(c))) => assert!(Arc::ptr_eq(&c, &class)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(class.get_static("LATER"), Some(Value::Long(0)));
    }

    #[test]
    fn test_checked_exception_is_wrapped_and_sticky() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBroken;", |c| c.public().clinit())
            .build_arc();
        let linker = ClassLinker::builder(vec![core()])
            .config(immediate())
            .interpreter(|_: &ClassLinker, _: &Arc<Method>| {
                Err(Throwable::exception("Ljava/lang/IllegalStateException;", "boom"))
            })
            .build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LBroken;", &loader).unwrap();
        let err = linker.ensure_initialized(&class, true, true).unwrap_err();
        assert!(matches!(err, LinkError::ExceptionInInitializer { .. }));
        assert_eq!(class.status(), ClassStatus::ErrorResolved);

        let again = linker.ensure_initialized(&class, true, true).unwrap_err();
        let LinkError::NoClassDefFound { message, cause } = again else {
            panic!("expected NoClassDefFoundError");
        };
        assert_eq!(message, "Could not initialize class Broken");
        assert_eq!(cause.as_deref(), Some(&err));
        assert_eq!(linker.metrics().snapshot().initialization_failures, 1);
    }

    #[test]
    fn test_unchecked_error_is_not_wrapped() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBroken;", |c| c.public().clinit())
            .build_arc();
        let linker = ClassLinker::builder(vec![core()])
            .config(immediate())
            .interpreter(|_: &ClassLinker, _: &Arc<Method>| {
                Err(Throwable::error("Ljava/lang/StackOverflowError;", "deep"))
            })
            .build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LBroken;", &loader).unwrap();
        let err = linker.ensure_initialized(&class, true, true).unwrap_err();
        assert!(matches!(err, LinkError::Thrown(ref t) if t.is_error));
    }

    #[test]
    fn test_recursive_initialization_returns_early() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LSelfRef;", |c| c.public().clinit())
            .build_arc();
        let nested: Arc<StdMutex<Option<bool>>> = Default::default();
        let seen = Arc::clone(&nested);
        let linker = ClassLinker::builder(vec![core()])
            .config(immediate())
            .interpreter(move |linker: &ClassLinker, method: &Arc<Method>| {
                let owner = method.declaring_class().unwrap();
                *seen.lock().unwrap() = Some(linker.ensure_initialized(&owner, true, true).unwrap());
                Ok(())
            })
            .build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LSelfRef;", &loader).unwrap();
        linker.ensure_initialized(&class, true, true).unwrap();
        assert_eq!(*nested.lock().unwrap(), Some(true));
        assert!(class.is_initialized());
    }

    #[test]
    fn test_default_interface_initialized_first() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LPlain;", |c| c.interface().clinit())
            .class("LWithDefault;", |c| {
                c.interface().default_method("m", "()V").clinit()
            })
            .class("LImpl;", |c| {
                c.public()
                    .implements("LPlain;")
                    .implements("LWithDefault;")
                    .clinit()
            })
            .build_arc();
        let log: Log = Default::default();
        let linker = ClassLinker::builder(vec![core()])
            .config(immediate())
            .interpreter(recording(&log))
            .build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LImpl;", &loader).unwrap();
        linker.ensure_initialized(&class, true, true).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["LWithDefault;", "LImpl;"]);
    }

    #[test]
    fn test_permissions_block_initialization() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBase;", |c| c.public())
            .class("LWithInit;", |c| c.public().extends("LBase;").clinit())
            .class("LPlain;", |c| c.public().extends("LBase;"))
            .build_arc();
        let linker = ClassLinker::builder(vec![core()]).config(immediate()).build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let with_init = linker.find_class("LWithInit;", &loader).unwrap();
        assert!(!linker.ensure_initialized(&with_init, false, true).unwrap());
        assert!(!with_init.is_initialized());

        let plain = linker.find_class("LPlain;", &loader).unwrap();
        assert!(!linker.ensure_initialized(&plain, true, false).unwrap());
        assert!(linker.ensure_initialized(&plain, false, true).unwrap());
    }

    #[test]
    #[should_panic(expected = "without the privilege")]
    fn test_aot_without_privilege_panics() {
        let config = LinkerConfig {
            aot_compiler: true,
            ..immediate()
        };
        let dex = DexFileBuilder::new("app.dex")
            .class("LA;", |c| c.public())
            .build_arc();
        let linker = ClassLinker::builder(vec![core()]).config(config).build();
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LA;", &loader).unwrap();
        let _ = linker.ensure_initialized(&class, true, true);
    }
}
