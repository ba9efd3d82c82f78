//! Linking a loaded type: super type checks, method tables, field layout.
use crate::{
    dex::AccessFlags,
    error::LinkError,
    linker::ClassLinker,
    types::{Class, ClassStatus},
    utils::sync::Arc,
    vm::metrics::LinkerMetrics,
};
use tracing::{debug, trace};

impl ClassLinker {
    /// Runs every linking stage on a `Loaded` type, leaving it `Resolved`.
    /// The caller holds the type's monitor.
    pub(crate) fn link_class(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        class.set_status(ClassStatus::Resolving);
        self.link_super_class(class)?;
        self.link_methods(class)?;
        self.link_instance_fields(class);
        self.link_static_fields(class);
        self.create_reference_instance_offsets(class);
        self.update_entry_points(class);
        class.set_status(ClassStatus::Resolved);
        LinkerMetrics::bump(&self.metrics.classes_linked);
        debug!(
            descriptor = class.descriptor(),
            object_size = class.object_size(),
            vtable = class.vtable().len(),
            iftable = class.iftable().len(),
            "linked class"
        );
        Ok(())
    }

    fn link_super_class(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        let super_class = class.super_class();
        if class.is_object_class() {
            if super_class.is_some() {
                return Err(LinkError::ClassFormat(
                    "java.lang.Object must not have a superclass".to_string(),
                ));
            }
            return Ok(());
        }
        let Some(super_class) = super_class else {
            return Err(LinkError::Linkage(format!(
                "No superclass defined for class {}",
                class.pretty_descriptor()
            )));
        };
        if class.is_interface() && !super_class.is_object_class() {
            return Err(LinkError::ClassFormat(
                "Interfaces must have java.lang.Object as superclass".to_string(),
            ));
        }
        if super_class.is_final() {
            return Err(LinkError::verify(format!(
                "Superclass {} of {} is declared final",
                super_class.pretty_descriptor(),
                class.pretty_descriptor()
            )));
        }
        if super_class.is_interface() {
            return Err(LinkError::IncompatibleClassChange(format!(
                "Superclass {} of {} is an interface",
                super_class.pretty_descriptor(),
                class.pretty_descriptor()
            )));
        }
        if !class.can_access(&super_class) {
            return Err(LinkError::IllegalAccess(format!(
                "Superclass {} is inaccessible to class {}",
                super_class.pretty_descriptor(),
                class.pretty_descriptor()
            )));
        }
        for interface in class.interfaces() {
            if !interface.is_interface() {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "Class {} implements non-interface class {}",
                    class.pretty_descriptor(),
                    interface.pretty_descriptor()
                )));
            }
        }
        if super_class.is_finalizable() {
            class.add_access_flags(AccessFlags::FINALIZABLE);
        }
        Ok(())
    }

    /// Asks the entry-point selector for every method the type owns.
    pub(crate) fn update_entry_points(&self, class: &Class) {
        let status = class.status();
        let selector = self.entry_point_selector();
        let linkage = class.linkage();
        for method in linkage
            .direct_methods
            .iter()
            .chain(linkage.virtual_methods.iter())
            .chain(linkage.copied_methods.iter())
        {
            let entry_point = selector.select(method, status);
            trace!(method = ?method, ?entry_point, "entry point");
            method.set_entry_point(entry_point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dex::{builder::DexFileBuilder, DexFile},
        types::EntryPoint,
    };

    fn core() -> Arc<DexFile> {
        DexFileBuilder::new("core.dex").with_core_library().build_arc()
    }

    fn link_error(dex: Arc<DexFile>, descriptor: &str) -> LinkError {
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![dex]);
        linker.find_class(descriptor, &loader).unwrap_err()
    }

    #[test]
    fn test_final_superclass() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBase;", |c| c.public().final_())
            .class("LDerived;", |c| c.public().extends("LBase;"))
            .build_arc();
        let err = link_error(dex, "LDerived;");
        assert!(err.is_verify_error());
        assert_eq!(err.to_string(), "Superclass Base of Derived is declared final");
    }

    #[test]
    fn test_interface_as_superclass() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LIface;", |c| c.interface())
            .class("LImpl;", |c| c.public().extends("LIface;"))
            .build_arc();
        let err = link_error(dex, "LImpl;");
        assert!(matches!(err, LinkError::IncompatibleClassChange(_)));
    }

    #[test]
    fn test_implementing_a_class() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LPlain;", |c| c.public())
            .class("LImpl;", |c| c.public().implements("LPlain;"))
            .build_arc();
        let err = link_error(dex, "LImpl;");
        assert_eq!(
            err,
            LinkError::IncompatibleClassChange(
                "Class Impl implements non-interface class Plain".into()
            )
        );
    }

    #[test]
    fn test_missing_superclass() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LOrphan;", |c| c.public().no_superclass())
            .build_arc();
        let err = link_error(dex, "LOrphan;");
        assert_eq!(
            err,
            LinkError::Linkage("No superclass defined for class Orphan".into())
        );
    }

    #[test]
    fn test_interface_must_extend_object() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LBase;", |c| c.public())
            .class("LIface;", |c| c.interface().extends("LBase;"))
            .build_arc();
        let err = link_error(dex, "LIface;");
        assert!(matches!(err, LinkError::ClassFormat(_)));
    }

    #[test]
    fn test_inaccessible_superclass() {
        let lib = DexFileBuilder::new("lib.dex")
            .class("Llib/Hidden;", |c| c)
            .build_arc();
        let app = DexFileBuilder::new("app.dex")
            .class("Lapp/User;", |c| c.public().extends("Llib/Hidden;"))
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![lib, app]);
        let err = linker.find_class("Lapp/User;", &loader).unwrap_err();
        assert!(matches!(err, LinkError::IllegalAccess(_)), "{:?}", err);
    }

    #[test]
    fn test_entry_points_follow_status() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LTool;", |c| {
                c.public()
                    .static_method("helper", "()V")
                    .native_method("poke", "()V")
                    .virtual_method("run", "()V")
            })
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LTool;", &loader).unwrap();
        let helper = class.direct_methods()[0].clone();
        assert_eq!(helper.entry_point(), EntryPoint::ResolutionTrampoline);
        let poke = class.find_declared_virtual_method("poke", helper.signature()).unwrap();
        assert_eq!(poke.entry_point(), EntryPoint::JniStub);
        let run = class.find_declared_virtual_method("run", helper.signature()).unwrap();
        assert_eq!(run.entry_point(), EntryPoint::InterpreterBridge);
    }
}
