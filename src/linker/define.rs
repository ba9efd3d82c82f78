//! Class definition: from a compiled class record to an unlinked type object
//! inserted in its loader's table, then through the linking stages.
use crate::{
    dex::{AccessFlags, ClassDef, DexFile, FieldDef, MethodDef},
    error::LinkError,
    linker::{dex_cache::DexCache, loader::ClassLoader, ClassLinker, OBJECT_DESCRIPTOR},
    types::{Class, ClassStatus, Field, Method},
    utils::sync::{Arc, Weak},
    vm::{metrics::LinkerMetrics, sync::ObjectLock},
};
use std::collections::HashSet;
use tracing::{debug, error, trace, warn};

const ENUM_DESCRIPTOR: &str = "Ljava/lang/Enum;";

impl ClassLinker {
    /// Defines `descriptor` from `dex_file` in `loader`. If another thread
    /// defined the descriptor first, its type is returned instead.
    pub fn define_class(
        &self,
        descriptor: &str,
        loader: &Arc<ClassLoader>,
        dex_file: &Arc<DexFile>,
    ) -> Result<Arc<Class>, LinkError> {
        let (idx, _) = dex_file.find_class_def(descriptor).ok_or_else(|| {
            LinkError::no_class_def(format!(
                "Class {} is not defined in {}",
                descriptor,
                dex_file.location()
            ))
        })?;
        self.define_class_at(descriptor, loader, dex_file, idx)
    }

    /// Returns the unit's cache and keeps it alive for as long as `loader`.
    pub fn register_dex_file(
        &self,
        dex_file: &Arc<DexFile>,
        loader: &ClassLoader,
    ) -> Arc<DexCache> {
        let (cache, created) = self.dex_caches.register(dex_file, loader.id());
        loader.class_table().insert_strong_root(Arc::clone(&cache));
        if created && self.dex_caches.owners(dex_file).len() > 1 {
            debug!(
                location = dex_file.location(),
                loader = ?loader,
                "dex file shared with another loader"
            );
        }
        cache
    }

    pub(crate) fn define_class_at(
        &self,
        descriptor: &str,
        loader: &Arc<ClassLoader>,
        dex_file: &Arc<DexFile>,
        idx: u32,
    ) -> Result<Arc<Class>, LinkError> {
        let dex_cache = self.register_dex_file(dex_file, loader);
        let def = dex_file.class_def(idx);
        let class = Arc::new(Class::new_unlinked(
            descriptor,
            loader,
            Arc::clone(dex_file),
            idx,
            dex_cache,
            def.java_access_flags(),
        ));

        let lock = ObjectLock::new(class.monitor(), &self.metrics);
        class.set_clinit_thread_id(lock.thread_id());
        class.set_status(ClassStatus::Idx);

        // Published before its members exist; anyone finding it waits in
        // ensure_resolved until the status moves.
        if let Some(existing) = self.table_insert(loader, Arc::clone(&class)) {
            drop(lock);
            LinkerMetrics::bump(&self.metrics.define_races_lost);
            debug!(descriptor, loader = ?loader, "lost define race");
            return self.ensure_resolved(existing);
        }
        LinkerMetrics::bump(&self.metrics.classes_defined);

        let linked = self
            .load_class(&class, def)
            .and_then(|()| self.load_super_and_interfaces(&class, def))
            .and_then(|()| self.link_class(&class));
        if let Err(e) = linked {
            error!(descriptor, error = %e, "failed to link class");
            class.set_erroneous(&e);
            return Err(e);
        }
        drop(lock);
        debug!(descriptor, loader = ?loader, "defined class");
        Ok(class)
    }

    /// Copies the field and method records of `def` into arena arrays.
    fn load_class(&self, class: &Arc<Class>, def: &ClassDef) -> Result<(), LinkError> {
        let loader = self.loader_of(class)?;
        let arena = loader.arena();
        let before = arena.bytes_allocated();
        let owner = Arc::downgrade(class);

        let static_fields = load_fields(&owner, &def.static_fields, true);
        let instance_fields = load_fields(&owner, &def.instance_fields, false);

        let direct_methods: Vec<_> = def
            .direct_methods
            .iter()
            .map(|m| Arc::new(self.load_method(class, &owner, m)))
            .collect();

        let is_interface = class.is_interface();
        let mut virtual_methods = Vec::with_capacity(def.virtual_methods.len());
        for (position, m) in def.virtual_methods.iter().enumerate() {
            let method = Arc::new(self.load_method(class, &owner, m));
            if is_interface {
                if !method.is_abstract() {
                    method.add_access_flags(AccessFlags::DEFAULT);
                    class.add_access_flags(AccessFlags::HAS_DEFAULT_METHOD);
                }
                method.set_method_index(position as u16);
            } else if is_finalizer(&method) && !is_exempt_finalizer_owner(class) {
                class.add_access_flags(AccessFlags::FINALIZABLE);
            }
            virtual_methods.push(method);
        }

        {
            let mut linkage = class.linkage_mut();
            linkage.static_fields = arena.alloc_array(static_fields);
            linkage.instance_fields = arena.alloc_array(instance_fields);
            linkage.direct_methods = arena.alloc_array(direct_methods);
            linkage.virtual_methods = arena.alloc_array(virtual_methods);
        }
        self.record_arena_bytes(arena.bytes_allocated() - before);
        Ok(())
    }

    fn load_method(&self, class: &Class, owner: &Weak<Class>, def: &MethodDef) -> Method {
        let mut flags = def.access_flags & AccessFlags::VALID_METHOD_FLAGS;
        if def.name.starts_with('<') {
            if def.name == "<init>" || def.name == "<clinit>" {
                if !flags.is_constructor() {
                    warn!(
                        "{} didn't have expected constructor access flag in class {} in dex file {}",
                        def.name,
                        class.pretty_descriptor(),
                        class.dex_file().map(|d| d.location()).unwrap_or("<unknown>")
                    );
                    flags |= AccessFlags::CONSTRUCTOR;
                }
            } else {
                warn!(
                    "Unexpected '<' at start of method name {} in class {}",
                    def.name,
                    class.pretty_descriptor()
                );
            }
        }
        trace!(class = class.descriptor(), method = %def.name, signature = %def.signature, "load method");
        Method::new(
            owner.clone(),
            def.method_idx,
            &def.name,
            def.signature.clone(),
            flags,
            def.code.clone(),
        )
    }

    /// Resolves the super type and direct interfaces, moving the type to
    /// `Loaded`.
    fn load_super_and_interfaces(
        &self,
        class: &Arc<Class>,
        def: &ClassDef,
    ) -> Result<(), LinkError> {
        let super_class = match &def.superclass {
            Some(super_desc) => {
                if super_desc == class.descriptor() {
                    return Err(LinkError::ClassCircularity(format!(
                        "Class {} extends itself",
                        class.pretty_descriptor()
                    )));
                }
                let super_class = self.resolve_type(super_desc, class)?;
                if !class.can_access(&super_class) {
                    return Err(LinkError::IllegalAccess(format!(
                        "Class {} extended by class {} is inaccessible",
                        super_class.pretty_descriptor(),
                        class.pretty_descriptor()
                    )));
                }
                Some(super_class)
            }
            None => None,
        };

        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for interface_desc in &def.interfaces {
            if interface_desc == class.descriptor() {
                return Err(LinkError::ClassCircularity(format!(
                    "Class {} implements itself",
                    class.pretty_descriptor()
                )));
            }
            let interface = self.resolve_type(interface_desc, class)?;
            if !class.can_access(&interface) {
                return Err(LinkError::IllegalAccess(format!(
                    "Interface {} implemented by class {} is inaccessible",
                    interface.pretty_descriptor(),
                    class.pretty_descriptor()
                )));
            }
            interfaces.push(interface);
        }

        {
            let mut linkage = class.linkage_mut();
            linkage.super_class = super_class;
            linkage.interfaces = interfaces;
        }
        class.set_status(ClassStatus::Loaded);
        Ok(())
    }
}

/// Builds field records, dropping entries whose index was already seen.
fn load_fields(owner: &Weak<Class>, defs: &[FieldDef], is_static: bool) -> Vec<Arc<Field>> {
    let mut seen = HashSet::with_capacity(defs.len());
    defs.iter()
        .filter(|def| seen.insert(def.field_idx))
        .map(|def| {
            let mut flags = def.access_flags & AccessFlags::VALID_FIELD_FLAGS;
            flags.set(AccessFlags::STATIC, is_static);
            Arc::new(Field::new(
                owner.clone(),
                def.field_idx,
                &def.name,
                &def.type_descriptor,
                flags,
            ))
        })
        .collect()
}

fn is_finalizer(method: &Method) -> bool {
    method.name() == "finalize"
        && method.signature().parameters.is_empty()
        && method.signature().return_type == "V"
}

/// `Object.finalize` and `Enum.finalize` are empty; declaring them does not
/// make a type finalizable.
fn is_exempt_finalizer_owner(class: &Class) -> bool {
    class.is_boot_class()
        && (class.descriptor() == OBJECT_DESCRIPTOR || class.descriptor() == ENUM_DESCRIPTOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{builder::DexFileBuilder, MethodSignature};

    fn core() -> Arc<DexFile> {
        DexFileBuilder::new("core.dex").with_core_library().build_arc()
    }

    #[test]
    fn test_define_reaches_resolved() {
        let app = DexFileBuilder::new("app.dex")
            .class("Lapp/Main;", |c| {
                c.public()
                    .instance_field("a", "I")
                    .constructor("()V")
                    .virtual_method("run", "()V")
            })
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app.clone()]);
        let class = linker.define_class("Lapp/Main;", &loader, &app).unwrap();
        assert_eq!(class.status(), ClassStatus::Resolved);
        assert!(class.super_class().unwrap().is_object_class());
        assert_eq!(class.instance_fields().len(), 1);
        assert_eq!(class.direct_methods().len(), 1);
        assert!(loader.arena().bytes_allocated() > 0);
        assert!(linker.metrics().snapshot().arena_bytes > 0);
        assert_eq!(loader.class_table().strong_roots().len(), 1);

        // A second define hands back the first type.
        let again = linker.define_class("Lapp/Main;", &loader, &app).unwrap();
        assert!(Arc::ptr_eq(&class, &again));
        assert_eq!(linker.metrics().snapshot().define_races_lost, 1);
    }

    #[test]
    fn test_duplicate_fields_are_dropped() {
        let app = DexFileBuilder::new("app.dex")
            .class("LDup;", |c| {
                c.raw_field(FieldDef {
                    field_idx: 40,
                    name: "x".into(),
                    type_descriptor: "I".into(),
                    access_flags: AccessFlags::empty(),
                })
                .raw_field(FieldDef {
                    field_idx: 40,
                    name: "x".into(),
                    type_descriptor: "I".into(),
                    access_flags: AccessFlags::empty(),
                })
            })
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app]);
        let class = linker.find_class("LDup;", &loader).unwrap();
        assert_eq!(class.instance_fields().len(), 1);
    }

    #[test]
    fn test_constructor_flag_is_repaired() {
        let app = DexFileBuilder::new("app.dex")
            .class("LInit;", |c| {
                c.raw_method(
                    MethodDef {
                        method_idx: 9,
                        name: "<init>".into(),
                        signature: MethodSignature::parse("()V").unwrap(),
                        access_flags: AccessFlags::PUBLIC,
                        code: None,
                    },
                    true,
                )
            })
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app]);
        let class = linker.find_class("LInit;", &loader).unwrap();
        assert!(class.direct_methods()[0].is_constructor());
    }

    #[test]
    fn test_self_inheritance_is_circular() {
        let app = DexFileBuilder::new("app.dex")
            .class("LSelf;", |c| c.extends("LSelf;"))
            .class("LLoop;", |c| c.implements("LLoop;"))
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app]);
        let err = linker.find_class("LSelf;", &loader).unwrap_err();
        assert_eq!(err, LinkError::ClassCircularity("Class Self extends itself".into()));
        let err = linker.find_class("LLoop;", &loader).unwrap_err();
        assert_eq!(err, LinkError::ClassCircularity("Class Loop implements itself".into()));

        // The failed type stays in the table and keeps failing.
        let again = linker.find_class("LSelf;", &loader).unwrap_err();
        match again {
            LinkError::NoClassDefFound { cause: Some(cause), .. } => {
                assert!(matches!(*cause, LinkError::ClassCircularity(_)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mutual_inheritance_is_circular() {
        let app = DexFileBuilder::new("app.dex")
            .class("LA;", |c| c.extends("LB;"))
            .class("LB;", |c| c.extends("LA;"))
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app]);
        let err = linker.find_class("LA;", &loader).unwrap_err();
        assert!(matches!(err, LinkError::ClassCircularity(_)), "{:?}", err);
    }

    #[test]
    fn test_finalizable_detection() {
        let app = DexFileBuilder::new("app.dex")
            .class("LRes;", |c| c.public().method("finalize", "()V", AccessFlags::PROTECTED))
            .class("LSubRes;", |c| c.public().extends("LRes;"))
            .build_arc();
        let linker = ClassLinker::new(vec![core()]);
        let loader = linker.create_path_class_loader(vec![app]);
        assert!(linker.find_class("LRes;", &loader).unwrap().is_finalizable());
        assert!(linker.find_class("LSubRes;", &loader).unwrap().is_finalizable());
        let object = linker.find_system_class(OBJECT_DESCRIPTOR).unwrap();
        assert!(!object.is_finalizable());
    }
}
