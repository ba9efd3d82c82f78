use crate::{
    error::LinkError,
    linker::ClassLinker,
    types::{tables::TableBuilder, Class, Method},
    utils::sync::Arc,
};
use std::collections::HashMap;
use tracing::trace;

impl ClassLinker {
    /// Places every declared virtual method of `class` in a vtable derived
    /// from the superclass's, overriding matching slots or appending.
    pub(super) fn link_virtual_methods(
        &self,
        class: &Class,
        super_class: Option<&Class>,
    ) -> Result<TableBuilder<Arc<Method>>, LinkError> {
        let mut vtable = match super_class {
            Some(super_class) => TableBuilder::inheriting(&super_class.vtable()),
            None => TableBuilder::new(),
        };

        let mut slots: HashMap<(String, String), Vec<usize>> = HashMap::new();
        let inherited: Vec<Arc<Method>> = vtable.iter().cloned().collect();
        for (slot, method) in inherited.iter().enumerate() {
            slots
                .entry(slot_key(method))
                .or_default()
                .push(slot);
        }

        for method in class.virtual_methods().iter() {
            let key = slot_key(method);
            let mut index = None;
            for &slot in slots.get(&key).map(Vec::as_slice).unwrap_or_default() {
                let overridden = &inherited[slot];
                if overridden.is_package_private() {
                    let same_package = overridden
                        .declaring_class()
                        .is_some_and(|owner| owner.is_in_same_package(class));
                    if !same_package {
                        continue;
                    }
                }
                if overridden.is_final() {
                    let owner = overridden
                        .declaring_class()
                        .map(|c| c.pretty_descriptor())
                        .unwrap_or_default();
                    return Err(LinkError::Linkage(format!(
                        "Method {} overrides final method in class {}",
                        method.pretty_method(),
                        owner
                    )));
                }
                vtable.set(slot, Arc::clone(method));
                index.get_or_insert(slot);
            }
            let index = match index {
                Some(slot) => slot,
                None => {
                    vtable.push(Arc::clone(method));
                    vtable.len() - 1
                }
            };
            let index = u16::try_from(index).map_err(|_| {
                LinkError::ClassFormat(format!(
                    "Too many methods defined on class: {}",
                    vtable.len()
                ))
            })?;
            method.set_method_index(index);
            trace!(method = ?method, slot = index, "vtable slot");
        }
        Ok(vtable)
    }
}

fn slot_key(method: &Method) -> (String, String) {
    (method.name().to_string(), method.signature().to_string())
}
