//! Choosing the implementation of an interface method.
//!
//! A class method with the same name and signature always wins. Otherwise
//! the candidates are the interfaces in the interface table that declare the
//! method, minus every candidate some other candidate already extends. What
//! remains decides between a miranda, a default and a default conflict.
use crate::{
    error::LinkError,
    types::{tables::TableBuilder, Class, CopiedKind, Method},
    utils::sync::Arc,
};
use std::collections::HashMap;
use tracing::trace;

/// How an interface method is implemented by the class being linked.
#[derive(Debug, Clone)]
pub(crate) enum InterfaceImpl {
    /// A method already in the virtual table, declared or inherited.
    Real(Arc<Method>),
    /// No implementation anywhere; holds the most specific declaration.
    Miranda(Arc<Method>),
    /// Exactly one most specific default method.
    Default(Arc<Method>),
    /// Several unrelated default methods; `origin` is the first of them.
    DefaultConflict(Arc<Method>),
}

pub(crate) fn resolve_interface_method(
    vtable: &TableBuilder<Arc<Method>>,
    interfaces: &[Arc<Class>],
    interface_method: &Arc<Method>,
) -> Result<InterfaceImpl, LinkError> {
    let declared = vtable
        .iter()
        .rev()
        .find(|m| !m.is_copied() && m.has_same_name_and_signature(interface_method));
    if let Some(implementation) = declared {
        if !implementation.is_abstract() && !implementation.is_public() {
            return Err(LinkError::IllegalAccess(format!(
                "Method '{}' implementing interface method '{}' is not public",
                implementation.pretty_method(),
                interface_method.pretty_method()
            )));
        }
        return Ok(InterfaceImpl::Real(Arc::clone(implementation)));
    }

    let candidates: Vec<(&Arc<Class>, Arc<Method>)> = interfaces
        .iter()
        .filter_map(|interface| {
            interface
                .virtual_methods()
                .iter()
                .find(|m| m.has_same_name_and_signature(interface_method))
                .map(|m| (interface, Arc::clone(m)))
        })
        .collect();

    // An interface is masked when a more specific candidate extends it.
    let unmasked: Vec<&Arc<Method>> = candidates
        .iter()
        .filter(|(interface, _)| {
            !candidates.iter().any(|(other, _)| {
                !Arc::ptr_eq(other, interface) && other.implements(interface)
            })
        })
        .map(|(_, method)| method)
        .collect();

    let mut defaults = unmasked.iter().filter(|m| m.is_default());
    let resolution = match (defaults.next(), defaults.next()) {
        (None, _) => {
            let declaration = unmasked.first().copied().unwrap_or(interface_method);
            InterfaceImpl::Miranda(Arc::clone(declaration))
        }
        (Some(single), None) => InterfaceImpl::Default(Arc::clone(single)),
        (Some(first), Some(_)) => {
            trace!(method = ?interface_method, "default method conflict");
            InterfaceImpl::DefaultConflict(Arc::clone(first))
        }
    };
    Ok(resolution)
}

/// Copied methods synthesized while linking one class, one per signature.
#[derive(Default)]
pub(super) struct CopiedMethods {
    by_signature: HashMap<(String, String), Arc<Method>>,
    created: Vec<Arc<Method>>,
}

impl CopiedMethods {
    /// Turns a resolution into the method stored in the interface table,
    /// placing copies in the virtual table.
    pub(super) fn materialize(
        &mut self,
        vtable: &mut TableBuilder<Arc<Method>>,
        resolution: InterfaceImpl,
    ) -> Result<Arc<Method>, LinkError> {
        let (kind, origin) = match resolution {
            InterfaceImpl::Real(method) => return Ok(method),
            InterfaceImpl::Miranda(origin) => (CopiedKind::Miranda, origin),
            InterfaceImpl::Default(origin) => (CopiedKind::Default, origin),
            InterfaceImpl::DefaultConflict(origin) => (CopiedKind::DefaultConflict, origin),
        };
        let key = (origin.name().to_string(), origin.signature().to_string());
        if let Some(existing) = self.by_signature.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let slot = vtable
            .iter()
            .position(|m| m.has_same_name_and_signature(&origin));
        if let Some(inherited) = slot.and_then(|s| vtable.get(s)) {
            let reusable = inherited.is_copied()
                && copied_kind_of(inherited) == kind
                && inherited
                    .copied_from()
                    .is_some_and(|from| Arc::ptr_eq(from, origin.origin()));
            if reusable {
                let inherited = Arc::clone(inherited);
                self.by_signature.insert(key, Arc::clone(&inherited));
                return Ok(inherited);
            }
        }

        let copy = Arc::new(Method::new_copied(&origin, kind));
        let index = match slot {
            Some(slot) => {
                vtable.set(slot, Arc::clone(&copy));
                slot
            }
            None => {
                vtable.push(Arc::clone(&copy));
                vtable.len() - 1
            }
        };
        let index = u16::try_from(index).map_err(|_| {
            LinkError::ClassFormat(format!("Too many methods defined on class: {}", vtable.len()))
        })?;
        copy.set_method_index(index);
        trace!(method = ?copy, ?kind, slot = index, "copied method");
        self.by_signature.insert(key, Arc::clone(&copy));
        self.created.push(Arc::clone(&copy));
        Ok(copy)
    }

    pub(super) fn into_methods(self) -> Vec<Arc<Method>> {
        self.created
    }
}

fn copied_kind_of(method: &Method) -> CopiedKind {
    if method.is_default_conflicting() {
        CopiedKind::DefaultConflict
    } else if method.is_abstract() {
        CopiedKind::Miranda
    } else {
        CopiedKind::Default
    }
}
