//! Method linking: virtual table, interface table and interface method table.
//!
//! Classes start from their superclass's tables and only copy them once a
//! slot actually changes. Interfaces carry no virtual table; their interface
//! table lists every super-interface with empty method arrays.
use crate::{
    error::LinkError,
    linker::ClassLinker,
    types::{
        tables::{IfTable, IfTableEntry, SharedTable, TableBuilder},
        Class,
    },
    utils::sync::Arc,
};
use tracing::trace;

mod defaults;
mod imt;
mod interfaces;
mod vtable;

use defaults::resolve_interface_method;
use imt::build_imt;
use interfaces::linearize_interfaces;

/// Upper bound on the methods of one interface; method indices are 16 bits.
pub const MAX_INTERFACE_METHODS: usize = u16::MAX as usize;

impl ClassLinker {
    /// Builds the dispatch tables of `class` from its superclass's.
    pub(crate) fn link_methods(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        if class.is_interface() {
            return self.link_interface_methods(class);
        }
        let super_class = class.super_class();
        let interfaces = class.interfaces();
        let declares_virtuals = !class.virtual_methods().is_empty();

        if let Some(super_class) = super_class.as_ref().filter(|s| {
            !declares_virtuals && interfaces.iter().all(|i| s.iftable().contains(i))
        }) {
            trace!(descriptor = class.descriptor(), "sharing superclass tables");
            let vtable = TableBuilder::inheriting(&super_class.vtable()).finish();
            let iftable = super_class.iftable();
            let imt = match super_class.imt() {
                Some(imt) => Some(imt),
                None if class.is_instantiable() => build_imt(&iftable, None),
                None => None,
            };
            let mut linkage = class.linkage_mut();
            linkage.vtable = vtable;
            linkage.iftable = iftable;
            linkage.imt = imt;
            return Ok(());
        }

        let mut vtable = self.link_virtual_methods(class, super_class.as_deref())?;
        let order = linearize_interfaces(super_class.as_deref(), &interfaces);
        let super_iftable = super_class.as_ref().map(|s| s.iftable());

        let mut copies = defaults::CopiedMethods::default();
        let mut entries = Vec::with_capacity(order.len());
        for interface in &order {
            let inherited = super_iftable
                .as_ref()
                .and_then(|t| t.find(interface))
                .map(|e| e.methods.clone());
            let declared = interface.virtual_methods();
            let mut methods = match &inherited {
                Some(parent) => TableBuilder::inheriting(parent),
                None => TableBuilder::with_capacity(declared.len()),
            };
            for (index, interface_method) in declared.iter().enumerate() {
                let resolution = resolve_interface_method(&vtable, &order, interface_method)?;
                let implementation = copies.materialize(&mut vtable, resolution)?;
                match methods.get(index) {
                    Some(existing) if Arc::ptr_eq(existing, &implementation) => {}
                    Some(_) => methods.set(index, implementation),
                    None => methods.push(implementation),
                }
            }
            entries.push(IfTableEntry {
                interface: Arc::clone(interface),
                methods: methods.finish(),
            });
        }

        let iftable = match super_iftable {
            Some(parent) if same_iftable(&parent, &entries) => parent,
            _ => Arc::new(IfTable::new(entries)),
        };
        let imt = if class.is_instantiable() {
            build_imt(&iftable, super_class.as_ref().and_then(|s| s.imt()))
        } else {
            None
        };

        let copied = copies.into_methods();
        let loader = self.loader_of(class)?;
        let arena = loader.arena();
        let before = arena.bytes_allocated();
        let copied = arena.alloc_array(copied);
        self.record_arena_bytes(arena.bytes_allocated() - before);

        let mut linkage = class.linkage_mut();
        linkage.vtable = vtable.finish();
        linkage.iftable = iftable;
        linkage.imt = imt;
        linkage.copied_methods = copied;
        Ok(())
    }

    fn link_interface_methods(&self, class: &Arc<Class>) -> Result<(), LinkError> {
        if class.virtual_methods().len() > MAX_INTERFACE_METHODS {
            return Err(LinkError::ClassFormat(format!(
                "Too many methods on interface: {}",
                class.virtual_methods().len()
            )));
        }
        let order = linearize_interfaces(None, &class.interfaces());
        let entries = order
            .into_iter()
            .map(|interface| IfTableEntry {
                interface,
                methods: SharedTable::empty(),
            })
            .collect();
        let mut linkage = class.linkage_mut();
        linkage.vtable = SharedTable::empty();
        linkage.iftable = Arc::new(IfTable::new(entries));
        linkage.imt = None;
        Ok(())
    }
}

/// Whether `entries` describes exactly the parent's table, entry by entry.
fn same_iftable(parent: &IfTable, entries: &[IfTableEntry]) -> bool {
    parent.len() == entries.len()
        && parent
            .entries()
            .iter()
            .zip(entries)
            .all(|(a, b)| Arc::ptr_eq(&a.interface, &b.interface) && a.methods.ptr_eq(&b.methods))
}
