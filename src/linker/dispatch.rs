//! Call-site target selection over linked tables.
use crate::{
    error::LinkError,
    linker::ClassLinker,
    types::{tables::ImtEntry, Class, Method},
    utils::sync::Arc,
};
use tracing::trace;

impl ClassLinker {
    /// The implementation `receiver` uses for the virtual `method`.
    pub fn find_virtual_target(
        &self,
        receiver: &Class,
        method: &Arc<Method>,
    ) -> Result<Arc<Method>, LinkError> {
        if method.is_direct() {
            return Ok(Arc::clone(method));
        }
        let index = usize::from(method.method_index());
        let target = receiver.vtable().get(index).cloned().ok_or_else(|| {
            LinkError::IncompatibleClassChange(format!(
                "Virtual method {} has no slot {} in {}",
                method.pretty_method(),
                index,
                receiver.pretty_descriptor()
            ))
        })?;
        check_invocable(receiver, method, target)
    }

    /// The implementation `receiver` uses for `interface_method`.
    ///
    /// Tries the receiver's IMT slot first, then its conflict table, and
    /// falls back to a scan of the interface table.
    pub fn find_interface_target(
        &self,
        receiver: &Class,
        interface_method: &Arc<Method>,
    ) -> Result<Arc<Method>, LinkError> {
        let declaring = interface_method.declaring_class();
        if declaring.as_ref().is_some_and(|d| !d.is_interface()) {
            // Object methods invoked through an interface type.
            return self.find_virtual_target(receiver, interface_method);
        }

        if let Some(imt) = receiver.imt() {
            match imt.get(interface_method.imt_index()) {
                ImtEntry::Method(target) if target.has_same_name_and_signature(interface_method) => {
                    trace!(method = ?interface_method, "imt hit");
                    return check_invocable(receiver, interface_method, Arc::clone(target));
                }
                ImtEntry::Conflict(table) => {
                    if let Some(target) = table.lookup(interface_method) {
                        trace!(method = ?interface_method, "imt conflict table hit");
                        return check_invocable(receiver, interface_method, Arc::clone(target));
                    }
                }
                _ => {}
            }
        }

        let iftable = receiver.iftable();
        let target = declaring
            .as_ref()
            .and_then(|interface| iftable.find(interface))
            .and_then(|entry| entry.methods.get(usize::from(interface_method.method_index())))
            .cloned()
            .ok_or_else(|| {
                LinkError::IncompatibleClassChange(format!(
                    "Class {} does not implement interface {}",
                    receiver.pretty_descriptor(),
                    declaring
                        .as_ref()
                        .map(|d| d.pretty_descriptor())
                        .unwrap_or_default()
                ))
            })?;
        check_invocable(receiver, interface_method, target)
    }
}

fn check_invocable(
    receiver: &Class,
    method: &Method,
    target: Arc<Method>,
) -> Result<Arc<Method>, LinkError> {
    if target.is_default_conflicting() {
        return Err(LinkError::IncompatibleClassChange(format!(
            "Conflicting default method implementations {}",
            target.pretty_method()
        )));
    }
    if target.is_abstract() {
        return Err(LinkError::AbstractMethod(format!(
            "abstract method \"{}\" not implemented by {}",
            method.pretty_method(),
            receiver.pretty_descriptor()
        )));
    }
    Ok(target)
}
