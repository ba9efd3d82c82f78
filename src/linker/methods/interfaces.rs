use crate::{types::Class, utils::sync::Arc};

/// Interface table order for a type: the superclass's interfaces, then for
/// every direct interface its own super-interfaces followed by itself. Each
/// interface appears once, after every interface it extends.
pub(crate) fn linearize_interfaces(
    super_class: Option<&Class>,
    direct: &[Arc<Class>],
) -> Vec<Arc<Class>> {
    let mut order: Vec<Arc<Class>> = super_class
        .map(|s| {
            s.iftable()
                .entries()
                .iter()
                .map(|e| Arc::clone(&e.interface))
                .collect()
        })
        .unwrap_or_default();

    let mut add = |interface: &Arc<Class>| {
        if !order.iter().any(|i| Arc::ptr_eq(i, interface)) {
            order.push(Arc::clone(interface));
        }
    };
    for interface in direct {
        for entry in interface.iftable().entries() {
            add(&entry.interface);
        }
        add(interface);
    }
    order
}
