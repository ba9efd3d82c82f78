use crate::{
    types::{
        tables::{IfTable, ImTable, ImtConflictTable, ImtEntry, IMT_SIZE},
        Method,
    },
    utils::sync::Arc,
};
use tracing::trace;

/// Builds the interface method table from a finished interface table.
///
/// A slot whose interface methods all share one name and signature maps
/// straight to the (most derived) implementation; any other collision gets a
/// conflict table. Returns `previous` itself when nothing differs from it.
pub(crate) fn build_imt(
    iftable: &IfTable,
    previous: Option<Arc<ImTable>>,
) -> Option<Arc<ImTable>> {
    let mut buckets: Vec<Vec<(Arc<Method>, Arc<Method>)>> = vec![Vec::new(); IMT_SIZE];
    for entry in iftable.entries() {
        let declared = entry.interface.virtual_methods();
        for (interface_method, implementation) in declared.iter().zip(entry.methods.iter()) {
            buckets[interface_method.imt_index()]
                .push((Arc::clone(interface_method), Arc::clone(implementation)));
        }
    }

    let entries: Vec<ImtEntry> = buckets.into_iter().map(bucket_entry).collect();
    if let Some(previous) = previous {
        if previous.structurally_equal(&entries) {
            return Some(previous);
        }
    }
    let imt = ImTable::new(entries);
    trace!(
        occupied = imt.occupied_slots(),
        conflicts = imt.conflict_slots(),
        "interface method table"
    );
    Some(Arc::new(imt))
}

fn bucket_entry(pairs: Vec<(Arc<Method>, Arc<Method>)>) -> ImtEntry {
    let Some((first, _)) = pairs.first() else {
        return ImtEntry::Unimplemented;
    };
    let first = Arc::clone(first);
    if pairs
        .iter()
        .all(|(method, _)| method.has_same_name_and_signature(&first))
    {
        match pairs.last() {
            Some((_, implementation)) => ImtEntry::Method(Arc::clone(implementation)),
            None => ImtEntry::Unimplemented,
        }
    } else {
        ImtEntry::Conflict(Arc::new(ImtConflictTable::new(pairs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dex::builder::DexFileBuilder,
        linker::ClassLinker,
        types::members::imt_index_for,
    };

    /// Finds two method names that land in the same IMT slot.
    fn colliding_names() -> (String, String) {
        let sig = crate::dex::MethodSignature::parse("()V").unwrap();
        let mut seen = vec![None; IMT_SIZE];
        for i in 0.. {
            let name = format!("m{}", i);
            let slot = imt_index_for(&name, &sig);
            if let Some(other) = seen[slot].take() {
                return (other, name);
            }
            seen[slot] = Some(name);
        }
        unreachable!()
    }

    #[test]
    fn test_collision_builds_conflict_table() {
        let (a, b) = colliding_names();
        let dex = DexFileBuilder::new("app.dex")
            .class("LFirst;", |c| c.interface().abstract_method(&a, "()V"))
            .class("LSecond;", |c| c.interface().abstract_method(&b, "()V"))
            .class("LImpl;", |c| {
                c.public()
                    .implements("LFirst;")
                    .implements("LSecond;")
                    .virtual_method(&a, "()V")
                    .virtual_method(&b, "()V")
            })
            .build_arc();
        let core = DexFileBuilder::new("core.dex").with_core_library().build_arc();
        let linker = ClassLinker::new(vec![core]);
        let loader = linker.create_path_class_loader(vec![dex]);
        let first = linker.find_class("LFirst;", &loader).unwrap();
        let class = linker.find_class("LImpl;", &loader).unwrap();

        let method = first.virtual_methods()[0].clone();
        let imt = class.imt().unwrap();
        assert_eq!(imt.conflict_slots(), 1);
        let ImtEntry::Conflict(table) = imt.get(method.imt_index()) else {
            panic!("expected a conflict slot");
        };
        assert_eq!(table.len(), 2);
        let target = table.lookup(&method).unwrap();
        assert_eq!(target.name(), a);
        assert!(Arc::ptr_eq(&target.declaring_class().unwrap(), &class));
    }

    #[test]
    fn test_structurally_equal_imt_is_shared() {
        let dex = DexFileBuilder::new("app.dex")
            .class("LRunner;", |c| c.interface().abstract_method("run", "()V"))
            .class("LImpl;", |c| {
                c.public().implements("LRunner;").virtual_method("run", "()V")
            })
            .class("LSub;", |c| {
                c.public().extends("LImpl;").virtual_method("extra", "()V")
            })
            .build_arc();
        let core = DexFileBuilder::new("core.dex").with_core_library().build_arc();
        let linker = ClassLinker::new(vec![core]);
        let loader = linker.create_path_class_loader(vec![dex]);
        let class = linker.find_class("LImpl;", &loader).unwrap();
        let sub = linker.find_class("LSub;", &loader).unwrap();
        assert!(Arc::ptr_eq(&sub.imt().unwrap(), &class.imt().unwrap()));
        assert_eq!(class.imt().unwrap().occupied_slots(), 1);
    }
}
