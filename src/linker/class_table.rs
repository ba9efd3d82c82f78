//! Per-loader descriptor to type map.
//!
//! A table owns every type its loader defined (strong entries) and remembers
//! types it merely initiated the loading of (weak entries). Entries are
//! grouped in sets: [`ClassTable::freeze_snapshot`] closes the active set so
//! later inserts go into a fresh one, the way a runtime separates types
//! inherited from a pre-linked image from those defined afterwards.
//!
//! The linker reaches every table through the runtime-wide lock held by
//! [`ClassLinker`]; a table's own lock only guards its storage.
use crate::{
    linker::{dex_cache::DexCache, loader::ClassLoader, ClassLinker},
    types::Class,
    utils::sync::{Arc, Mutex, RwLock, Weak},
};
use std::collections::HashMap;
use tracing::trace;

enum TableSlot {
    /// The type was defined by this table's loader.
    Defining(Arc<Class>),
    /// Another loader defined it; this one initiated the lookup.
    Initiating(Weak<Class>),
}

impl TableSlot {
    fn class(&self) -> Option<Arc<Class>> {
        match self {
            TableSlot::Defining(class) => Some(Arc::clone(class)),
            TableSlot::Initiating(weak) => weak.upgrade(),
        }
    }

    fn matches(&self, descriptor: &str) -> bool {
        match self {
            TableSlot::Defining(class) => class.descriptor() == descriptor,
            TableSlot::Initiating(weak) => weak
                .upgrade()
                .is_some_and(|class| class.descriptor() == descriptor),
        }
    }
}

/// Buckets keyed by descriptor hash.
type ClassSet = HashMap<u32, Vec<TableSlot>>;

pub struct ClassTable {
    /// Frozen sets first, the active set last.
    sets: RwLock<Vec<ClassSet>>,
    /// Dex caches kept alive by this table's loader.
    strong_roots: Mutex<Vec<Arc<DexCache>>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(vec![ClassSet::new()]),
            strong_roots: Mutex::new(vec![]),
        }
    }

    /// Newest set first.
    pub fn lookup(&self, descriptor: &str, hash: u32) -> Option<Arc<Class>> {
        let sets = self.sets.read();
        sets.iter().rev().find_map(|set| {
            set.get(&hash)?
                .iter()
                .find(|slot| slot.matches(descriptor))
                .and_then(TableSlot::class)
        })
    }

    /// Inserts `class` as defined by this table's loader unless an entry for
    /// its descriptor exists. Returns the existing type in that case.
    pub fn insert_if_absent(&self, class: Arc<Class>) -> Option<Arc<Class>> {
        let hash = class.descriptor_hash();
        let mut sets = self.sets.write();
        if let Some(existing) = find_in(&sets, class.descriptor(), hash) {
            return Some(existing);
        }
        trace!(descriptor = class.descriptor(), "class table insert");
        active(&mut sets)
            .entry(hash)
            .or_default()
            .push(TableSlot::Defining(class));
        None
    }

    /// Records that this table's loader resolved `class`, defined elsewhere.
    /// Returns the existing type if the descriptor is already present.
    pub fn insert_initiating(&self, class: &Arc<Class>) -> Option<Arc<Class>> {
        let hash = class.descriptor_hash();
        let mut sets = self.sets.write();
        if let Some(existing) = find_in(&sets, class.descriptor(), hash) {
            return Some(existing);
        }
        let bucket = active(&mut sets).entry(hash).or_default();
        bucket.retain(|slot| slot.class().is_some());
        bucket.push(TableSlot::Initiating(Arc::downgrade(class)));
        None
    }

    /// Replaces the defining entry for `class`'s descriptor. Returns the
    /// type it replaced.
    pub fn update(&self, class: Arc<Class>) -> Option<Arc<Class>> {
        let hash = class.descriptor_hash();
        let mut sets = self.sets.write();
        for set in sets.iter_mut().rev() {
            let Some(bucket) = set.get_mut(&hash) else {
                continue;
            };
            for slot in bucket.iter_mut() {
                if let TableSlot::Defining(old) = slot {
                    if old.descriptor() == class.descriptor() {
                        let previous = std::mem::replace(old, class);
                        return Some(previous);
                    }
                }
            }
        }
        None
    }

    /// Closes the active set; later inserts go into a new one.
    pub fn freeze_snapshot(&self) {
        self.sets.write().push(ClassSet::new());
    }

    pub fn num_sets(&self) -> usize {
        self.sets.read().len()
    }

    /// Types defined by this table's loader in frozen sets.
    pub fn num_frozen_classes(&self) -> usize {
        let sets = self.sets.read();
        let frozen = sets.len().saturating_sub(1);
        sets[..frozen].iter().map(count_defining).sum()
    }

    /// Types defined by this table's loader since the last freeze.
    pub fn num_active_classes(&self) -> usize {
        self.sets.read().last().map(count_defining).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.sets.read().iter().map(count_defining).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every type defined by this table's loader.
    pub fn defining_classes(&self) -> Vec<Arc<Class>> {
        let sets = self.sets.read();
        sets.iter()
            .flat_map(|set| set.values().flatten())
            .filter_map(|slot| match slot {
                TableSlot::Defining(class) => Some(Arc::clone(class)),
                TableSlot::Initiating(_) => None,
            })
            .collect()
    }

    /// Calls `visitor` for every live entry until it returns false.
    pub fn visit(&self, mut visitor: impl FnMut(&Arc<Class>) -> bool) {
        let sets = self.sets.read();
        for slot in sets.iter().flat_map(|set| set.values().flatten()) {
            if let Some(class) = slot.class() {
                if !visitor(&class) {
                    return;
                }
            }
        }
    }

    /// Drops initiating entries whose type has been unloaded.
    pub fn purge_dead_entries(&self) -> usize {
        let mut sets = self.sets.write();
        let mut purged = 0;
        for set in sets.iter_mut() {
            for bucket in set.values_mut() {
                let before = bucket.len();
                bucket.retain(|slot| slot.class().is_some());
                purged += before - bucket.len();
            }
            set.retain(|_, bucket| !bucket.is_empty());
        }
        purged
    }

    /// Keeps `dex_cache` alive as long as this table. Returns false if it
    /// was already held.
    pub fn insert_strong_root(&self, dex_cache: Arc<DexCache>) -> bool {
        let mut roots = self.strong_roots.lock();
        if roots.iter().any(|root| Arc::ptr_eq(root, &dex_cache)) {
            return false;
        }
        roots.push(dex_cache);
        true
    }

    pub fn strong_roots(&self) -> Vec<Arc<DexCache>> {
        self.strong_roots.lock().clone()
    }
}

impl ClassLinker {
    pub(crate) fn table_lookup(
        &self,
        loader: &ClassLoader,
        descriptor: &str,
        hash: u32,
    ) -> Option<Arc<Class>> {
        let _classes = self.classes_lock.read();
        loader.class_table().lookup(descriptor, hash)
    }

    pub(crate) fn table_insert(&self, loader: &ClassLoader, class: Arc<Class>) -> Option<Arc<Class>> {
        let _classes = self.classes_lock.write();
        loader.class_table().insert_if_absent(class)
    }

    pub(crate) fn table_insert_initiating(
        &self,
        loader: &ClassLoader,
        class: &Arc<Class>,
    ) -> Option<Arc<Class>> {
        let _classes = self.classes_lock.write();
        loader.class_table().insert_initiating(class)
    }

    /// Runs `f` with every class table write-locked.
    pub(crate) fn with_tables_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _classes = self.classes_lock.write();
        f()
    }

    /// Visits the live entries of `loader`'s table under the read lock.
    pub fn visit_classes(&self, loader: &ClassLoader, visitor: impl FnMut(&Arc<Class>) -> bool) {
        let _classes = self.classes_lock.read();
        loader.class_table().visit(visitor);
    }

    /// Drops unloaded initiating entries from every given table.
    pub fn purge_dead_entries(&self, loaders: &[Arc<ClassLoader>]) -> usize {
        let _classes = self.classes_lock.write();
        loaders
            .iter()
            .map(|loader| loader.class_table().purge_dead_entries())
            .sum()
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

fn find_in(sets: &[ClassSet], descriptor: &str, hash: u32) -> Option<Arc<Class>> {
    sets.iter().rev().find_map(|set| {
        set.get(&hash)?
            .iter()
            .find(|slot| slot.matches(descriptor))
            .and_then(TableSlot::class)
    })
}

fn active(sets: &mut Vec<ClassSet>) -> &mut ClassSet {
    if sets.is_empty() {
        sets.push(ClassSet::new());
    }
    let last = sets.len() - 1;
    &mut sets[last]
}

fn count_defining(set: &ClassSet) -> usize {
    set.values()
        .flatten()
        .filter(|slot| matches!(slot, TableSlot::Defining(_)))
        .count()
}
