//! Resolved-entry caches per compiled unit, and the registry that finds them.
use crate::{
    dex::DexFile,
    types::{Class, Field, Method},
    utils::sync::{Arc, AtomicBool, Ordering, RwLock, Weak},
};
use dashmap::DashMap;
use tracing::debug;

/// Resolved constants of one compiled unit, as seen by one loader.
///
/// Entries are weak: a cache never keeps a type or member alive, the defining
/// loader's class table does. Resolution through the cache is an
/// optimization only, a miss falls back to the full lookup.
pub struct DexCache {
    dex_file: Arc<DexFile>,
    resolved_types: DashMap<Box<str>, Weak<Class>>,
    resolved_methods: DashMap<u32, Weak<Method>>,
    resolved_fields: DashMap<u32, Weak<Field>>,
    strings: DashMap<Box<str>, Arc<str>>,
    trimmed: AtomicBool,
}

impl DexCache {
    pub fn new(dex_file: Arc<DexFile>) -> Self {
        Self {
            dex_file,
            resolved_types: DashMap::new(),
            resolved_methods: DashMap::new(),
            resolved_fields: DashMap::new(),
            strings: DashMap::new(),
            trimmed: AtomicBool::new(false),
        }
    }

    pub fn dex_file(&self) -> &Arc<DexFile> {
        &self.dex_file
    }

    pub fn location(&self) -> &str {
        self.dex_file.location()
    }

    pub fn resolved_type(&self, descriptor: &str) -> Option<Arc<Class>> {
        self.resolved_types.get(descriptor)?.upgrade()
    }

    pub fn set_resolved_type(&self, descriptor: &str, class: &Arc<Class>) {
        self.resolved_types
            .insert(descriptor.into(), Arc::downgrade(class));
    }

    pub fn resolved_method(&self, method_idx: u32) -> Option<Arc<Method>> {
        self.resolved_methods.get(&method_idx)?.upgrade()
    }

    pub fn set_resolved_method(&self, method_idx: u32, method: &Arc<Method>) {
        self.resolved_methods
            .insert(method_idx, Arc::downgrade(method));
    }

    pub fn resolved_field(&self, field_idx: u32) -> Option<Arc<Field>> {
        self.resolved_fields.get(&field_idx)?.upgrade()
    }

    pub fn set_resolved_field(&self, field_idx: u32, field: &Arc<Field>) {
        self.resolved_fields.insert(field_idx, Arc::downgrade(field));
    }

    /// The unit's interned copy of `value`.
    pub fn intern_string(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(value) {
            return Arc::clone(&existing);
        }
        Arc::clone(
            self.strings
                .entry(value.into())
                .or_insert_with(|| Arc::from(value))
                .value(),
        )
    }

    pub fn num_resolved_types(&self) -> usize {
        self.resolved_types.len()
    }

    pub fn num_resolved_methods(&self) -> usize {
        self.resolved_methods.len()
    }

    pub fn num_resolved_fields(&self) -> usize {
        self.resolved_fields.len()
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn is_trimmed(&self) -> bool {
        self.trimmed.load(Ordering::Acquire)
    }

    /// Drops every resolved entry, once. Later resolutions repopulate the
    /// arrays from scratch.
    pub fn trim(&self) -> bool {
        if self.trimmed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.resolved_types.clear();
        self.resolved_methods.clear();
        self.resolved_fields.clear();
        self.strings.clear();
        true
    }
}

struct DexCacheData {
    dex_file: Weak<DexFile>,
    checksum: u32,
    loader_id: u64,
    cache: Weak<DexCache>,
}

impl DexCacheData {
    fn matches(&self, dex_file: &Arc<DexFile>, loader_id: u64) -> bool {
        self.loader_id == loader_id
            && self.checksum == dex_file.checksum()
            && self
                .dex_file
                .upgrade()
                .is_some_and(|d| Arc::ptr_eq(&d, dex_file))
    }
}

/// Maps (compiled unit, loader) pairs to their caches. A unit registered by
/// two loaders gets two caches, since the same name may resolve to different
/// types in each. Holds nothing alive itself; the class tables of
/// registering loaders keep the caches as strong roots.
#[derive(Default)]
pub struct DexCacheRegistry {
    entries: RwLock<Vec<DexCacheData>>,
}

impl DexCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, dex_file: &Arc<DexFile>, loader_id: u64) -> Option<Arc<DexCache>> {
        self.entries
            .read()
            .iter()
            .find(|data| data.matches(dex_file, loader_id))
            .and_then(|data| data.cache.upgrade())
    }

    /// Returns the cache of `dex_file` for `loader_id`, creating it on first
    /// registration. The second value tells whether the cache was created by
    /// this call.
    pub fn register(&self, dex_file: &Arc<DexFile>, loader_id: u64) -> (Arc<DexCache>, bool) {
        if let Some(cache) = self.find(dex_file, loader_id) {
            return (cache, false);
        }
        let mut entries = self.entries.write();
        entries.retain(|data| data.cache.strong_count() > 0);
        // Another thread may have registered the pair between the lookups.
        if let Some(cache) = entries
            .iter()
            .find(|data| data.matches(dex_file, loader_id))
            .and_then(|data| data.cache.upgrade())
        {
            return (cache, false);
        }
        let cache = Arc::new(DexCache::new(Arc::clone(dex_file)));
        debug!(location = dex_file.location(), loader_id, "registered dex file");
        entries.push(DexCacheData {
            dex_file: Arc::downgrade(dex_file),
            checksum: dex_file.checksum(),
            loader_id,
            cache: Arc::downgrade(&cache),
        });
        (cache, true)
    }

    /// Loaders holding a live cache of `dex_file`, in registration order.
    pub fn owners(&self, dex_file: &Arc<DexFile>) -> Vec<u64> {
        self.entries
            .read()
            .iter()
            .filter(|data| data.cache.strong_count() > 0)
            .filter(|data| {
                data.dex_file
                    .upgrade()
                    .is_some_and(|d| Arc::ptr_eq(&d, dex_file))
            })
            .map(|data| data.loader_id)
            .collect()
    }

    /// Every cache still alive.
    pub fn live_caches(&self) -> Vec<Arc<DexCache>> {
        self.entries
            .read()
            .iter()
            .filter_map(|data| data.cache.upgrade())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|data| data.cache.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::builder::DexFileBuilder;

    #[test]
    fn test_register_once_per_unit_and_loader() {
        let registry = DexCacheRegistry::new();
        let dex = DexFileBuilder::new("a.dex").with_core_library().build_arc();
        let (first, created) = registry.register(&dex, 1);
        assert!(created);
        let (again, created) = registry.register(&dex, 1);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &again));

        let (second, created) = registry.register(&dex, 2);
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.owners(&dex), vec![1, 2]);
        assert_eq!(registry.len(), 2);

        let other = DexFileBuilder::new("b.dex").build_arc();
        assert!(registry.find(&other, 1).is_none());
    }

    #[test]
    fn test_registry_does_not_keep_caches_alive() {
        let registry = DexCacheRegistry::new();
        let dex = DexFileBuilder::new("a.dex").build_arc();
        let (cache, _) = registry.register(&dex, 1);
        drop(cache);
        assert!(registry.find(&dex, 1).is_none());
        assert!(registry.is_empty());
        let (_again, created) = registry.register(&dex, 1);
        assert!(created);
    }

    #[test]
    fn test_trim_is_one_way() {
        let dex = DexFileBuilder::new("a.dex").build_arc();
        let cache = DexCache::new(dex);
        let s = cache.intern_string("hello");
        assert!(Arc::ptr_eq(&s, &cache.intern_string("hello")));
        assert_eq!(cache.num_strings(), 1);

        assert!(cache.trim());
        assert!(cache.is_trimmed());
        assert_eq!(cache.num_strings(), 0);
        assert!(!cache.trim());
    }
}
