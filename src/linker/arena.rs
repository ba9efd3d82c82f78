use crate::utils::sync::{Arc, AtomicU64, Ordering};
use std::mem::size_of;

/// Per-loader storage for field, method and table arrays.
///
/// Arrays are never freed one by one; everything a loader allocated goes
/// away with the loader. Only the accounting is kept here, the arrays
/// themselves are reference counted slices.
#[derive(Debug, Default)]
pub struct LinearAlloc {
    bytes: AtomicU64,
    allocations: AtomicU64,
}

impl LinearAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `items` into arena storage.
    pub fn alloc_array<T>(&self, items: Vec<T>) -> Arc<[T]> {
        let bytes = (items.len() * size_of::<T>()) as u64;
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Arc::from(items)
    }

    /// Accounts for `bytes` of storage handed out elsewhere.
    pub fn record(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting() {
        let arena = LinearAlloc::new();
        let a = arena.alloc_array(vec![1u32, 2, 3]);
        assert_eq!(&*a, &[1, 2, 3]);
        arena.record(10);
        assert_eq!(arena.bytes_allocated(), 22);
        assert_eq!(arena.allocation_count(), 2);

        let empty: Arc<[u64]> = arena.alloc_array(vec![]);
        assert!(empty.is_empty());
        assert_eq!(arena.allocation_count(), 3);
    }
}
