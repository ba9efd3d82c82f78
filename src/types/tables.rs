//! Dispatch tables: virtual table, interface table and interface method table.
use crate::{
    types::{class::Class, members::Method},
    utils::sync::Arc,
};
use std::fmt::{Debug, Formatter};

/// Number of slots in an interface method table.
pub const IMT_SIZE: usize = 43;

/// An immutable table that may be shared by pointer with an ancestor's.
///
/// `inherited` records whether the storage belongs to the superclass; the
/// first structural difference during linking allocates a private copy (see
/// [`TableBuilder`]).
pub struct SharedTable<T> {
    table: Arc<[T]>,
    inherited: bool,
}

impl<T> SharedTable<T> {
    pub fn empty() -> Self {
        Self {
            table: Arc::from(Vec::new()),
            inherited: false,
        }
    }

    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.table.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.table.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.table
    }

    /// Whether both tables use the very same storage.
    pub fn ptr_eq(&self, other: &SharedTable<T>) -> bool {
        Arc::ptr_eq(&self.table, &other.table)
    }
}

impl<T> Clone for SharedTable<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            inherited: self.inherited,
        }
    }
}

impl<T> Default for SharedTable<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Debug> Debug for SharedTable<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.table.iter()).finish()
    }
}

/// Copy-on-write construction of a [`SharedTable`].
pub struct TableBuilder<T> {
    parent: Option<Arc<[T]>>,
    owned: Option<Vec<T>>,
}

impl<T: Clone> TableBuilder<T> {
    pub fn new() -> Self {
        Self {
            parent: None,
            owned: Some(vec![]),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parent: None,
            owned: Some(Vec::with_capacity(capacity)),
        }
    }

    /// Starts from the ancestor's storage without copying it.
    pub fn inheriting(parent: &SharedTable<T>) -> Self {
        Self {
            parent: Some(Arc::clone(&parent.table)),
            owned: None,
        }
    }

    pub fn len(&self) -> usize {
        match (&self.owned, &self.parent) {
            (Some(v), _) => v.len(),
            (None, Some(p)) => p.len(),
            (None, None) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        match (&self.owned, &self.parent) {
            (Some(v), _) => v.get(index),
            (None, Some(p)) => p.get(index),
            (None, None) => None,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match (&self.owned, &self.parent) {
            (Some(v), _) => v.iter(),
            (None, Some(p)) => p.iter(),
            (None, None) => std::slice::Iter::default(),
        }
    }

    /// Whether a private copy has been made.
    pub fn is_diverged(&self) -> bool {
        self.owned.is_some()
    }

    fn make_mut(&mut self) -> &mut Vec<T> {
        let parent = &self.parent;
        self.owned
            .get_or_insert_with(|| parent.as_deref().map(<[T]>::to_vec).unwrap_or_default())
    }

    pub fn set(&mut self, index: usize, value: T) {
        self.make_mut()[index] = value;
    }

    pub fn push(&mut self, value: T) {
        self.make_mut().push(value);
    }

    pub fn finish(self) -> SharedTable<T> {
        match (self.owned, self.parent) {
            (Some(v), _) => SharedTable {
                table: Arc::from(v),
                inherited: false,
            },
            (None, Some(parent)) => SharedTable {
                table: parent,
                inherited: true,
            },
            (None, None) => SharedTable::empty(),
        }
    }
}

impl<T: Clone> Default for TableBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Virtual table: slot index to the most-derived implementation.
pub type VTable = SharedTable<Arc<Method>>;

/// One implemented interface and, for each of its declared methods (by
/// interface method index), the implementation.
#[derive(Clone)]
pub struct IfTableEntry {
    pub interface: Arc<Class>,
    pub methods: SharedTable<Arc<Method>>,
}

impl Debug for IfTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfTableEntry")
            .field("interface", &self.interface.descriptor())
            .field("methods", &self.methods)
            .finish()
    }
}

/// Interface table. Super-interfaces always precede the interfaces that
/// extend them.
#[derive(Clone, Debug, Default)]
pub struct IfTable {
    entries: Vec<IfTableEntry>,
}

impl IfTable {
    pub fn new(entries: Vec<IfTableEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IfTableEntry] {
        &self.entries
    }

    pub fn interface(&self, index: usize) -> &Arc<Class> {
        &self.entries[index].interface
    }

    pub fn find(&self, interface: &Class) -> Option<&IfTableEntry> {
        self.entries
            .iter()
            .find(|e| std::ptr::eq(Arc::as_ptr(&e.interface), interface))
    }

    pub fn contains(&self, interface: &Class) -> bool {
        self.find(interface).is_some()
    }
}

/// Pairs of (interface method, implementation) sharing one IMT slot.
#[derive(Debug, Default)]
pub struct ImtConflictTable {
    entries: Vec<(Arc<Method>, Arc<Method>)>,
}

impl ImtConflictTable {
    pub fn new(entries: Vec<(Arc<Method>, Arc<Method>)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Arc<Method>, Arc<Method>)] {
        &self.entries
    }

    pub fn lookup(&self, interface_method: &Arc<Method>) -> Option<&Arc<Method>> {
        let wanted = interface_method.origin();
        self.entries
            .iter()
            .find(|(iface, _)| Arc::ptr_eq(iface.origin(), wanted))
            .map(|(_, implementation)| implementation)
    }

    /// Same pairs in the same order, compared by identity.
    pub fn structurally_equal(&self, other: &ImtConflictTable) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((a1, b1), (a2, b2))| Arc::ptr_eq(a1, a2) && Arc::ptr_eq(b1, b2))
    }
}

#[derive(Clone, Debug, Default)]
pub enum ImtEntry {
    #[default]
    Unimplemented,
    Method(Arc<Method>),
    /// Several interface methods hash here; dispatch consults the table.
    Conflict(Arc<ImtConflictTable>),
}

impl ImtEntry {
    pub fn structurally_equal(&self, other: &ImtEntry) -> bool {
        match (self, other) {
            (ImtEntry::Unimplemented, ImtEntry::Unimplemented) => true,
            (ImtEntry::Method(a), ImtEntry::Method(b)) => Arc::ptr_eq(a, b),
            (ImtEntry::Conflict(a), ImtEntry::Conflict(b)) => {
                Arc::ptr_eq(a, b) || a.structurally_equal(b)
            }
            _ => false,
        }
    }
}

/// Interface method table: a fixed-size hashed dispatch cache.
#[derive(Debug)]
pub struct ImTable {
    entries: Box<[ImtEntry]>,
}

impl ImTable {
    pub fn new(entries: Vec<ImtEntry>) -> Self {
        debug_assert_eq!(entries.len(), IMT_SIZE);
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    pub fn get(&self, index: usize) -> &ImtEntry {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[ImtEntry] {
        &self.entries
    }

    pub fn occupied_slots(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !matches!(e, ImtEntry::Unimplemented))
            .count()
    }

    pub fn conflict_slots(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ImtEntry::Conflict(_)))
            .count()
    }

    pub fn structurally_equal(&self, other: &[ImtEntry]) -> bool {
        self.entries.len() == other.len()
            && self
                .entries
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.structurally_equal(b))
    }
}
