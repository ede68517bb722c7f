//! The Heap Table: runtime bookkeeping of live heap allocations.
//!
//! Keyed by raw address. Entries persist after deallocation with the `free`
//! bit set so that a freed-then-inspected pointer can still be identified;
//! a later allocation at the same address re-arms the entry. Iteration
//! order is insertion order, which the full-heap dump relies on.

use indexmap::IndexMap;

/// Allocation metadata; released when the allocation is freed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapData {
    /// Index of the allocation's element type in the Type Table
    pub type_index: i32,
    /// Total element count across all dimensions
    pub size: i64,
    /// Stride for N-dimensional traversal: the innermost dimension's length
    pub array_step: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapEntry {
    pub data: Option<HeapData>,
    /// Scratch bit breaking cycles during one inspection
    pub visited: bool,
    /// Set on deallocation; the entry is retained for identity reporting
    pub free: bool,
}

#[derive(Debug, Default)]
pub struct HeapTable {
    entries: IndexMap<usize, HeapEntry>,
}

impl HeapTable {
    /// Records an allocation. Idempotent on the key: re-inserting an address
    /// replaces its metadata and clears the `visited` and `free` bits.
    pub fn insert(&mut self, addr: usize, size: i64, array_step: i64, type_index: i32) {
        let entry = HeapEntry {
            data: Some(HeapData {
                type_index,
                size,
                array_step,
            }),
            visited: false,
            free: false,
        };
        self.entries.insert(addr, entry);
    }

    /// Records a reallocation.
    ///
    /// The stride collapses to `new_size`: a reallocated region is treated
    /// as one-dimensional from here on.
    pub fn update_size(&mut self, addr: usize, new_size: i64) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            if let Some(data) = entry.data.as_mut() {
                data.size = new_size;
                data.array_step = new_size;
            }
        }
    }

    /// Records a deallocation: metadata is released but the entry is kept
    pub fn delete(&mut self, addr: usize) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.free = true;
            entry.data = None;
        }
    }

    pub fn lookup(&self, addr: usize) -> Option<&HeapEntry> {
        self.entries.get(&addr)
    }

    pub fn lookup_mut(&mut self, addr: usize) -> Option<&mut HeapEntry> {
        self.entries.get_mut(&addr)
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.entries.contains_key(&addr)
    }

    /// Addresses in insertion order
    pub fn addresses(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn reset_visited(&mut self) {
        for entry in self.entries.values_mut() {
            entry.visited = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_then_insert_rearms_the_entry() {
        let mut table = HeapTable::default();
        table.insert(0x1000, 4, 4, 0);
        table.delete(0x1000);
        let entry = table.lookup(0x1000).unwrap();
        assert!(entry.free);
        assert!(entry.data.is_none());

        table.insert(0x1000, 8, 8, 1);
        let entry = table.lookup(0x1000).unwrap();
        assert!(!entry.free);
        assert_eq!(entry.data.unwrap().size, 8);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn update_size_collapses_the_stride() {
        let mut table = HeapTable::default();
        table.insert(0x2000, 6, 3, 0);
        table.update_size(0x2000, 8);
        let data = table.lookup(0x2000).unwrap().data.unwrap();
        assert_eq!(data.size, 8);
        assert_eq!(data.array_step, 8);
    }

    #[test]
    fn iteration_is_insertion_ordered() {
        let mut table = HeapTable::default();
        for addr in [0x30, 0x10, 0x20] {
            table.insert(addr, 1, 1, 0);
        }
        let order: Vec<_> = table.addresses().collect();
        assert_eq!(order, vec![0x30, 0x10, 0x20]);
    }

    #[test]
    fn reset_clears_every_visited_bit() {
        let mut table = HeapTable::default();
        table.insert(0x10, 1, 1, 0);
        table.insert(0x20, 1, 1, 0);
        table.lookup_mut(0x10).unwrap().visited = true;
        table.lookup_mut(0x20).unwrap().visited = true;
        table.reset_visited();
        assert!(table.addresses().all(|a| !table.lookup(a).unwrap().visited));
    }
}
