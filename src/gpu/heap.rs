//! Host-side bookkeeping for the device heap.
//!
//! The wgpu back end sub-allocates every resource from one storage buffer;
//! [`HeapAllocator`] hands out byte ranges of that buffer and [`SlotTable`]
//! maps integer handles to whatever the device stores per resource. Both are
//! plain host data structures, unit-tested without a GPU.

/// Allocation granularity and minimum block size, in bytes.
pub const HEAP_ALIGNMENT: u64 = 256;

/// A byte range inside the device heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlock {
    pub offset: u64,
    pub size: u64,
}

/// First-fit free-list allocator over a fixed-capacity heap.
///
/// Offset 0 is a reserved guard block and is never handed out, so a device
/// pointer of 0 always means "no allocation". Freed blocks coalesce with
/// their neighbors.
pub struct HeapAllocator {
    capacity: u64,
    /// Free blocks, sorted by offset, non-adjacent.
    free: Vec<HeapBlock>,
    used: u64,
}

impl HeapAllocator {
    /// `capacity` is rounded down to the alignment; the first block stays
    /// reserved.
    pub fn new(capacity: u64) -> Self {
        let capacity = capacity - capacity % HEAP_ALIGNMENT;
        let free = if capacity > HEAP_ALIGNMENT {
            vec![HeapBlock {
                offset: HEAP_ALIGNMENT,
                size: capacity - HEAP_ALIGNMENT,
            }]
        } else {
            Vec::new()
        };
        Self {
            capacity,
            free,
            used: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently handed out, including alignment padding.
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Allocates at least `size` bytes; `None` when no free block fits.
    /// Zero-size requests get a real block so every allocation has a
    /// distinct, non-zero offset.
    pub fn allocate(&mut self, size: u64) -> Option<HeapBlock> {
        let rounded = size
            .max(1)
            .checked_next_multiple_of(HEAP_ALIGNMENT)?;

        let slot = self.free.iter().position(|b| b.size >= rounded)?;
        let block = self.free[slot];
        if block.size == rounded {
            self.free.remove(slot);
        } else {
            self.free[slot] = HeapBlock {
                offset: block.offset + rounded,
                size: block.size - rounded,
            };
        }
        self.used += rounded;
        Some(HeapBlock {
            offset: block.offset,
            size: rounded,
        })
    }

    /// Returns a block to the free list, merging with adjacent free space.
    /// `block` must be exactly what [`HeapAllocator::allocate`] returned.
    pub fn free(&mut self, block: HeapBlock) {
        debug_assert!(block.offset >= HEAP_ALIGNMENT);
        debug_assert_eq!(block.size % HEAP_ALIGNMENT, 0);
        self.used = self.used.saturating_sub(block.size);

        let at = self
            .free
            .partition_point(|b| b.offset < block.offset);
        self.free.insert(at, block);

        // Merge with the following block, then with the preceding one.
        if at + 1 < self.free.len()
            && self.free[at].offset + self.free[at].size == self.free[at + 1].offset
        {
            self.free[at].size += self.free[at + 1].size;
            self.free.remove(at + 1);
        }
        if at > 0 && self.free[at - 1].offset + self.free[at - 1].size == self.free[at].offset {
            self.free[at - 1].size += self.free[at].size;
            self.free.remove(at);
        }
    }
}

/// One slot of a [`SlotTable`].
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Handle-indexed resource table with generation counters.
///
/// A handle is an `(index, generation)` pair; destroying a resource bumps
/// the slot's generation, so a stale handle never resolves to a later
/// resource reusing the same index. Stale access panics in debug builds and
/// is rejected (`None`) in release.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a value, returning its `(index, generation)` pair.
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return (index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        (index, 0)
    }

    pub fn get(&self, index: u32, generation: u32) -> Option<&T> {
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            debug_assert!(
                false,
                "stale handle: slot {} is at generation {}, handle says {}",
                index, slot.generation, generation
            );
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            debug_assert!(
                false,
                "stale handle: slot {} is at generation {}, handle says {}",
                index, slot.generation, generation
            );
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes a value and bumps the slot generation, retiring every handle
    /// that pointed at it.
    pub fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            debug_assert!(
                false,
                "stale handle: slot {} is at generation {}, handle says {}",
                index, slot.generation, generation
            );
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    /// Drains every live value, e.g. when the device shuts down.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.slots.drain(..).filter_map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_aligned_and_nonzero() {
        let mut heap = HeapAllocator::new(64 * 1024);
        let a = heap.allocate(10).unwrap();
        let b = heap.allocate(0).unwrap();
        assert_eq!(a.offset % HEAP_ALIGNMENT, 0);
        assert!(a.offset >= HEAP_ALIGNMENT, "offset 0 stays reserved");
        assert_eq!(a.size, HEAP_ALIGNMENT);
        assert_ne!(a.offset, b.offset, "empty buffers get distinct pointers");
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut heap = HeapAllocator::new(4 * HEAP_ALIGNMENT);
        // One block is the guard; three remain.
        assert!(heap.allocate(2 * HEAP_ALIGNMENT).is_some());
        assert!(heap.allocate(HEAP_ALIGNMENT).is_some());
        assert!(heap.allocate(1).is_none());
    }

    #[test]
    fn test_free_coalesces() {
        let mut heap = HeapAllocator::new(16 * HEAP_ALIGNMENT);
        let a = heap.allocate(HEAP_ALIGNMENT).unwrap();
        let b = heap.allocate(HEAP_ALIGNMENT).unwrap();
        let c = heap.allocate(HEAP_ALIGNMENT).unwrap();
        // Free the middle, then its neighbors; the reunited block must fit a
        // request spanning all three.
        heap.free(b);
        heap.free(a);
        heap.free(c);
        let big = heap.allocate(3 * HEAP_ALIGNMENT).unwrap();
        assert_eq!(big.offset, a.offset);
        assert_eq!(heap.used(), 3 * HEAP_ALIGNMENT);
    }

    #[test]
    fn test_first_fit_reuses_freed_space() {
        let mut heap = HeapAllocator::new(16 * HEAP_ALIGNMENT);
        let a = heap.allocate(2 * HEAP_ALIGNMENT).unwrap();
        let _b = heap.allocate(HEAP_ALIGNMENT).unwrap();
        heap.free(a);
        let c = heap.allocate(HEAP_ALIGNMENT).unwrap();
        assert_eq!(c.offset, a.offset, "hole before b is the first fit");
    }

    #[test]
    fn test_slot_table_insert_get_remove() {
        let mut table: SlotTable<String> = SlotTable::new();
        let (i, g) = table.insert("bvh nodes".to_string());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(i, g).unwrap(), "bvh nodes");

        let removed = table.remove(i, g).unwrap();
        assert_eq!(removed, "bvh nodes");
        assert!(table.is_empty());
        assert!(table.get(99, 0).is_none(), "unknown index is a plain miss");
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut table: SlotTable<u32> = SlotTable::new();
        let (i0, g0) = table.insert(1);
        table.remove(i0, g0);
        let (i1, g1) = table.insert(2);
        assert_eq!(i0, i1, "slot is reused");
        assert_ne!(g0, g1, "generation moved");
        assert_eq!(*table.get(i1, g1).unwrap(), 2);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "stale handle")]
    fn test_stale_handle_panics_in_debug() {
        let mut table: SlotTable<u32> = SlotTable::new();
        let (i, g) = table.insert(7);
        table.remove(i, g);
        table.insert(8);
        // The old pair now names a recycled slot.
        let _ = table.get(i, g);
    }
}
