//! # Slot Pool
//!
//! Fixed-capacity slot allocator with a free list.

/// A pool of `capacity` slots, each either free or holding one `T`.
///
/// Allocation pops the free list, so it is **O(1)** and never touches the
/// heap. The free list starts ordered so that the lowest slot index is handed
/// out first, and a freed slot is the next one reused. Both properties make
/// slot assignment deterministic for a given allocate/free sequence.
///
/// # Thread Safety
///
/// Not thread-safe. The pool is owned by whichever context drives the
/// simulation tick.
///
/// # Example
///
/// ```rust
/// use weave_core::PoolAllocator;
///
/// let mut pool: PoolAllocator<&str> = PoolAllocator::new(2);
/// let a = pool.allocate("tank").unwrap();
/// let _b = pool.allocate("shell").unwrap();
/// assert!(pool.allocate("crate").is_none());
///
/// pool.free(a);
/// let c = pool.allocate("crate").unwrap();
/// assert_eq!(a.index(), c.index());
/// ```
#[derive(Debug)]
pub struct PoolAllocator<T> {
    slots: Box<[Option<T>]>,
    /// Indices of free slots; the last element is allocated next.
    free_list: Vec<usize>,
    allocated: usize,
}

/// Stable reference to an occupied slot.
///
/// A handle is only meaningful for the pool that produced it, and only until
/// the slot is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle {
    index: usize,
}

impl PoolHandle {
    /// Slot index this handle refers to.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

impl<T> PoolAllocator<T> {
    /// Creates a pool with `capacity` free slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be greater than zero");

        let slots: Vec<Option<T>> = (0..capacity).map(|_| None).collect();

        Self {
            slots: slots.into_boxed_slice(),
            free_list: (0..capacity).rev().collect(),
            allocated: 0,
        }
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated
    }

    /// Number of free slots.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Returns true if every slot is occupied.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_list.is_empty()
    }

    /// Stores `value` in the next free slot.
    ///
    /// Returns `None` when the pool is full; the value is dropped and no
    /// existing slot is touched.
    pub fn allocate(&mut self, value: T) -> Option<PoolHandle> {
        let index = self.free_list.pop()?;
        self.slots[index] = Some(value);
        self.allocated += 1;
        Some(PoolHandle { index })
    }

    /// Frees the slot behind `handle`, returning its value.
    ///
    /// Freeing an already free slot returns `None` and leaves the free list
    /// unchanged.
    pub fn free(&mut self, handle: PoolHandle) -> Option<T> {
        let value = self.slots.get_mut(handle.index)?.take()?;
        self.free_list.push(handle.index);
        self.allocated -= 1;
        Some(value)
    }

    /// Shared access to an occupied slot.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.slots.get(handle.index)?.as_ref()
    }

    /// Mutable access to an occupied slot.
    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.index)?.as_mut()
    }

    /// Frees every slot. Storage is kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.free_list.clear();
        self.free_list.extend((0..self.slots.len()).rev());
        self.allocated = 0;
    }

    /// Occupied slots in slot-index order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|v| (PoolHandle { index }, v)))
    }

    /// Occupied slots in slot-index order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PoolHandle, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|v| (PoolHandle { index }, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_slot_first() {
        let mut pool: PoolAllocator<u8> = PoolAllocator::new(3);

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(2).unwrap();
        let c = pool.allocate(3).unwrap();

        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert!(pool.is_full());
    }

    #[test]
    fn full_pool_refuses() {
        let mut pool: PoolAllocator<u8> = PoolAllocator::new(2);

        pool.allocate(1).unwrap();
        pool.allocate(2).unwrap();
        assert!(pool.allocate(3).is_none());
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(4);

        let _a = pool.allocate(10).unwrap();
        let b = pool.allocate(20).unwrap();
        let _c = pool.allocate(30).unwrap();

        assert_eq!(pool.free(b), Some(20));
        let d = pool.allocate(40).unwrap();

        assert_eq!(d.index(), b.index());
        assert_eq!(pool.get(d), Some(&40));
    }

    #[test]
    fn double_free_is_harmless() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(2);

        let a = pool.allocate(1).unwrap();
        assert!(pool.free(a).is_some());
        assert!(pool.free(a).is_none());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn iteration_follows_slot_order() {
        let mut pool: PoolAllocator<char> = PoolAllocator::new(4);

        let a = pool.allocate('a').unwrap();
        pool.allocate('b').unwrap();
        pool.allocate('c').unwrap();
        pool.free(a);
        pool.allocate('d').unwrap();

        let order: Vec<char> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec!['d', 'b', 'c']);
    }

    #[test]
    fn clear_resets_everything() {
        let mut pool: PoolAllocator<u8> = PoolAllocator::new(2);
        pool.allocate(1).unwrap();
        pool.allocate(2).unwrap();

        pool.clear();

        assert_eq!(pool.allocated_count(), 0);
        assert_eq!(pool.allocate(9).unwrap().index(), 0);
    }
}
