//! First-fit free-list allocator over one linear buffer.
//!
//! The allocator only does offset bookkeeping; it never touches buffer
//! memory. Free blocks are kept sorted by offset so that a released range
//! can be merged with both neighbours in `O(log n)`.
//!
//! # Example
//!
//! ```
//! use redlilium_mesh_cache::resources::RangeAllocator;
//!
//! let mut allocator = RangeAllocator::new(1024);
//! let a = allocator.alloc(256).unwrap();
//! let b = allocator.alloc(256).unwrap();
//! assert_eq!((a, b), (0, 256));
//!
//! allocator.free(a, 256);
//! // Freeing `b` merges it with `a` and the tail into one 1024-byte block.
//! assert_eq!(allocator.free(b, 256), 1024);
//! ```

use std::collections::BTreeMap;

/// A free-list byte-range allocator.
#[derive(Debug, Clone)]
pub struct RangeAllocator {
    /// Free blocks, offset -> size. Never contains adjacent or empty blocks.
    free_blocks: BTreeMap<u64, u64>,
    total_size: u64,
    free_size: u64,
}

impl RangeAllocator {
    /// Create an allocator managing `size` bytes, all free.
    pub fn new(size: u64) -> Self {
        let mut free_blocks = BTreeMap::new();
        if size > 0 {
            free_blocks.insert(0, size);
        }
        Self {
            free_blocks,
            total_size: size,
            free_size: size,
        }
    }

    /// Allocate `size` bytes from the lowest-offset block that fits.
    ///
    /// Returns `None` if no single free block is large enough, even when the
    /// total free size would be.
    pub fn alloc(&mut self, size: u64) -> Option<u64> {
        if size == 0 || size > self.free_size {
            return None;
        }

        let (&offset, &block) = self.free_blocks.iter().find(|&(_, &block)| block >= size)?;
        self.free_blocks.remove(&offset);
        if block > size {
            self.free_blocks.insert(offset + size, block - size);
        }
        self.free_size -= size;
        Some(offset)
    }

    /// Return a range to the free list.
    ///
    /// The range is merged with adjacent free blocks. Returns the size of the
    /// resulting free block, which is at least `size`.
    ///
    /// Freeing a range that is not currently allocated corrupts the
    /// allocator; this is only checked in debug builds.
    pub fn free(&mut self, offset: u64, size: u64) -> u64 {
        if size == 0 {
            return 0;
        }
        debug_assert!(offset + size <= self.total_size, "free out of bounds");
        debug_assert!(!self.overlaps_free(offset, size), "double free of range");

        let mut start = offset;
        let mut merged = size;

        if let Some((&prev_offset, &prev_size)) = self.free_blocks.range(..offset).next_back()
            && prev_offset + prev_size == offset
        {
            self.free_blocks.remove(&prev_offset);
            start = prev_offset;
            merged += prev_size;
        }

        if let Some(next_size) = self.free_blocks.remove(&(offset + size)) {
            merged += next_size;
        }

        self.free_blocks.insert(start, merged);
        self.free_size += size;
        merged
    }

    /// Get the number of free bytes.
    pub fn free_size(&self) -> u64 {
        self.free_size
    }

    /// Get the managed size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Get the number of allocated bytes.
    pub fn used_size(&self) -> u64 {
        self.total_size - self.free_size
    }

    /// Whether nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.free_size == self.total_size
    }

    /// Size of the largest single free block.
    pub fn largest_free_block(&self) -> u64 {
        self.free_blocks.values().copied().max().unwrap_or(0)
    }

    /// Number of free blocks (a fragmentation measure).
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    fn overlaps_free(&self, offset: u64, size: u64) -> bool {
        let end = offset + size;
        if let Some((&prev_offset, &prev_size)) = self.free_blocks.range(..=offset).next_back()
            && prev_offset + prev_size > offset
        {
            return true;
        }
        self.free_blocks.range(offset..end).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_first_fit() {
        let mut allocator = RangeAllocator::new(1024);
        assert_eq!(allocator.alloc(100), Some(0));
        assert_eq!(allocator.alloc(200), Some(100));
        assert_eq!(allocator.free_size(), 724);
        assert_eq!(allocator.used_size(), 300);
    }

    #[test]
    fn test_alloc_too_large() {
        let mut allocator = RangeAllocator::new(256);
        assert_eq!(allocator.alloc(512), None);
        assert_eq!(allocator.alloc(0), None);
        assert_eq!(allocator.alloc(256), Some(0));
        assert_eq!(allocator.alloc(1), None);
    }

    #[test]
    fn test_fragmentation_is_a_failure() {
        let mut allocator = RangeAllocator::new(300);
        let a = allocator.alloc(100).unwrap();
        let _b = allocator.alloc(100).unwrap();
        let c = allocator.alloc(100).unwrap();
        allocator.free(a, 100);
        allocator.free(c, 100);

        assert_eq!(allocator.free_size(), 200);
        assert_eq!(allocator.largest_free_block(), 100);
        assert_eq!(allocator.alloc(150), None);
    }

    #[test]
    fn test_free_coalesces_both_sides() {
        let mut allocator = RangeAllocator::new(300);
        let a = allocator.alloc(100).unwrap();
        let b = allocator.alloc(100).unwrap();
        let c = allocator.alloc(100).unwrap();

        assert_eq!(allocator.free(a, 100), 100);
        assert_eq!(allocator.free(c, 100), 100);
        assert_eq!(allocator.free_block_count(), 2);

        assert_eq!(allocator.free(b, 100), 300);
        assert_eq!(allocator.free_block_count(), 1);
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_freed_range_is_reused() {
        let mut allocator = RangeAllocator::new(1024);
        let a = allocator.alloc(128).unwrap();
        let _b = allocator.alloc(128).unwrap();
        allocator.free(a, 128);
        assert_eq!(allocator.alloc(128), Some(a));
    }

    #[test]
    fn test_free_plus_live_equals_total() {
        let mut allocator = RangeAllocator::new(4096);
        let mut live: Vec<(u64, u64)> = Vec::new();
        let mut seed = 0x2545_f491_u64;

        for step in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            if live.is_empty() || seed % 3 != 0 {
                let size = 16 * (1 + seed % 16);
                if let Some(offset) = allocator.alloc(size) {
                    live.push((offset, size));
                }
            } else {
                let (offset, size) = live.swap_remove((seed as usize / 3) % live.len());
                assert!(allocator.free(offset, size) >= size);
            }

            let live_size: u64 = live.iter().map(|&(_, size)| size).sum();
            assert_eq!(
                allocator.free_size() + live_size,
                allocator.total_size(),
                "accounting broke at step {step}"
            );
        }

        live.sort_unstable();
        for pair in live.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "live ranges overlap");
        }
    }
}
