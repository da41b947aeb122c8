//! Offset planner for the single arena of a graph.
//!
//! Planning hands out byte offsets inside a virtual arena that does not exist
//! yet. Freed ranges go to an offset-ordered free list that never holds two
//! adjacent blocks. The first request for the base pointer allocates the
//! physical arena, sized to the high-water mark, and ends planning for good.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::memory::provider::{ArenaBuffer, MemoryProvider};

#[derive(Debug)]
enum ArenaState {
    Planning,
    Materialized(Arc<ArenaBuffer>),
}

/// Free-list arena planner with lazy, one-shot materialization
#[derive(Debug)]
pub struct MemoryAllocator {
    provider: Arc<dyn MemoryProvider>,
    alignment: usize,
    /// Bytes currently handed out
    used: usize,
    /// High-water mark of `extent`; the size of the materialized arena
    peak: usize,
    /// End of the furthest live or free block
    extent: usize,
    /// offset -> size
    free_blocks: BTreeMap<usize, usize>,
    state: ArenaState,
}

impl MemoryAllocator {
    pub fn new(provider: Arc<dyn MemoryProvider>, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(Error::InvalidAlignment(alignment));
        }
        Ok(Self {
            provider,
            alignment,
            used: 0,
            peak: 0,
            extent: 0,
            free_blocks: BTreeMap::new(),
            state: ArenaState::Planning,
        })
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Round `size` up to the alignment; an empty request still takes one unit
    pub fn aligned_size(&self, size: usize) -> usize {
        let size = size.max(1);
        (size + self.alignment - 1) & !(self.alignment - 1)
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.state, ArenaState::Materialized(_))
    }

    fn ensure_planning(&self) -> Result<()> {
        if self.is_materialized() {
            log::warn!("planning call on a materialized allocator");
            return Err(Error::AllocatorMaterialized);
        }
        Ok(())
    }

    /// Reserve `size` bytes and return their offset in the arena
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        self.ensure_planning()?;
        let size = self.aligned_size(size);

        let offset = match self.first_fit(size) {
            Some((offset, block_size)) => {
                self.free_blocks.remove(&offset);
                if block_size > size {
                    self.free_blocks.insert(offset + size, block_size - size);
                }
                offset
            }
            None => self.grow(size),
        };

        self.used += size;
        log::trace!("alloc {} bytes at offset {} (used {}, peak {})", size, offset, self.used, self.peak);
        Ok(offset)
    }

    fn first_fit(&self, size: usize) -> Option<(usize, usize)> {
        self.free_blocks
            .iter()
            .find(|(_, &block_size)| block_size >= size)
            .map(|(&offset, &block_size)| (offset, block_size))
    }

    /// Bump `extent` by `size`. `free` retracts any free block that reaches
    /// the tail, so the last free block always ends short of `extent`.
    fn grow(&mut self, size: usize) -> usize {
        debug_assert!(self
            .free_blocks
            .iter()
            .next_back()
            .map_or(true, |(&offset, &block_size)| offset + block_size < self.extent));
        let offset = self.extent;
        self.extent = offset + size;
        self.peak = self.peak.max(self.extent);
        offset
    }

    /// Drop every reservation and start planning from an empty arena
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_planning()?;
        self.used = 0;
        self.peak = 0;
        self.extent = 0;
        self.free_blocks.clear();
        Ok(())
    }

    /// Return `[addr, addr + size)` to the free list
    pub fn free(&mut self, addr: usize, size: usize) -> Result<()> {
        self.ensure_planning()?;
        let size = self.aligned_size(size);
        let end = addr + size;

        let overlaps_prev = self
            .free_blocks
            .range(..end)
            .next_back()
            .map_or(false, |(&offset, &block_size)| offset + block_size > addr);
        if end > self.extent || size > self.used || overlaps_prev {
            return Err(Error::InvalidFree { offset: addr, size });
        }

        self.used -= size;
        let mut start = addr;
        let mut length = size;

        // Merge with the block ending at `addr`
        if let Some((&prev, &prev_size)) = self.free_blocks.range(..addr).next_back() {
            if prev + prev_size == addr {
                self.free_blocks.remove(&prev);
                start = prev;
                length += prev_size;
            }
        }
        // Merge with the block starting at `end`
        if let Some(next_size) = self.free_blocks.remove(&end) {
            length += next_size;
        }

        if start + length == self.extent {
            // Tail of the arena is wholly free
            self.extent = start;
        } else {
            self.free_blocks.insert(start, length);
        }

        log::trace!("free {} bytes at offset {} (used {}, extent {})", size, addr, self.used, self.extent);
        Ok(())
    }

    /// Base of the physical arena, allocated on first call
    pub fn base_pointer(&mut self) -> Result<Arc<ArenaBuffer>> {
        if let ArenaState::Materialized(arena) = &self.state {
            return Ok(Arc::clone(arena));
        }

        let arena = Arc::new(ArenaBuffer::allocate(
            Arc::clone(&self.provider),
            self.peak,
            self.alignment,
        )?);
        self.state = ArenaState::Materialized(Arc::clone(&arena));
        Ok(arena)
    }

    /// Free blocks in ascending offset order
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.free_blocks.iter().map(|(&offset, &size)| (offset, size))
    }

    /// Every reusable range of the arena: the free blocks plus the unused
    /// tail between the current extent and the peak.
    pub fn free_regions(&self) -> Vec<(usize, usize)> {
        let mut regions: Vec<(usize, usize)> = self.free_blocks().collect();
        if self.peak > self.extent {
            regions.push((self.extent, self.peak - self.extent));
        }
        regions
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn report(&self) -> AllocatorReport {
        AllocatorReport {
            used: self.used,
            peak: self.peak,
            extent: self.extent,
            free_block_count: self.free_blocks.len(),
            free_block_bytes: self.free_blocks.values().sum(),
            materialized: self.is_materialized(),
        }
    }
}

/// Snapshot of the allocator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorReport {
    pub used: usize,
    pub peak: usize,
    pub extent: usize,
    pub free_block_count: usize,
    pub free_block_bytes: usize,
    pub materialized: bool,
}

impl fmt::Display for AllocatorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Used memory: {}, peak memory: {}, free blocks: {} ({} bytes)",
            self.used, self.peak, self.free_block_count, self.free_block_bytes
        )
    }
}
