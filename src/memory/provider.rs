use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Source of physical memory for materialized arenas
pub trait MemoryProvider: Send + Sync + fmt::Debug {
    /// Name of the provider, for diagnostics
    fn name(&self) -> &str;

    /// Allocate a block of memory with the specified size and alignment
    fn allocate(&self, size: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Release a block previously returned by `allocate` with the same size and alignment
    fn release(&self, ptr: NonNull<u8>, size: usize, alignment: usize);

    /// Get the amount of allocated memory
    fn allocated_memory(&self) -> usize;
}

/// Provider backed by the Rust global allocator
#[derive(Debug)]
pub struct SystemProvider {
    allocated: AtomicUsize,
    allocation_count: AtomicUsize,
    memory_limit: Option<usize>,
}

impl SystemProvider {
    /// Create a new system provider
    pub fn new(memory_limit: Option<usize>) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            memory_limit,
        }
    }

    /// Number of successful `allocate` calls so far
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    fn layout(size: usize, alignment: usize) -> Result<Layout> {
        // Zero-sized layouts cannot be allocated
        Layout::from_size_align(size.max(1), alignment).map_err(|e| {
            Error::AllocationFailed(format!(
                "Invalid memory layout: size={}, alignment={}, error={}",
                size, alignment, e
            ))
        })
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryProvider for SystemProvider {
    fn name(&self) -> &str {
        "system"
    }

    fn allocate(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        if let Some(limit) = self.memory_limit {
            let current = self.allocated.load(Ordering::Relaxed);
            if current.checked_add(size).map_or(true, |total| total > limit) {
                return Err(Error::MemoryLimitExceeded {
                    limit,
                    requested: size,
                    current,
                });
            }
        }

        let layout = Self::layout(size, alignment)?;
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::AllocationFailed(format!(
                "Failed to allocate memory: size={}, alignment={}",
                size, alignment
            ))
        })?;

        self.allocated.fetch_add(size, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    fn release(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        match Self::layout(size, alignment) {
            Ok(layout) => {
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                self.allocated.fetch_sub(size, Ordering::Relaxed);
            }
            Err(e) => log::error!("leaking {} bytes at {:p}: {}", size, ptr, e),
        }
    }

    fn allocated_memory(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// The single physical buffer a graph's tensors live in.
///
/// Returned to its provider when the last handle is dropped.
pub struct ArenaBuffer {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
    provider: Arc<dyn MemoryProvider>,
}

impl ArenaBuffer {
    pub(crate) fn allocate(provider: Arc<dyn MemoryProvider>, size: usize, alignment: usize) -> Result<Self> {
        let ptr = provider.allocate(size, alignment)?;
        log::info!("{} provider allocated arena of {} bytes at {:p}", provider.name(), size, ptr);
        Ok(Self {
            ptr,
            size,
            alignment,
            provider,
        })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl fmt::Debug for ArenaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaBuffer")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl Drop for ArenaBuffer {
    fn drop(&mut self) {
        log::debug!("releasing arena of {} bytes at {:p}", self.size, self.ptr);
        self.provider.release(self.ptr, self.size, self.alignment);
    }
}

/// Memory handle bound to a tensor: a position inside a shared arena
#[derive(Debug, Clone)]
pub struct Blob {
    arena: Arc<ArenaBuffer>,
    offset: usize,
}

impl Blob {
    pub(crate) fn new(arena: Arc<ArenaBuffer>, offset: usize) -> Self {
        debug_assert!(offset <= arena.size());
        Self { arena, offset }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn arena(&self) -> &Arc<ArenaBuffer> {
        &self.arena
    }

    /// Address of the tensor's first byte
    pub fn as_ptr(&self) -> NonNull<u8> {
        // offset never exceeds the arena size
        unsafe { NonNull::new_unchecked(self.arena.as_ptr().as_ptr().add(self.offset)) }
    }
}
