use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::provider::{MemoryProvider, SystemProvider};

/// Alignment of every planned allocation unless configured otherwise.
///
/// Equals the width of the widest scalar a tensor can hold.
pub const DEFAULT_ALIGNMENT: usize = std::mem::size_of::<u64>();

/// Optimization level for graph rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// No rewrites
    None,
    /// Only cancel adjacent transpose pairs
    Basic,
    /// Transpose-pair elimination and transpose/matmul fusion (default)
    Standard,
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::Standard
    }
}

/// Options shared by every graph built on a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Alignment of planned allocations in bytes (power of two)
    pub alignment: usize,
    /// Memory limit in bytes for the physical provider (0 = no limit)
    pub memory_limit_bytes: usize,
    /// Level of optimization applied by `GraphContainer::optimize`
    pub optimization_level: OptimizationLevel,
    /// Release intermediate tensors after their last consumer while planning
    pub reuse_intermediate_buffers: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            memory_limit_bytes: 0,
            optimization_level: OptimizationLevel::Standard,
            reuse_intermediate_buffers: false,
        }
    }
}

impl RuntimeOptions {
    /// Create a new options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the allocation alignment
    pub fn set_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the memory limit
    pub fn set_memory_limit(mut self, memory_limit_bytes: usize) -> Self {
        self.memory_limit_bytes = memory_limit_bytes;
        self
    }

    /// Set the optimization level
    pub fn set_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    /// Enable or disable buffer reuse between intermediate tensors
    pub fn reuse_intermediate_buffers(mut self, enable: bool) -> Self {
        self.reuse_intermediate_buffers = enable;
        self
    }
}

struct RuntimeInner {
    name: String,
    provider: Arc<dyn MemoryProvider>,
    options: RuntimeOptions,
}

/// Handle to the device a graph is planned for.
///
/// Cloning is cheap; two handles are the same runtime only if they were cloned
/// from one another.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(name: impl Into<String>, provider: Arc<dyn MemoryProvider>, options: RuntimeOptions) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                name: name.into(),
                provider,
                options,
            }),
        }
    }

    /// Host runtime backed by the system allocator
    pub fn cpu() -> Self {
        Self::cpu_with_options(RuntimeOptions::default())
    }

    pub fn cpu_with_options(options: RuntimeOptions) -> Self {
        let limit = match options.memory_limit_bytes {
            0 => None,
            limit => Some(limit),
        };
        Self::new("cpu", Arc::new(SystemProvider::new(limit)), options)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn provider(&self) -> Arc<dyn MemoryProvider> {
        Arc::clone(&self.inner.provider)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn same_as(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.name)
            .field("provider", &self.inner.provider.name())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.inner.name, Arc::as_ptr(&self.inner))
    }
}
