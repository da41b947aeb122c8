//! Tensor graph optimizer and arena memory planner.
//!
//! A host builds a [`GraphContainer`], then runs `topological_sort`,
//! `optimize`, `shape_infer` and `data_malloc` in that order. The last step
//! gives every tensor an offset in one physical arena.

pub mod error;
pub mod graph;
pub mod memory;
pub mod model;
pub mod ops;
pub mod optimization;
pub mod runtime;

// Re-export commonly used types
pub use error::{Error, Result};
pub use graph::GraphContainer;
pub use memory::{Blob, MemoryAllocator, MemoryPlan, MemoryProvider, SystemProvider};
pub use model::{DataType, OpId, OperatorNode, Shape, TensorId, TensorNode};
pub use ops::{BinaryOp, OpKind, OpType, Operator, OperatorRegistry, UnaryOp};
pub use optimization::graph_optimizer::{GraphOptimizer, OptimizationPass, OptimizationStats, PassResult};
pub use runtime::{OptimizationLevel, Runtime, RuntimeOptions};
