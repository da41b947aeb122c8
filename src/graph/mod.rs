//! Graph container: tensor and operator arena, rewiring, ordering, shape
//! inference and memory binding.

pub mod binding;
pub mod builder;
pub mod container;
pub mod shape;
pub mod topo;
pub mod validate;

pub use container::GraphContainer;
