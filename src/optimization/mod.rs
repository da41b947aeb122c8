pub mod graph_optimizer;

pub mod passes {
    pub mod fusion;
    pub mod transpose_elimination;
}

pub use graph_optimizer::{GraphOptimizer, OptimizationPass, OptimizationStats, PassResult};
