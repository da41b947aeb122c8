use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::graph::GraphContainer;
use crate::model::OpId;
use crate::runtime::OptimizationLevel;

/// Result of running an optimization pass
#[derive(Debug, Clone, Serialize)]
pub struct PassResult {
    /// Name of the pass
    pub name: String,
    /// Number of rewrites applied
    pub optimizations_applied: usize,
    /// Time spent matching and rewriting
    pub duration: Duration,
    /// Whether the pass made any changes
    pub changed: bool,
}

impl PassResult {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optimizations_applied: 0,
            duration: Duration::ZERO,
            changed: false,
        }
    }
}

/// Statistics from running optimization passes
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationStats {
    /// Results from each pass
    pub pass_results: Vec<PassResult>,
    /// Total number of rewrites applied
    pub total_optimizations: usize,
    /// Total time spent optimizing
    pub total_duration: Duration,
    /// Full rounds over the graph, including the final one that changed nothing
    pub rounds: usize,
}

impl OptimizationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass result
    pub fn add_pass_result(&mut self, result: PassResult) {
        self.total_optimizations += result.optimizations_applied;
        self.total_duration += result.duration;
        self.pass_results.push(result);
    }

    pub fn changed(&self) -> bool {
        self.total_optimizations > 0
    }
}

/// A local rewrite rule anchored at one operator
pub trait OptimizationPass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &str;

    /// Try to rewrite the neighbourhood of `op`.
    ///
    /// Returns `None` when the rule does not match. On a match the rewrite is
    /// applied in full and the operators whose surroundings changed are
    /// returned so they can be revisited.
    fn rewrite(&self, graph: &mut GraphContainer, op: OpId) -> Option<Vec<OpId>>;
}

/// Applies local rewrite passes until none of them matches anywhere
pub struct GraphOptimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl GraphOptimizer {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Register an optimization pass
    pub fn register_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Register the passes of the default level
    pub fn with_default_passes(self) -> Self {
        self.with_passes(Self::create_default_passes(OptimizationLevel::default()))
    }

    pub fn for_level(level: OptimizationLevel) -> Self {
        Self::new().with_passes(Self::create_default_passes(level))
    }

    fn with_passes(mut self, passes: Vec<Box<dyn OptimizationPass>>) -> Self {
        for pass in passes {
            self.register_pass(pass);
        }
        self
    }

    /// Create default passes for the given optimization level
    pub fn create_default_passes(level: OptimizationLevel) -> Vec<Box<dyn OptimizationPass>> {
        use crate::optimization::passes::fusion::TransposeMatMulFusion;
        use crate::optimization::passes::transpose_elimination::TransposeElimination;

        match level {
            OptimizationLevel::None => Vec::new(),
            OptimizationLevel::Basic => vec![Box::new(TransposeElimination::new()) as Box<dyn OptimizationPass>],
            OptimizationLevel::Standard => vec![
                Box::new(TransposeElimination::new()) as Box<dyn OptimizationPass>,
                Box::new(TransposeMatMulFusion::new()) as Box<dyn OptimizationPass>,
            ],
        }
    }

    pub fn passes(&self) -> impl Iterator<Item = &str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    /// Rewrite the graph to a fixed point.
    ///
    /// Each round seeds a worklist with every operator in container order.
    /// After a rewrite the touched operators go to the front of the worklist.
    /// Rounds repeat until one performs no rewrite at all.
    pub fn optimize(&self, graph: &mut GraphContainer) -> OptimizationStats {
        let mut results: Vec<PassResult> = self.passes.iter().map(|p| PassResult::new(p.name())).collect();
        let mut rounds = 0;

        if !self.passes.is_empty() {
            loop {
                rounds += 1;
                let rewrites = self.run_round(graph, &mut results);
                log::debug!("optimizer round {} applied {} rewrites", rounds, rewrites);
                if rewrites == 0 {
                    break;
                }
            }
        }

        let mut stats = OptimizationStats::new();
        stats.rounds = rounds;
        for result in results {
            stats.add_pass_result(result);
        }
        log::info!(
            "optimizer applied {} rewrites in {} rounds ({:?})",
            stats.total_optimizations,
            stats.rounds,
            stats.total_duration
        );
        stats
    }

    fn run_round(&self, graph: &mut GraphContainer, results: &mut [PassResult]) -> usize {
        let mut worklist: VecDeque<OpId> = graph.operator_ids().iter().copied().collect();
        let mut rewrites = 0;

        while let Some(op) = worklist.pop_front() {
            if !graph.contains_operator(op) {
                continue;
            }
            for (pass, result) in self.passes.iter().zip(results.iter_mut()) {
                let start = Instant::now();
                let touched = pass.rewrite(graph, op);
                result.duration += start.elapsed();

                let Some(touched) = touched else { continue };
                result.optimizations_applied += 1;
                result.changed = true;
                rewrites += 1;
                log::debug!("{} rewrote around {}", pass.name(), op);

                if graph.contains_operator(op) {
                    worklist.push_front(op);
                }
                for touched_op in touched.into_iter().rev() {
                    if graph.contains_operator(touched_op) {
                        worklist.push_front(touched_op);
                    }
                }
                break;
            }
        }
        rewrites
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
