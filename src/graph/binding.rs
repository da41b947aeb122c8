use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory::planner::{MemoryPlan, MemoryPlanner, PlanStep, TensorAllocation};
use crate::memory::provider::Blob;
use crate::model::TensorId;

use super::GraphContainer;

impl GraphContainer {
    /// Plan an offset for every tensor, materialize the arena once and bind
    /// each tensor to its slice of it.
    pub fn data_malloc(&mut self) -> Result<MemoryPlan> {
        if !self.topological_sort() {
            return Err(Error::InvalidGraph(
                "cannot plan memory for a graph without a topological order".to_string(),
            ));
        }

        // Reservations left by an earlier failed materialization
        self.allocator.reset()?;

        let planner = MemoryPlanner::new(self.runtime().options().reuse_intermediate_buffers);
        let steps = planner.schedule(self);

        let mut placements: HashMap<TensorId, (usize, usize)> = HashMap::with_capacity(self.tensors.len());
        for step in steps {
            match step {
                PlanStep::Allocate { tensor, bytes } => {
                    let offset = self.allocator.alloc(bytes)?;
                    placements.insert(tensor, (offset, bytes));
                }
                PlanStep::Release { tensor, bytes } => {
                    if let Some(&(offset, _)) = placements.get(&tensor) {
                        self.allocator.free(offset, bytes)?;
                    }
                }
            }
        }

        let arena = self.allocator.base_pointer()?;
        let mut allocations = Vec::with_capacity(placements.len());
        for (tensor_id, (offset, size_bytes)) in placements {
            if let Some(tensor) = self.tensors.get_mut(&tensor_id) {
                tensor.bind_blob(Blob::new(Arc::clone(&arena), offset));
            }
            allocations.push(TensorAllocation {
                tensor_id,
                offset,
                size_bytes,
            });
        }
        allocations.sort_by_key(|a| (a.offset, a.tensor_id));

        let report = self.allocator.report();
        log::info!("{}", report);

        Ok(MemoryPlan {
            allocations,
            used_bytes: report.used,
            peak_bytes: report.peak,
            alignment: self.allocator.alignment(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::graph::GraphContainer;
    use crate::model::DataType;
    use crate::ops::UnaryOp;
    use crate::runtime::{Runtime, RuntimeOptions};

    #[test]
    fn test_tensors_get_disjoint_blobs() {
        let mut graph = GraphContainer::new(Runtime::cpu()).unwrap();
        let a = graph.add_tensor(vec![2, 3], DataType::Float32);
        let b = graph.add_tensor(vec![3, 4], DataType::Float32);
        let mm = graph.matmul(a, b, false, false).unwrap();
        let c = graph.output(mm, 0).unwrap();

        let plan = graph.data_malloc().unwrap();
        assert_eq!(plan.allocations.len(), 3);
        assert_eq!(plan.allocation(a).unwrap().offset, 0);
        assert_eq!(plan.allocation(b).unwrap().offset, 24);
        assert_eq!(plan.allocation(c).unwrap().offset, 72);
        assert_eq!(plan.peak_bytes, 104);

        let arena = graph.tensor(a).unwrap().blob().unwrap().arena().clone();
        assert_eq!(arena.size(), 104);
        for id in [a, b, c] {
            let blob = graph.tensor(id).unwrap().blob().unwrap();
            assert!(std::sync::Arc::ptr_eq(blob.arena(), &arena));
        }
        assert!(graph.allocator().is_materialized());
    }

    #[test]
    fn test_retry_after_limit_failure_replans_from_scratch() {
        let options = RuntimeOptions::new().set_memory_limit(64);
        let mut graph = GraphContainer::new(Runtime::cpu_with_options(options)).unwrap();
        let x = graph.add_tensor(vec![10], DataType::Float32);
        graph.unary(UnaryOp::Relu, x).unwrap();

        for _ in 0..2 {
            assert!(matches!(
                graph.data_malloc(),
                Err(Error::MemoryLimitExceeded { requested: 80, .. })
            ));
            assert_eq!(graph.allocator().peak(), 80);
            assert_eq!(graph.allocator().used(), 80);
            assert!(!graph.allocator().is_materialized());
        }
        assert!(graph.tensor(x).unwrap().blob().is_none());
    }

    #[test]
    fn test_empty_graph_plans_nothing() {
        let mut graph = GraphContainer::new(Runtime::cpu()).unwrap();
        let plan = graph.data_malloc().unwrap();
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.peak_bytes, 0);
    }
}
