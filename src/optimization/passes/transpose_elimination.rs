use crate::error::{Error, Result};
use crate::graph::GraphContainer;
use crate::model::{OpId, TensorId};
use crate::optimization::graph_optimizer::OptimizationPass;

/// A transpose feeding a transpose with the same permutation
#[derive(Debug, Clone, Copy)]
struct TransposePair {
    first: OpId,
    second: OpId,
    source: TensorId,
    intermediate: TensorId,
    result: TensorId,
}

/// Cancels adjacent transposes with identical permutations.
///
/// Consumers of the second transpose read the first transpose's input
/// directly. Matching compares the permutation vectors as written, so a
/// pair of non-involutory permutations is cancelled as well.
pub struct TransposeElimination {
    name: String,
}

impl TransposeElimination {
    pub fn new() -> Self {
        Self {
            name: "TransposeElimination".to_string(),
        }
    }

    fn find_pair(&self, graph: &GraphContainer, op: OpId) -> Option<TransposePair> {
        let first = graph.operator(op)?;
        let perm = first.kind().permutation()?;
        let source = *first.inputs().first()?;
        let intermediate = *first.outputs().first()?;

        first.successors().iter().find_map(|&succ| {
            let second = graph.operator(succ)?;
            if second.kind().permutation() != Some(perm) || second.inputs().first() != Some(&intermediate) {
                return None;
            }
            let result = *second.outputs().first()?;
            let consumers = graph.tensor(result)?.targets();
            // A transpose whose output leaves the graph is kept
            if consumers.is_empty() {
                return None;
            }
            // The pair feeds itself; rewiring would leave `result` referenced
            if result == source || consumers.contains(&op) || consumers.contains(&succ) {
                return None;
            }
            Some(TransposePair {
                first: op,
                second: succ,
                source,
                intermediate,
                result,
            })
        })
    }

    fn apply(&self, graph: &mut GraphContainer, pair: TransposePair) -> Result<Vec<OpId>> {
        let consumers = graph
            .tensor(pair.result)
            .ok_or(Error::UnknownTensor(pair.result))?
            .targets()
            .to_vec();
        for &consumer in &consumers {
            graph.replace_input(consumer, pair.result, pair.source)?;
        }

        graph.remove_operator(pair.second)?;
        graph.remove_tensor(pair.result)?;

        let mut touched = consumers;
        let intermediate_unused = graph
            .tensor(pair.intermediate)
            .map_or(false, |t| t.targets().is_empty());
        if intermediate_unused {
            let first = graph.remove_operator(pair.first)?;
            graph.remove_tensor(pair.intermediate)?;
            touched.extend(first.predecessors().iter().copied());
        }

        log::debug!(
            "cancelled transposes {} and {}, {} now feeds {} consumers",
            pair.first,
            pair.second,
            pair.source,
            touched.len()
        );
        Ok(touched)
    }
}

impl Default for TransposeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for TransposeElimination {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, graph: &mut GraphContainer, op: OpId) -> Option<Vec<OpId>> {
        let pair = self.find_pair(graph, op)?;
        match self.apply(graph, pair) {
            Ok(touched) => Some(touched),
            Err(e) => {
                log::error!("{} failed around {}: {}", self.name, op, e);
                None
            }
        }
    }
}
