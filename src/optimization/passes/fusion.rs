use crate::error::Result;
use crate::graph::GraphContainer;
use crate::model::{OpId, TensorId};
use crate::ops::tensor::swaps_last_two_axes;
use crate::optimization::graph_optimizer::OptimizationPass;

/// Matmul operand produced by a transpose the matmul can absorb
#[derive(Debug, Clone, Copy)]
struct FusionCandidate {
    slot: usize,
    transpose: OpId,
    source: TensorId,
    transposed: TensorId,
}

/// Folds last-two-axes transposes into the transpose flags of the matmul
/// consuming them.
pub struct TransposeMatMulFusion {
    name: String,
}

impl TransposeMatMulFusion {
    pub fn new() -> Self {
        Self {
            name: "TransposeMatMulFusion".to_string(),
        }
    }

    fn find_candidates(&self, graph: &GraphContainer, op: OpId) -> Vec<FusionCandidate> {
        let Some(matmul) = graph.operator(op) else { return Vec::new() };
        if matmul.kind().transpose_flags().is_none() {
            return Vec::new();
        }

        matmul
            .inputs()
            .iter()
            .enumerate()
            .filter_map(|(slot, &input)| {
                let producer = graph.producer(input)?;
                if !swaps_last_two_axes(producer.kind().permutation()?) {
                    return None;
                }
                let source = *producer.inputs().first()?;
                // Folding would make the matmul read its own output
                if source == input || matmul.outputs().contains(&source) {
                    return None;
                }
                Some(FusionCandidate {
                    slot,
                    transpose: producer.id(),
                    source,
                    transposed: input,
                })
            })
            .collect()
    }

    fn apply(&self, graph: &mut GraphContainer, op: OpId, candidates: &[FusionCandidate]) -> Result<Vec<OpId>> {
        for candidate in candidates {
            graph.replace_input_at(op, candidate.slot, candidate.source)?;
            if let Some(kind) = graph.operator_kind_mut(op) {
                kind.toggle_transpose(candidate.slot);
            }
            log::debug!("folded {} into slot {} of {}", candidate.transpose, candidate.slot, op);
        }

        let mut touched = Vec::new();
        for candidate in candidates {
            if !graph.contains_operator(candidate.transpose) {
                continue;
            }
            let unused = graph
                .tensor(candidate.transposed)
                .map_or(false, |t| t.targets().is_empty());
            if unused {
                let transpose = graph.remove_operator(candidate.transpose)?;
                graph.remove_tensor(candidate.transposed)?;
                touched.extend(transpose.predecessors().iter().copied());
            }
        }
        Ok(touched)
    }
}

impl Default for TransposeMatMulFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for TransposeMatMulFusion {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, graph: &mut GraphContainer, op: OpId) -> Option<Vec<OpId>> {
        let candidates = self.find_candidates(graph, op);
        if candidates.is_empty() {
            return None;
        }
        match self.apply(graph, op, &candidates) {
            Ok(touched) => Some(touched),
            Err(e) => {
                log::error!("{} failed around {}: {}", self.name, op, e);
                None
            }
        }
    }
}
