use std::collections::HashSet;

use super::GraphContainer;

impl GraphContainer {
    /// Reorder operators so every producer precedes its consumers.
    ///
    /// Repeatedly sweeps the unplaced operators and places each one whose
    /// inputs are graph inputs or come from placed operators. Returns false
    /// and leaves the order untouched when a sweep places nothing, which
    /// happens for cycles and for producers missing from the graph.
    pub fn topological_sort(&mut self) -> bool {
        if self.sorted {
            return true;
        }

        let mut sorted = Vec::with_capacity(self.op_order.len());
        let mut placed = HashSet::with_capacity(self.op_order.len());

        while sorted.len() < self.op_order.len() {
            let mut modified = false;
            for &op in &self.op_order {
                if placed.contains(&op) {
                    continue;
                }
                let Some(node) = self.operators.get(&op) else { continue };
                let ready = node.inputs().iter().all(|input| {
                    match self.tensors.get(input).and_then(|t| t.source()) {
                        Some(source) => placed.contains(&source),
                        None => true,
                    }
                });
                if ready {
                    sorted.push(op);
                    placed.insert(op);
                    modified = true;
                }
            }
            if !modified {
                log::warn!(
                    "topological sort stuck with {} of {} operators placed",
                    sorted.len(),
                    self.op_order.len()
                );
                return false;
            }
        }

        self.op_order = sorted;
        self.sorted = true;
        true
    }
}
