use crate::error::{Error, Result};
use crate::model::{Shape, TensorId};

use super::GraphContainer;

impl GraphContainer {
    /// Recompute every output shape from the operators' input shapes.
    ///
    /// Operators are visited in container order, so shapes flow through the
    /// graph in one pass once it is sorted.
    pub fn shape_infer(&mut self) -> Result<()> {
        let order = self.op_order.clone();
        for op_id in order {
            let (inferred, outputs) = {
                let op = self.operators.get(&op_id).ok_or(Error::UnknownOperator(op_id))?;
                let input_shapes = op
                    .inputs()
                    .iter()
                    .map(|t| self.tensors.get(t).map(|t| t.shape()).ok_or(Error::UnknownTensor(*t)))
                    .collect::<Result<Vec<&Shape>>>()?;
                let inferred = op.kind().infer_shapes(&input_shapes).map_err(|e| Error::ShapeInference {
                    op: op_id,
                    reason: e.to_string(),
                })?;
                (inferred, op.outputs().to_vec())
            };

            if inferred.len() != outputs.len() {
                return Err(Error::ShapeInference {
                    op: op_id,
                    reason: format!("inferred {} shapes for {} outputs", inferred.len(), outputs.len()),
                });
            }

            for (output, shape) in outputs.into_iter().zip(inferred) {
                self.update_shape(output, shape)?;
            }
        }
        Ok(())
    }

    fn update_shape(&mut self, id: TensorId, shape: Shape) -> Result<()> {
        let tensor = self.tensors.get_mut(&id).ok_or(Error::UnknownTensor(id))?;
        if tensor.shape() != &shape {
            log::debug!("tensor {} reshaped {:?} -> {:?}", id, tensor.shape(), shape);
            tensor.set_shape(shape);
        }
        Ok(())
    }
}
