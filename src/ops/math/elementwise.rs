use std::cmp::max;

use crate::error::{Error, Result};
use crate::model::Shape;

/// Numpy-style broadcast of two shapes
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Result<Shape> {
    let rank = max(shape1.len(), shape2.len());
    let mut result = Vec::with_capacity(rank);

    for i in 0..rank {
        let dim1 = if i < rank - shape1.len() { 1 } else { shape1[i - (rank - shape1.len())] };
        let dim2 = if i < rank - shape2.len() { 1 } else { shape2[i - (rank - shape2.len())] };

        if dim1 == dim2 || dim2 == 1 {
            result.push(dim1);
        } else if dim1 == 1 {
            result.push(dim2);
        } else {
            return Err(Error::ValidationError(format!(
                "Cannot broadcast shapes {:?} and {:?}",
                shape1, shape2
            )));
        }
    }

    Ok(result)
}
