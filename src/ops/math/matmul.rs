use std::cmp::max;

use crate::error::{Error, Result};
use crate::model::Shape;

/// Output shape of `op(A) x op(B)`, where `op` transposes the last two axes
/// when the matching flag is set.
///
/// Both operands must have rank >= 2; leading (batch) axes broadcast.
pub fn matmul_output_shape(a_shape: &[usize], b_shape: &[usize], trans_a: bool, trans_b: bool) -> Result<Shape> {
    let a_rank = a_shape.len();
    let b_rank = b_shape.len();

    if a_rank < 2 || b_rank < 2 {
        return Err(Error::ValidationError(format!(
            "MatMul inputs must have at least rank 2, got {} and {}",
            a_rank, b_rank
        )));
    }

    let (a_rows, a_cols) = (a_shape[a_rank - 2], a_shape[a_rank - 1]);
    let (b_rows, b_cols) = (b_shape[b_rank - 2], b_shape[b_rank - 1]);

    let (m, k_a) = if trans_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (k_b, n) = if trans_b { (b_cols, b_rows) } else { (b_rows, b_cols) };

    if k_a != k_b {
        return Err(Error::ValidationError(format!(
            "Incompatible matrix dimensions for MatMul: {}x{} and {}x{}",
            m, k_a, k_b, n
        )));
    }

    let mut output_shape = broadcast_batch_dims(&a_shape[..a_rank - 2], &b_shape[..b_rank - 2])?;
    output_shape.push(m);
    output_shape.push(n);

    Ok(output_shape)
}

/// Helper function to broadcast batch dimensions
fn broadcast_batch_dims(a_batch: &[usize], b_batch: &[usize]) -> Result<Shape> {
    // Pad shorter batch with ones
    let max_batch_dims = max(a_batch.len(), b_batch.len());
    let mut padded_a = vec![1; max_batch_dims];
    let mut padded_b = vec![1; max_batch_dims];

    for (i, &dim) in a_batch.iter().rev().enumerate() {
        padded_a[max_batch_dims - 1 - i] = dim;
    }

    for (i, &dim) in b_batch.iter().rev().enumerate() {
        padded_b[max_batch_dims - 1 - i] = dim;
    }

    let mut result = Vec::with_capacity(max_batch_dims + 2);
    for (dim_a, dim_b) in padded_a.iter().zip(padded_b.iter()) {
        if *dim_a == 1 {
            result.push(*dim_b);
        } else if *dim_b == 1 || dim_a == dim_b {
            result.push(*dim_a);
        } else {
            return Err(Error::ValidationError(format!(
                "Cannot broadcast batch dimensions {} and {}",
                dim_a, dim_b
            )));
        }
    }

    Ok(result)
}
