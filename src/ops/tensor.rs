//! Shape rules for layout operators and permutation helpers.
//!
//! A permutation `perm` applied by a transpose maps output axis `i` to input
//! axis `perm[i]`.

use crate::error::{Error, Result};
use crate::model::Shape;

/// Check that `perm` is a permutation of `0..perm.len()`
pub fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &axis in perm {
        if axis >= perm.len() || seen[axis] {
            return false;
        }
        seen[axis] = true;
    }
    true
}

pub fn is_identity(perm: &[usize]) -> bool {
    perm.iter().enumerate().all(|(i, &axis)| i == axis)
}

/// Permutation equivalent to transposing by `first` and then by `second`
pub fn compose(first: &[usize], second: &[usize]) -> Vec<usize> {
    second.iter().map(|&axis| first[axis]).collect()
}

/// Whether transposing twice by `perm` restores the original layout
pub fn is_involution(perm: &[usize]) -> bool {
    is_identity(&compose(perm, perm))
}

/// Keeps every leading axis in place and swaps exactly the last two.
///
/// This is the layout change a matmul can absorb through its transpose flags.
pub fn swaps_last_two_axes(perm: &[usize]) -> bool {
    let rank = perm.len();
    if rank < 2 {
        return false;
    }
    is_identity(&perm[..rank - 2]) && perm[rank - 2] == rank - 1 && perm[rank - 1] == rank - 2
}

pub fn transpose_output_shape(input: &[usize], perm: &[usize]) -> Result<Shape> {
    if perm.len() != input.len() {
        return Err(Error::ValidationError(format!(
            "Transpose permutation {:?} does not match input rank {}",
            perm,
            input.len()
        )));
    }
    if !is_permutation(perm) {
        return Err(Error::ValidationError(format!("{:?} is not a permutation", perm)));
    }
    Ok(perm.iter().map(|&axis| input[axis]).collect())
}

pub fn concat_output_shape(inputs: &[&Shape], axis: usize) -> Result<Shape> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::ValidationError("Concat requires at least one input".to_string()))?;
    if axis >= first.len() {
        return Err(Error::ValidationError(format!(
            "Concat axis {} out of range for rank {}",
            axis,
            first.len()
        )));
    }

    let mut output = (*first).clone();
    for shape in &inputs[1..] {
        let compatible = shape.len() == first.len()
            && shape.iter().zip(first.iter()).enumerate().all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(Error::ValidationError(format!(
                "Cannot concatenate {:?} with {:?} along axis {}",
                first, shape, axis
            )));
        }
        output[axis] += shape[axis];
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_checks() {
        assert!(is_permutation(&[2, 0, 1]));
        assert!(!is_permutation(&[0, 0, 1]));
        assert!(!is_permutation(&[0, 3]));
        assert!(is_identity(&[0, 1, 2]));
        assert!(!is_identity(&[1, 0]));
    }

    #[test]
    fn test_compose_matches_sequential_transposes() {
        let shape = vec![2, 3, 4];
        let first = [1, 2, 0];
        let second = [2, 0, 1];
        let step = transpose_output_shape(&shape, &first).unwrap();
        let step = transpose_output_shape(&step, &second).unwrap();
        let direct = transpose_output_shape(&shape, &compose(&first, &second)).unwrap();
        assert_eq!(step, direct);
        assert!(is_identity(&compose(&first, &second)));
    }

    #[test]
    fn test_involutions() {
        assert!(is_involution(&[1, 0]));
        assert!(is_involution(&[0, 2, 1]));
        assert!(is_involution(&[2, 1, 0]));
        assert!(!is_involution(&[1, 2, 0]));
    }

    #[test]
    fn test_swaps_last_two_axes() {
        assert!(swaps_last_two_axes(&[1, 0]));
        assert!(swaps_last_two_axes(&[0, 1, 3, 2]));
        assert!(!swaps_last_two_axes(&[1, 0, 2]));
        assert!(!swaps_last_two_axes(&[1, 0, 3, 2]));
        assert!(!swaps_last_two_axes(&[0]));
    }

    #[test]
    fn test_transpose_shape() {
        assert_eq!(transpose_output_shape(&[2, 3, 4], &[0, 2, 1]).unwrap(), vec![2, 4, 3]);
        assert!(transpose_output_shape(&[2, 3], &[0, 2, 1]).is_err());
        assert!(transpose_output_shape(&[2, 3], &[1, 1]).is_err());
    }

    #[test]
    fn test_concat_shape() {
        let a = vec![2, 3];
        let b = vec![2, 5];
        assert_eq!(concat_output_shape(&[&a, &b], 1).unwrap(), vec![2, 8]);
        assert!(concat_output_shape(&[&a, &b], 0).is_err());
        assert!(concat_output_shape(&[&a], 2).is_err());
    }
}
