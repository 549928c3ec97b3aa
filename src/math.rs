//! Small shared linear-algebra helpers on top of the ndarray substrate.

use crate::{MatR, Real, VecR};

/// Outer product `a ⊗ b` as a `(a.len(), b.len())` matrix.
///
/// Used for the rank-one weight-gradient updates `del ⊗ input`.
pub fn outer(a: &VecR, b: &VecR) -> MatR {
    let mut out = MatR::zeros((a.len(), b.len()));
    for (i, &av) in a.iter().enumerate() {
        for (j, &bv) in b.iter().enumerate() {
            out[[i, j]] = av * bv;
        }
    }
    out
}

/// `out += a ⊗ b` without allocating the intermediate matrix.
pub fn add_outer(out: &mut MatR, a: &VecR, b: &VecR) {
    for (i, &av) in a.iter().enumerate() {
        let mut row = out.row_mut(i);
        for (j, &bv) in b.iter().enumerate() {
            row[j] += av * bv;
        }
    }
}

/// Index of the largest coefficient, first occurrence winning ties.
///
/// The deterministic scan order matters: beam search relies on it for tie
/// breaking.
pub fn argmax(v: &VecR) -> usize {
    let mut best = 0;
    let mut best_val = Real::NEG_INFINITY;
    for (i, &val) in v.iter().enumerate() {
        if val > best_val {
            best = i;
            best_val = val;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn outer_shapes_and_values() {
        let a = array![1.0, 2.0];
        let b = array![3.0, 4.0, 5.0];
        let m = outer(&a, &b);
        assert_eq!(m.dim(), (2, 3));
        assert_eq!(m[[1, 2]], 10.0);
    }

    #[test]
    fn add_outer_accumulates() {
        let a = array![1.0, 2.0];
        let b = array![3.0, 4.0];
        let mut m = outer(&a, &b);
        add_outer(&mut m, &a, &b);
        assert_eq!(m[[0, 0]], 6.0);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&array![1.0, 3.0, 3.0, 2.0]), 1);
    }
}
