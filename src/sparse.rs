//! Sparse Gradient Maps
//!
//! Embedding tables and the BlackOut projection only ever receive gradient
//! on the columns that a minibatch actually touched. Materializing a dense
//! gradient the size of the vocabulary would waste nearly all of it, so
//! these accumulators are hashmaps keyed by token/class id with a single
//! uniform merge rule: `+=`, inserting on first touch.
//!
//! The same two types serve both consumers (embedding gradients and
//! sampled-softmax gradients), including the cross-worker merge at the end
//! of a minibatch.

use std::collections::HashMap;

use crate::{Real, VecR};

/// Sparse map from id to a gradient vector (one embedding column or one
/// output-weight column).
#[derive(Clone, Debug, Default)]
pub struct SparseVecGrad {
    map: HashMap<usize, VecR>,
}

impl SparseVecGrad {
    pub fn new() -> Self {
        Self::default()
    }

    /// `self[id] += grad`, inserting a copy on first touch.
    pub fn accumulate(&mut self, id: usize, grad: &VecR) {
        match self.map.get_mut(&id) {
            Some(g) => *g += grad,
            None => {
                self.map.insert(id, grad.clone());
            }
        }
    }

    /// Merge another accumulator into this one (`+=` per id).
    pub fn merge(&mut self, other: &SparseVecGrad) {
        for (&id, grad) in &other.map {
            self.accumulate(id, grad);
        }
    }

    /// Sum of squared entries, for the global gradient norm.
    pub fn squared_norm(&self) -> Real {
        self.map
            .values()
            .map(|g| g.iter().map(|v| v * v).sum::<Real>())
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &VecR)> {
        self.map.iter().map(|(&id, g)| (id, g))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn get(&self, id: usize) -> Option<&VecR> {
        self.map.get(&id)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Sparse map from id to a scalar gradient (one bias coefficient).
#[derive(Clone, Debug, Default)]
pub struct SparseScalarGrad {
    map: HashMap<usize, Real>,
}

impl SparseScalarGrad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, id: usize, grad: Real) {
        *self.map.entry(id).or_insert(0.0) += grad;
    }

    pub fn merge(&mut self, other: &SparseScalarGrad) {
        for (&id, &grad) in &other.map {
            self.accumulate(id, grad);
        }
    }

    pub fn squared_norm(&self) -> Real {
        self.map.values().map(|v| v * v).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Real)> + '_ {
        self.map.iter().map(|(&id, &g)| (id, g))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Real> {
        self.map.get(&id).copied()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
