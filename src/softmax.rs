//! Exact Softmax Output Layer
//!
//! Full-vocabulary softmax: a linear projection from the hidden state to
//! one score per target token, normalized with the max-subtraction trick
//! so large scores cannot overflow `exp`.
//!
//! The backward pass uses the standard cross-entropy shortcut: with
//! one-hot target `t` and predicted distribution `p`, the score gradient
//! is simply `p - t`. The hidden-state gradient it produces is *returned*
//! to the caller, which adds it onto the owning state record; this layer
//! never touches a state chain itself.

use std::io::{Read, Write};

use crate::rng::XorShift;
use crate::serial;
use crate::{MatR, Real, VecR};

/// Linear projection plus softmax over the full target vocabulary.
#[derive(Clone, Debug)]
pub struct SoftMax {
    /// `(vocab, hidden)` score matrix.
    pub weight: MatR,
    /// One bias per vocabulary entry.
    pub bias: VecR,
}

/// Dense gradient accumulator for [`SoftMax`].
#[derive(Clone, Debug)]
pub struct SoftMaxGrad {
    pub weight: MatR,
    pub bias: VecR,
}

impl SoftMax {
    pub fn new(hidden_dim: usize, vocab_size: usize) -> Self {
        Self {
            weight: MatR::zeros((vocab_size, hidden_dim)),
            bias: VecR::zeros(vocab_size),
        }
    }

    pub fn init(&mut self, rng: &mut XorShift, scale: Real) {
        rng.uniform(&mut self.weight, scale);
    }

    pub fn vocab_size(&self) -> usize {
        self.bias.len()
    }

    /// Full predicted distribution for hidden state `h`, written into
    /// `dist` (length `vocab`).
    pub fn calc_dist(&self, h: &VecR, dist: &mut VecR) {
        *dist = self.weight.dot(h);
        *dist += &self.bias;

        let max = dist.iter().cloned().fold(Real::NEG_INFINITY, Real::max);
        let mut sum = 0.0;
        for v in dist.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        *dist /= sum;
    }

    /// Negative log-likelihood of `label` under an already-computed
    /// distribution.
    pub fn calc_loss(&self, dist: &VecR, label: usize) -> Real {
        -dist[label].ln()
    }

    /// Backward pass for one timestep. Accumulates parameter gradients
    /// into `grad` and returns the gradient w.r.t. `h`.
    pub fn backward(&self, h: &VecR, dist: &VecR, label: usize, grad: &mut SoftMaxGrad) -> VecR {
        let mut delta = dist.clone();
        delta[label] -= 1.0;

        crate::math::add_outer(&mut grad.weight, &delta, h);
        grad.bias += &delta;

        self.weight.t().dot(&delta)
    }

    pub fn grad(&self) -> SoftMaxGrad {
        SoftMaxGrad {
            weight: MatR::zeros(self.weight.dim()),
            bias: VecR::zeros(self.bias.len()),
        }
    }

    pub fn sgd(&mut self, grad: &SoftMaxGrad, learning_rate: Real) {
        crate::optimizer::sgd(&grad.weight, learning_rate, &mut self.weight);
        crate::optimizer::sgd_vec(&grad.bias, learning_rate, &mut self.bias);
    }

    pub fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        serial::write_mat(w, &self.weight)?;
        serial::write_vec(w, &self.bias)
    }

    pub fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        serial::read_mat(r, &mut self.weight)?;
        serial::read_vec(r, &mut self.bias)
    }
}

impl SoftMaxGrad {
    pub fn reset(&mut self) {
        self.weight.fill(0.0);
        self.bias.fill(0.0);
    }

    pub fn merge(&mut self, other: &SoftMaxGrad) {
        self.weight += &other.weight;
        self.bias += &other.bias;
    }

    pub fn squared_norm(&self) -> Real {
        self.weight.iter().map(|v| v * v).sum::<Real>()
            + self.bias.iter().map(|v| v * v).sum::<Real>()
    }
}
