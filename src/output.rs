//! Output-Layer Dispatch
//!
//! The trainer scores hidden states against the target vocabulary either
//! exactly ([`crate::softmax::SoftMax`]) or with sampled BlackOut
//! ([`crate::blackout::BlackOut`]). The variant is chosen once at
//! construction; everything downstream works through this enum so the
//! training loop and beam search are written exactly once.
//!
//! Training steps go through [`OutputLayer::train_step`], which hides the
//! difference between the exact cross-entropy and the sampled
//! discriminative loss. Decoding always uses the exact distribution,
//! whichever variant trained the weights.

use std::io::{Read, Write};

use crate::blackout::{BlackOut, BlackOutGrad, BlackOutState};
use crate::rng::XorShift;
use crate::softmax::{SoftMax, SoftMaxGrad};
use crate::{Real, VecR};

/// Which output layer to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Exact full-vocabulary softmax.
    Exact,
    /// BlackOut sampled softmax with `num_samples` negatives per step.
    BlackOut { num_samples: usize },
}

pub enum OutputLayer {
    Exact(SoftMax),
    BlackOut(BlackOut),
}

pub enum OutputGrad {
    Exact(SoftMaxGrad),
    BlackOut(BlackOutGrad),
}

/// Per-thread output state. The exact softmax is stateless; BlackOut
/// carries its sampling state.
#[derive(Clone, Debug)]
pub enum OutputState {
    Exact,
    BlackOut(BlackOutState),
}

impl OutputLayer {
    pub fn new(kind: OutputKind, hidden_dim: usize, vocab_size: usize, seed: u64) -> Self {
        match kind {
            OutputKind::Exact => Self::Exact(SoftMax::new(hidden_dim, vocab_size)),
            OutputKind::BlackOut { num_samples } => {
                Self::BlackOut(BlackOut::new(hidden_dim, vocab_size, num_samples, seed))
            }
        }
    }

    pub fn init(&mut self, rng: &mut XorShift, scale: Real) {
        match self {
            Self::Exact(s) => s.init(rng, scale),
            Self::BlackOut(b) => b.init(rng, scale),
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Self::Exact(s) => s.vocab_size(),
            Self::BlackOut(b) => b.vocab_size(),
        }
    }

    /// Build the negative-sampling table from target-side token counts.
    /// No-op for the exact softmax.
    pub fn init_sampling(&mut self, freq: &[usize], alpha: Real) {
        if let Self::BlackOut(b) = self {
            b.init_sampling(freq, alpha);
        }
    }

    /// Per-thread state, forked from the layer's own stream.
    pub fn state(&mut self) -> OutputState {
        match self {
            Self::Exact(_) => OutputState::Exact,
            Self::BlackOut(b) => OutputState::BlackOut(b.state()),
        }
    }

    /// Per-thread state from an explicit seed; used when worker streams
    /// must be drawn up front.
    pub fn state_with_seed(&self, seed: u64) -> OutputState {
        match self {
            Self::Exact(_) => OutputState::Exact,
            Self::BlackOut(b) => OutputState::BlackOut(BlackOutState::with_seed(seed, b.num_samples)),
        }
    }

    /// One training timestep: loss of `label` given hidden state `h`,
    /// with parameter gradients accumulated into `grad`. Returns the loss
    /// and the gradient w.r.t. `h`.
    pub fn train_step(
        &self,
        h: &VecR,
        label: usize,
        state: &mut OutputState,
        grad: &mut OutputGrad,
    ) -> (Real, VecR) {
        match (self, state, grad) {
            (Self::Exact(s), OutputState::Exact, OutputGrad::Exact(g)) => {
                let mut dist = VecR::zeros(s.vocab_size());
                s.calc_dist(h, &mut dist);
                let loss = s.calc_loss(&dist, label);
                let delh = s.backward(h, &dist, label, g);
                (loss, delh)
            }
            (Self::BlackOut(b), OutputState::BlackOut(st), OutputGrad::BlackOut(g)) => {
                b.sampling(label, st);
                let mut dist = VecR::zeros(0);
                b.calc_sampled_dist(h, &mut dist, st);
                let loss = b.calc_sampled_loss(&dist);
                let delh = b.backward(h, &dist, st, g);
                (loss, delh)
            }
            _ => unreachable!("output layer, state, and gradient variants must match"),
        }
    }

    /// Exact distribution over the full vocabulary, for decoding.
    pub fn calc_dist(&self, h: &VecR, dist: &mut VecR) {
        match self {
            Self::Exact(s) => s.calc_dist(h, dist),
            Self::BlackOut(b) => b.calc_dist(h, dist),
        }
    }

    pub fn grad(&self) -> OutputGrad {
        match self {
            Self::Exact(s) => OutputGrad::Exact(s.grad()),
            Self::BlackOut(_) => OutputGrad::BlackOut(BlackOutGrad::new()),
        }
    }

    pub fn sgd(&mut self, grad: &OutputGrad, learning_rate: Real) {
        match (self, grad) {
            (Self::Exact(s), OutputGrad::Exact(g)) => s.sgd(g, learning_rate),
            (Self::BlackOut(b), OutputGrad::BlackOut(g)) => b.sgd(g, learning_rate),
            _ => unreachable!("output layer and gradient variants must match"),
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            Self::Exact(s) => s.save(w),
            Self::BlackOut(b) => b.save(w),
        }
    }

    pub fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        match self {
            Self::Exact(s) => s.load(r),
            Self::BlackOut(b) => b.load(r),
        }
    }
}

impl OutputGrad {
    pub fn reset(&mut self) {
        match self {
            Self::Exact(g) => g.reset(),
            Self::BlackOut(g) => g.reset(),
        }
    }

    pub fn merge(&mut self, other: &OutputGrad) {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a.merge(b),
            (Self::BlackOut(a), Self::BlackOut(b)) => a.merge(b),
            _ => unreachable!("gradient variants must match"),
        }
    }

    pub fn squared_norm(&self) -> Real {
        match self {
            Self::Exact(g) => g.squared_norm(),
            Self::BlackOut(g) => g.squared_norm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatR;
    use approx::assert_relative_eq;

    const HID: usize = 4;
    const VOCAB: usize = 6;

    fn setup(kind: OutputKind) -> (OutputLayer, VecR) {
        let mut rng = XorShift::new(21);
        let mut layer = OutputLayer::new(kind, HID, VOCAB, 77);
        layer.init(&mut rng, 0.5);
        layer.init_sampling(&[100, 80, 60, 40, 20, 10], 0.4);
        let mut m = MatR::zeros((HID, 1));
        rng.uniform(&mut m, 1.0);
        (layer, m.column(0).to_owned())
    }

    #[test]
    fn both_variants_decode_to_a_distribution() {
        for kind in [OutputKind::Exact, OutputKind::BlackOut { num_samples: 2 }] {
            let (layer, h) = setup(kind);
            let mut dist = VecR::zeros(VOCAB);
            layer.calc_dist(&h, &mut dist);
            assert_relative_eq!(dist.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn train_step_returns_positive_loss_and_hidden_gradient() {
        for kind in [OutputKind::Exact, OutputKind::BlackOut { num_samples: 2 }] {
            let (mut layer, h) = setup(kind);
            let mut state = layer.state();
            let mut grad = layer.grad();

            let (loss, delh) = layer.train_step(&h, 3, &mut state, &mut grad);
            assert!(loss > 0.0);
            assert_eq!(delh.len(), HID);
            assert!(grad.squared_norm() > 0.0);
        }
    }

    #[test]
    fn grad_reset_and_merge() {
        let (mut layer, h) = setup(OutputKind::Exact);
        let mut state = layer.state();

        let mut a = layer.grad();
        layer.train_step(&h, 0, &mut state, &mut a);
        let mut b = layer.grad();
        layer.train_step(&h, 0, &mut state, &mut b);

        let single = a.squared_norm();
        a.merge(&b);
        assert_relative_eq!(a.squared_norm(), 4.0 * single, max_relative = 1e-9);

        a.reset();
        assert_eq!(a.squared_norm(), 0.0);
    }

    #[test]
    fn sgd_reduces_loss_on_repeated_label() {
        let (mut layer, h) = setup(OutputKind::Exact);
        let mut state = layer.state();
        let mut grad = layer.grad();

        let (before, _) = layer.train_step(&h, 2, &mut state, &mut grad);
        layer.sgd(&grad, 0.5);

        let mut dist = VecR::zeros(VOCAB);
        layer.calc_dist(&h, &mut dist);
        let after = -dist[2].ln();
        assert!(after < before);
    }
}
