//! BlackOut Sampled Softmax
//!
//! A weighted sampled-softmax output layer for large target vocabularies.
//! Instead of normalizing over every class, each training step scores the
//! true label plus `k` negative classes drawn from a distortion of the
//! unigram distribution, and optimizes a discriminative objective over
//! that small set:
//!
//! ```text
//! q(c)      ∝ (freq(c) / Σ freq)^α      proposal distribution
//! s_0       = label, s_1..s_k ~ q       (negatives never equal the label)
//! score_i   = (1/q(s_i)) · exp(b[s_i] + W.col(s_i)·h - max)
//! p_i       = score_i / Σ_j score_j
//! loss      = -ln p_0 - Σ_{i≥1} ln(1 - p_i)
//! ```
//!
//! The `1/q` importance weights correct for the sampling bias. The
//! backward pass is the exact derivative of this sampled loss:
//!
//! ```text
//! fragment_i = 1 / (1 - p_i)                       i = 1..k
//! sum        = Σ fragment_i
//! delta_0    = (k + 1 - sum) · p_0 - 1
//! delta_i    = (k + 1 - (sum - fragment_i)) · p_i
//! ```
//!
//! Gradients touch only the `k+1` sampled columns, so they accumulate in
//! the sparse maps from [`crate::sparse`].
//!
//! Sampling uses a precomputed replication table: class `c` appears
//! `⌊total · q(c)⌋` times in a shuffled pool, and a draw is one uniform
//! pool lookup. Each [`BlackOutState`] carries its own forked RNG stream
//! so worker threads sample independently yet reproducibly.
//!
//! At inference time [`BlackOut::calc_dist`] computes the exact
//! full-vocabulary softmax from the same weights; sampling is a training
//! device only.

use std::io::{Read, Write};

use crate::rng::XorShift;
use crate::serial;
use crate::sparse::{SparseScalarGrad, SparseVecGrad};
use crate::{MatR, Real, VecR};

/// BlackOut output layer. `weight` is `(hidden, vocab)` with one column
/// per class.
#[derive(Clone, Debug)]
pub struct BlackOut {
    pub weight: MatR,
    pub bias: VecR,
    pub num_samples: usize,

    rng: XorShift,
    /// Replication table over class ids; built by
    /// [`BlackOut::init_sampling`].
    sample_dist: Vec<usize>,
    /// Importance weights `1/q(c)`.
    dist_weight: VecR,
}

/// Per-thread sampling state: a private RNG stream and the `k+1` class
/// ids of the current timestep (`sample[0]` is the true label).
#[derive(Clone, Debug)]
pub struct BlackOutState {
    pub rng: XorShift,
    pub sample: Vec<usize>,
}

/// Sparse gradient accumulator: one vector per touched weight column, one
/// scalar per touched bias coefficient.
#[derive(Clone, Debug, Default)]
pub struct BlackOutGrad {
    pub weight: SparseVecGrad,
    pub bias: SparseScalarGrad,
}

impl BlackOut {
    pub fn new(hidden_dim: usize, vocab_size: usize, num_samples: usize, seed: u64) -> Self {
        Self {
            weight: MatR::zeros((hidden_dim, vocab_size)),
            bias: VecR::zeros(vocab_size),
            num_samples,
            rng: XorShift::new(seed),
            sample_dist: Vec::new(),
            dist_weight: VecR::zeros(vocab_size),
        }
    }

    pub fn init(&mut self, rng: &mut XorShift, scale: Real) {
        rng.uniform(&mut self.weight, scale);
    }

    pub fn vocab_size(&self) -> usize {
        self.bias.len()
    }

    /// Build the sampling table from raw token counts and the distortion
    /// exponent `alpha`. Must be called once before [`BlackOut::sampling`].
    pub fn init_sampling(&mut self, freq: &[usize], alpha: Real) {
        let sum: usize = freq.iter().sum();
        let total = sum;

        let mut q = VecR::from_iter(freq.iter().map(|&f| f as Real / sum as Real));
        q.mapv_inplace(|v| v.powf(alpha));
        q /= q.sum();

        self.sample_dist.clear();
        for (id, &qi) in q.iter().enumerate() {
            let num = (total as Real * qi) as usize;
            self.sample_dist.extend(std::iter::repeat(id).take(num));
        }
        self.rng.shuffle(&mut self.sample_dist);

        self.dist_weight = q.mapv(|v| 1.0 / v);
    }

    /// Fresh sampling state with an independent RNG stream forked from
    /// this layer's generator.
    pub fn state(&mut self) -> BlackOutState {
        let seed = self.rng.next_u64();
        BlackOutState::with_seed(seed, self.num_samples)
    }

    /// Draw `num_samples` negatives for `label` into `state.sample`,
    /// rejecting any draw equal to the label. Precondition: the table was
    /// built and contains at least one class besides `label`.
    pub fn sampling(&self, label: usize, state: &mut BlackOutState) {
        let size = self.sample_dist.len();
        state.sample[0] = label;

        for i in 1..=self.num_samples {
            let neg = loop {
                let neg = self.sample_dist[((state.rng.next_u64() >> 16) as usize) % size];
                if neg != label {
                    break neg;
                }
            };
            state.sample[i] = neg;
        }
    }

    /// Exact full-vocabulary distribution (no sampling); used at decode
    /// time.
    pub fn calc_dist(&self, h: &VecR, dist: &mut VecR) {
        *dist = self.weight.t().dot(h);
        *dist += &self.bias;

        let max = dist.iter().cloned().fold(Real::NEG_INFINITY, Real::max);
        let mut sum = 0.0;
        for v in dist.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        *dist /= sum;
    }

    /// Importance-weighted distribution over the `k+1` sampled classes.
    /// `dist[i]` corresponds to `state.sample[i]`.
    pub fn calc_sampled_dist(&self, h: &VecR, dist: &mut VecR, state: &BlackOutState) {
        *dist = VecR::zeros(self.num_samples + 1);

        for (i, &s) in state.sample.iter().enumerate() {
            dist[i] = self.bias[s] + self.weight.column(s).dot(h);
        }

        let max = dist.iter().cloned().fold(Real::NEG_INFINITY, Real::max);
        let mut sum = 0.0;
        for (i, &s) in state.sample.iter().enumerate() {
            dist[i] = self.dist_weight[s] * (dist[i] - max).exp();
            sum += dist[i];
        }
        *dist /= sum;
    }

    /// Negative log-likelihood under an exact distribution.
    pub fn calc_loss(&self, dist: &VecR, label: usize) -> Real {
        -dist[label].ln()
    }

    /// The sampled discriminative loss: `-ln p_0 - Σ ln(1 - p_i)`.
    pub fn calc_sampled_loss(&self, dist: &VecR) -> Real {
        let mut loss = -dist[0].ln();
        for &p in dist.iter().skip(1) {
            loss -= (1.0 - p).ln();
        }
        loss
    }

    /// Backward pass for one timestep. Accumulates sparse parameter
    /// gradients into `grad` and returns the gradient w.r.t. `h`.
    pub fn backward(
        &self,
        h: &VecR,
        dist: &VecR,
        state: &BlackOutState,
        grad: &mut BlackOutGrad,
    ) -> VecR {
        let k = self.num_samples;
        let fragment: Vec<Real> = dist.iter().skip(1).map(|&p| 1.0 / (1.0 - p)).collect();
        let sum: Real = fragment.iter().sum();

        let mut delta = VecR::zeros(k + 1);
        delta[0] = (k as Real + 1.0 - sum) * dist[0] - 1.0;
        for i in 1..=k {
            delta[i] = (k as Real + 1.0 - (sum - fragment[i - 1])) * dist[i];
        }

        let mut delta_feature = &self.weight.column(state.sample[0]) * delta[0];
        for i in 1..=k {
            delta_feature.scaled_add(delta[i], &self.weight.column(state.sample[i]));
        }

        for (i, &s) in state.sample.iter().enumerate() {
            grad.weight.accumulate(s, &(h * delta[i]));
            grad.bias.accumulate(s, delta[i]);
        }

        delta_feature
    }

    /// Apply an SGD step to the sampled columns only.
    pub fn sgd(&mut self, grad: &BlackOutGrad, learning_rate: Real) {
        for (id, g) in grad.weight.iter() {
            self.weight.column_mut(id).scaled_add(-learning_rate, g);
        }
        for (id, g) in grad.bias.iter() {
            self.bias[id] -= learning_rate * g;
        }
    }

    /// The sampling table is not persisted; rebuild it with
    /// [`BlackOut::init_sampling`] after loading.
    pub fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        serial::write_mat(w, &self.weight)?;
        serial::write_vec(w, &self.bias)
    }

    pub fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        serial::read_mat(r, &mut self.weight)?;
        serial::read_vec(r, &mut self.bias)
    }
}

impl BlackOutState {
    pub fn with_seed(seed: u64, num_samples: usize) -> Self {
        Self {
            rng: XorShift::new(seed),
            sample: vec![0; num_samples + 1],
        }
    }
}

impl BlackOutGrad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.weight.clear();
        self.bias.clear();
    }

    pub fn merge(&mut self, other: &BlackOutGrad) {
        self.weight.merge(&other.weight);
        self.bias.merge(&other.bias);
    }

    pub fn squared_norm(&self) -> Real {
        self.weight.squared_norm() + self.bias.squared_norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const HID: usize = 4;
    const VOCAB: usize = 8;
    const K: usize = 3;
    const EPS: Real = 1e-6;

    fn counts() -> Vec<usize> {
        // Skewed unigram counts, eos/unk style tail included.
        vec![400, 250, 150, 90, 50, 30, 20, 10]
    }

    fn setup(seed: u64) -> (BlackOut, VecR) {
        let mut rng = XorShift::new(seed);
        let mut layer = BlackOut::new(HID, VOCAB, K, seed ^ 0xB1AC);
        layer.init(&mut rng, 0.5);
        layer.init_sampling(&counts(), 0.4);
        let mut m = MatR::zeros((HID, 1));
        rng.uniform(&mut m, 1.0);
        (layer, m.column(0).to_owned())
    }

    #[test]
    fn sampling_table_matches_distorted_unigram() {
        let (layer, _) = setup(1);
        let freq = counts();
        let sum: usize = freq.iter().sum();

        let mut q: Vec<Real> = freq.iter().map(|&f| (f as Real / sum as Real).powf(0.4)).collect();
        let qs: Real = q.iter().sum();
        q.iter_mut().for_each(|v| *v /= qs);

        for (id, &qi) in q.iter().enumerate() {
            let expect = (sum as Real * qi) as usize;
            let got = layer.sample_dist.iter().filter(|&&s| s == id).count();
            assert_eq!(got, expect, "class {id}");
            assert_relative_eq!(layer.dist_weight[id], 1.0 / qi, max_relative = 1e-12);
        }
    }

    #[test]
    fn sampling_never_draws_the_label() {
        let (mut layer, _) = setup(2);
        let mut state = layer.state();
        // Class 0 dominates the table; it still must never appear as its
        // own negative.
        for _ in 0..10_000 {
            layer.sampling(0, &mut state);
            assert_eq!(state.sample[0], 0);
            assert!(state.sample[1..].iter().all(|&s| s != 0));
        }
    }

    #[test]
    fn forked_states_sample_independently_and_reproducibly() {
        let (mut layer, _) = setup(3);
        let mut a = layer.state();
        let mut b = layer.state();

        let mut draws_a = Vec::new();
        let mut draws_b = Vec::new();
        for _ in 0..20 {
            layer.sampling(1, &mut a);
            draws_a.extend_from_slice(&a.sample[1..]);
            layer.sampling(1, &mut b);
            draws_b.extend_from_slice(&b.sample[1..]);
        }
        assert_ne!(draws_a, draws_b, "forked streams should diverge");

        // Same seed, same draws.
        let mut c = BlackOutState::with_seed(99, K);
        let mut d = BlackOutState::with_seed(99, K);
        layer.sampling(1, &mut c);
        layer.sampling(1, &mut d);
        assert_eq!(c.sample, d.sample);
    }

    #[test]
    fn negative_draw_frequencies_converge_to_the_proposal() {
        // 20 classes, 5000 draws: the empirical negative frequencies must
        // approach the replication-table proportions (with the label's
        // entries excluded by rejection).
        const CLASSES: usize = 20;
        let freq: Vec<usize> = (0..CLASSES).map(|i| 500 / (i + 1) + 5).collect();

        let mut layer = BlackOut::new(HID, CLASSES, 5, 0xFEED);
        layer.init_sampling(&freq, 0.75);
        let mut state = layer.state();

        let label = 0;
        let mut counts = vec![0usize; CLASSES];
        for _ in 0..1000 {
            layer.sampling(label, &mut state);
            for &s in &state.sample[1..] {
                counts[s] += 1;
            }
        }

        let pool = &layer.sample_dist;
        let label_entries = pool.iter().filter(|&&s| s == label).count();
        let denom = (pool.len() - label_entries) as Real;
        let total_draws = 5000.0;

        for c in 1..CLASSES {
            let expected = pool.iter().filter(|&&s| s == c).count() as Real / denom;
            let observed = counts[c] as Real / total_draws;
            assert!(
                (observed - expected).abs() < 0.02,
                "class {c}: observed {observed:.4}, expected {expected:.4}"
            );
        }
        assert_eq!(counts[label], 0);
    }

    #[test]
    fn importance_corrected_scores_converge_to_exact_softmax() {
        // Averaging the importance-corrected score mass of each drawn
        // negative over many draws recovers the exact softmax over the
        // non-label classes.
        const CLASSES: usize = 20;
        let freq: Vec<usize> = (0..CLASSES).map(|i| 300 / (i + 1) + 10).collect();

        let mut rng = XorShift::new(4);
        let mut layer = BlackOut::new(HID, CLASSES, 5, 0xACC);
        layer.init(&mut rng, 0.5);
        layer.init_sampling(&freq, 0.75);
        let mut m = MatR::zeros((HID, 1));
        rng.uniform(&mut m, 1.0);
        let h = m.column(0).to_owned();

        let label = 0;
        let mut state = layer.state();
        let mut acc = vec![0.0; CLASSES];
        for _ in 0..2000 {
            layer.sampling(label, &mut state);
            for &s in &state.sample[1..] {
                let score = layer.bias[s] + layer.weight.column(s).dot(&h);
                acc[s] += layer.dist_weight[s] * score.exp();
            }
        }

        let mut exact = VecR::zeros(CLASSES);
        layer.calc_dist(&h, &mut exact);

        let acc_sum: Real = acc.iter().skip(1).sum();
        let exact_sum: Real = exact.iter().skip(1).sum();
        for c in 1..CLASSES {
            let observed = acc[c] / acc_sum;
            let expected = exact[c] / exact_sum;
            assert!(
                (observed - expected).abs() < 0.02,
                "class {c}: observed {observed:.4}, expected {expected:.4}"
            );
        }
    }

    #[test]
    fn exact_dist_is_a_probability_distribution() {
        let (layer, h) = setup(5);
        let mut dist = VecR::zeros(VOCAB);
        layer.calc_dist(&h, &mut dist);
        assert!(dist.iter().all(|&p| p > 0.0));
        assert_relative_eq!(dist.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sampled_dist_normalizes_over_sampled_set() {
        let (mut layer, h) = setup(7);
        let mut state = layer.state();
        layer.sampling(2, &mut state);

        let mut dist = VecR::zeros(0);
        layer.calc_sampled_dist(&h, &mut dist, &state);
        assert_eq!(dist.len(), K + 1);
        assert!(dist.iter().all(|&p| p > 0.0));
        assert_relative_eq!(dist.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn importance_weights_recover_skew() {
        // With equal scores everywhere, the sampled distribution should
        // weight each sampled class by 1/q, i.e. rare classes get boosted.
        let (mut layer, _) = setup(9);
        layer.weight.fill(0.0);
        layer.bias.fill(0.0);
        let h = VecR::zeros(HID);

        let mut state = layer.state();
        layer.sampling(0, &mut state);
        state.sample = vec![0, 6, 7, 5];

        let mut dist = VecR::zeros(0);
        layer.calc_sampled_dist(&h, &mut dist, &state);

        // sample[2] = 7 is the rarest class, so it must get the largest
        // importance-corrected mass.
        let top = (0..dist.len()).max_by(|&a, &b| dist[a].partial_cmp(&dist[b]).unwrap());
        assert_eq!(top, Some(2));
    }

    #[test]
    fn sampled_gradients_match_finite_differences() {
        let (mut layer, h) = setup(11);
        let mut state = layer.state();
        layer.sampling(2, &mut state);

        let loss_of = |layer: &BlackOut, h: &VecR| {
            let mut dist = VecR::zeros(0);
            layer.calc_sampled_dist(h, &mut dist, &state);
            layer.calc_sampled_loss(&dist)
        };

        let mut dist = VecR::zeros(0);
        layer.calc_sampled_dist(&h, &mut dist, &state);
        let mut grad = BlackOutGrad::new();
        let delta_feature = layer.backward(&h, &dist, &state, &mut grad);

        // Hidden-state gradient.
        for k in 0..HID {
            let mut hp = h.clone();
            hp[k] += EPS;
            let mut hm = h.clone();
            hm[k] -= EPS;
            let numeric = (loss_of(&layer, &hp) - loss_of(&layer, &hm)) / (2.0 * EPS);
            assert_relative_eq!(numeric, delta_feature[k], max_relative = 1e-4, epsilon = 1e-8);
        }

        // Weight-column and bias gradients for every sampled class.
        let mut touched: Vec<usize> = state.sample.clone();
        touched.sort_unstable();
        touched.dedup();
        for &s in &touched {
            let wg = grad.weight.get(s).unwrap();
            for k in 0..HID {
                let mut plus = layer.clone();
                plus.weight[[k, s]] += EPS;
                let mut minus = layer.clone();
                minus.weight[[k, s]] -= EPS;
                let numeric = (loss_of(&plus, &h) - loss_of(&minus, &h)) / (2.0 * EPS);
                assert_relative_eq!(numeric, wg[k], max_relative = 1e-4, epsilon = 1e-8);
            }

            let mut plus = layer.clone();
            plus.bias[s] += EPS;
            let mut minus = layer.clone();
            minus.bias[s] -= EPS;
            let numeric = (loss_of(&plus, &h) - loss_of(&minus, &h)) / (2.0 * EPS);
            assert_relative_eq!(numeric, grad.bias.get(s).unwrap(), max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn sgd_touches_only_sampled_columns() {
        let (mut layer, h) = setup(13);
        let before = layer.weight.clone();

        let mut state = layer.state();
        layer.sampling(1, &mut state);
        let mut dist = VecR::zeros(0);
        layer.calc_sampled_dist(&h, &mut dist, &state);
        let mut grad = BlackOutGrad::new();
        layer.backward(&h, &dist, &state, &mut grad);
        layer.sgd(&grad, 0.1);

        for c in 0..VOCAB {
            let changed = (0..HID).any(|r| layer.weight[[r, c]] != before[[r, c]]);
            let sampled = state.sample.contains(&c);
            assert_eq!(changed, sampled, "column {c}");
        }
    }

    #[test]
    fn save_load_round_trip() {
        let (layer, _) = setup(17);
        let mut buf = Vec::new();
        layer.save(&mut buf).unwrap();

        let mut loaded = BlackOut::new(HID, VOCAB, K, 0);
        loaded.load(&mut buf.as_slice()).unwrap();
        assert_eq!(layer.weight, loaded.weight);
        assert_eq!(layer.bias, loaded.bias);
    }
}
