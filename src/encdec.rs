//! Encoder-Decoder Orchestrator
//!
//! Ties the pieces together into a sequence-to-sequence translator: a
//! source embedding feeding an encoder cell, whose final state seeds a
//! decoder cell over target embeddings, scored by an output layer.
//!
//! ## Training
//!
//! One example runs teacher-forced: the decoder always consumes the true
//! previous target token, never its own prediction. The per-step output
//! loss contributes a hidden-state gradient to each decoder state, and
//! backpropagation walks the decoder chain in reverse, carries the
//! gradient of the decoder's seed state into the encoder's final state,
//! then walks the encoder chain in reverse. Embedding gradients stay
//! sparse throughout.
//!
//! Minibatches fan out over worker threads. Each worker owns a private
//! gradient accumulator and a private sampling stream (seeded up front
//! from the master generator so runs are reproducible for a fixed seed
//! and worker count); accumulators merge after the parallel region, the
//! global gradient norm is clipped, and one SGD step applies the merged
//! gradient scaled by the minibatch size. A non-finite gradient norm
//! aborts the epoch with [`Error::NonFiniteGradient`]; the parameters are
//! already poisoned at that point, so there is nothing sensible to
//! continue with.
//!
//! ## Decoding
//!
//! [`EncDec::translate`] decodes greedily. [`EncDec::beam_search`] keeps
//! `beam_width` candidates scored by summed log-probability, expanding a
//! `beam x vocab` score matrix per step and extracting picks by repeated
//! global argmax. Terminated candidates occupy a single frozen slot at
//! the `eos` column so they compete with live expansions on equal terms.
//! Decoding halts when the best candidate has terminated or the length
//! cap is reached.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rayon::prelude::*;

use crate::cell::{CellGrad, CellState, RecurrentCell};
use crate::config::Config;
use crate::corpus::Example;
use crate::embedding::Embedding;
use crate::error::Error;
use crate::lstm::Lstm;
use crate::math;
use crate::output::{OutputGrad, OutputKind, OutputLayer, OutputState};
use crate::rng::XorShift;
use crate::sparse::SparseVecGrad;
use crate::{MatR, Real, Result, VecR};

/// The full translator. Generic over the recurrent cell; defaults to
/// LSTM.
pub struct EncDec<C: RecurrentCell = Lstm> {
    pub config: Config,
    enc: C,
    dec: C,
    source_embed: Embedding,
    target_embed: Embedding,
    output: OutputLayer,
    tgt_eos: usize,
    rng: XorShift,
}

/// One gradient accumulator per trainable component.
pub struct EncDecGrad<C: RecurrentCell> {
    pub enc: C::Grad,
    pub dec: C::Grad,
    pub output: OutputGrad,
    pub source_embed: SparseVecGrad,
    pub target_embed: SparseVecGrad,
}

/// Best decoding found by [`EncDec::beam_search`].
#[derive(Clone, Debug, PartialEq)]
pub struct BeamHypothesis {
    /// Target ids, without the terminating `eos`.
    pub tokens: Vec<usize>,
    /// Summed log-probability of the emitted tokens (`eos` included when
    /// terminated).
    pub score: Real,
    /// Whether the hypothesis emitted `eos` before the length cap.
    pub terminated: bool,
}

/// Internal beam candidate: the state that produced the last token, plus
/// the emitted prefix.
struct Candidate<S> {
    state: S,
    tokens: Vec<usize>,
    score: Real,
    terminated: bool,
}

impl<S: Clone> Clone for Candidate<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            tokens: self.tokens.clone(),
            score: self.score,
            terminated: self.terminated,
        }
    }
}

/// Clip the learning rate so the applied update has global norm at most
/// `clip` times the base rate.
fn clipped_learning_rate(norm: Real, learning_rate: Real, clip: Real) -> Real {
    if norm > clip {
        clip * learning_rate / norm
    } else {
        learning_rate
    }
}

impl<C: RecurrentCell> EncDec<C> {
    /// Build and randomly initialize a translator. `tgt_eos` is the
    /// target-side end-of-sequence id the decoder emits to stop.
    pub fn new(
        config: &Config,
        src_vocab_size: usize,
        tgt_vocab_size: usize,
        tgt_eos: usize,
        kind: OutputKind,
    ) -> Self {
        let mut rng = XorShift::new(config.seed);

        let mut enc = C::new(config.input_dim, config.hidden_dim);
        enc.init(&mut rng, config.init_scale);
        let mut dec = C::new(config.input_dim, config.hidden_dim);
        dec.init(&mut rng, config.init_scale);

        let mut source_embed = Embedding::new(config.input_dim, src_vocab_size);
        source_embed.init(&mut rng, config.init_scale);
        let mut target_embed = Embedding::new(config.input_dim, tgt_vocab_size);
        target_embed.init(&mut rng, config.init_scale);

        let mut output = OutputLayer::new(kind, config.hidden_dim, tgt_vocab_size, rng.next_u64());
        output.init(&mut rng, config.init_scale);

        Self {
            config: config.clone(),
            enc,
            dec,
            source_embed,
            target_embed,
            output,
            tgt_eos,
            rng,
        }
    }

    /// Build the BlackOut sampling table from target-side token counts.
    /// No-op with the exact softmax.
    pub fn init_sampling(&mut self, target_counts: &[usize]) {
        self.output.init_sampling(target_counts, self.config.blackout_alpha);
    }

    /// Run the encoder over a source sequence. Returns the state chain
    /// `[S0, S1, ..., Sn]` with `S0` all-zero.
    pub fn encode(&self, src: &[usize]) -> Vec<C::State> {
        let mut chain: Vec<C::State> = (0..=src.len())
            .map(|_| C::State::new(self.config.hidden_dim))
            .collect();

        for (i, &id) in src.iter().enumerate() {
            let xt = self.source_embed.col(id);
            let (head, tail) = chain.split_at_mut(i + 1);
            self.enc.forward(&xt, &head[i], &mut tail[0]);
        }
        chain
    }

    /// Teacher-forced forward and backward pass over one example.
    /// Accumulates into `grad` and returns the mean per-token loss; the
    /// gradients themselves are unscaled sums.
    pub fn train_example(
        &self,
        example: &Example,
        grad: &mut EncDecGrad<C>,
        out_state: &mut OutputState,
    ) -> Real {
        let src = &example.src;
        let tgt = &example.tgt;

        let mut enc_chain = self.encode(src);

        // Decoder chain: state 0 is seeded from the encoder's final state,
        // state i for i > 0 results from stepping on tgt[i-1].
        let mut dec_chain: Vec<C::State> = (0..tgt.len())
            .map(|_| C::State::new(self.config.hidden_dim))
            .collect();
        dec_chain[0].seed_from(enc_chain.last().unwrap());

        let mut loss = 0.0;
        for i in 0..tgt.len() {
            if i > 0 {
                let xt = self.target_embed.col(tgt[i - 1]);
                let (head, tail) = dec_chain.split_at_mut(i);
                self.dec.forward(&xt, &head[i - 1], &mut tail[0]);
            }
            let (step_loss, delh) =
                self.output
                    .train_step(dec_chain[i].h(), tgt[i], out_state, &mut grad.output);
            loss += step_loss;
            dec_chain[i].add_delh(&delh);
        }

        // Decoder backward, newest step first.
        for i in (1..tgt.len()).rev() {
            let xt = self.target_embed.col(tgt[i - 1]);
            let (head, tail) = dec_chain.split_at_mut(i);
            self.dec.backward(&mut head[i - 1], &mut tail[0], &mut grad.dec, &xt);
            grad.target_embed.accumulate(tgt[i - 1], tail[0].delx());
        }

        // The decoder seed is the encoder's final state.
        enc_chain
            .last_mut()
            .unwrap()
            .carry_gradient_from(&dec_chain[0]);

        for i in (1..=src.len()).rev() {
            let xt = self.source_embed.col(src[i - 1]);
            let (head, tail) = enc_chain.split_at_mut(i);
            self.enc.backward(&mut head[i - 1], &mut tail[0], &mut grad.enc, &xt);
            grad.source_embed.accumulate(src[i - 1], tail[0].delx());
        }

        loss / tgt.len() as Real
    }

    /// Zero gradient accumulator shaped like this model.
    pub fn grad(&self) -> EncDecGrad<C> {
        EncDecGrad {
            enc: self.enc.grad(),
            dec: self.dec.grad(),
            output: self.output.grad(),
            source_embed: SparseVecGrad::new(),
            target_embed: SparseVecGrad::new(),
        }
    }

    /// One epoch: shuffle, split into minibatches, train each across the
    /// worker pool. Returns the mean per-token loss over the corpus.
    pub fn train_epoch(&mut self, corpus: &[Example]) -> Result<Real> {
        if corpus.is_empty() {
            return Ok(0.0);
        }
        let mut indices: Vec<usize> = (0..corpus.len()).collect();
        self.rng.shuffle(&mut indices);

        let mut total_loss = 0.0;
        for chunk in indices.chunks(self.config.minibatch_size.max(1)) {
            total_loss += self.train_minibatch(corpus, chunk)?;
        }
        Ok(total_loss / corpus.len() as Real)
    }

    fn train_minibatch(&mut self, corpus: &[Example], chunk: &[usize]) -> Result<Real> {
        let num_workers = self.config.num_workers.clamp(1, chunk.len());
        // Worker streams are drawn from the master generator before the
        // parallel region, so the draw order does not depend on thread
        // scheduling.
        let seeds: Vec<u64> = (0..num_workers).map(|_| self.rng.next_u64()).collect();
        let shard_len = chunk.len().div_ceil(num_workers);
        let shards: Vec<&[usize]> = chunk.chunks(shard_len).collect();

        let results: Vec<(EncDecGrad<C>, Real)> = seeds
            .into_par_iter()
            .zip(shards)
            .map(|(seed, shard)| {
                let mut grad = self.grad();
                let mut out_state = self.output.state_with_seed(seed);
                let mut loss = 0.0;
                for &idx in shard {
                    loss += self.train_example(&corpus[idx], &mut grad, &mut out_state);
                }
                (grad, loss)
            })
            .collect();

        let mut results = results.into_iter();
        let (mut grad, mut loss) = results.next().expect("at least one worker shard");
        for (g, l) in results {
            grad.merge(&g);
            loss += l;
        }

        let norm = grad.squared_norm().sqrt();
        if !norm.is_finite() {
            return Err(Error::NonFiniteGradient { norm });
        }

        let lr = clipped_learning_rate(norm, self.config.learning_rate, self.config.clip_threshold)
            / chunk.len() as Real;

        self.enc.sgd(&grad.enc, lr);
        self.dec.sgd(&grad.dec, lr);
        self.output.sgd(&grad.output, lr);
        self.source_embed.sgd(&grad.source_embed, lr);
        self.target_embed.sgd(&grad.target_embed, lr);

        Ok(loss)
    }

    /// Greedy decode. Returns target ids without the terminating `eos`.
    pub fn translate(&self, src: &[usize]) -> Vec<usize> {
        let enc_chain = self.encode(src);

        let mut state = C::State::new(self.config.hidden_dim);
        state.seed_from(enc_chain.last().unwrap());

        let mut dist = VecR::zeros(self.output.vocab_size());
        let mut tgt = Vec::new();

        for i in 0..self.config.max_decode_len {
            if i > 0 {
                let xt = self.target_embed.col(*tgt.last().unwrap());
                let mut next = C::State::new(self.config.hidden_dim);
                self.dec.forward(&xt, &state, &mut next);
                state = next;
            }
            self.output.calc_dist(state.h(), &mut dist);
            let best = math::argmax(&dist);
            if best == self.tgt_eos {
                break;
            }
            tgt.push(best);
        }
        tgt
    }

    /// Beam-search decode. Returns the best hypothesis; `terminated`
    /// reports whether it emitted `eos` within the length cap.
    pub fn beam_search(&self, src: &[usize]) -> BeamHypothesis {
        let beam = self.config.beam_width.max(1);
        let vocab = self.output.vocab_size();
        let enc_chain = self.encode(src);

        let mut seed = C::State::new(self.config.hidden_dim);
        seed.seed_from(enc_chain.last().unwrap());

        // The first expansion starts from `beam` copies of the same seed;
        // whole-column masking below keeps their picks distinct.
        let first = Candidate {
            state: seed,
            tokens: Vec::new(),
            score: 0.0,
            terminated: false,
        };
        let mut pool: Vec<Candidate<C::State>> = vec![first; beam];
        let mut first_expansion = true;

        for _ in 0..self.config.max_decode_len {
            if pool[0].terminated {
                break;
            }

            let mut scores = MatR::from_elem((pool.len(), vocab), Real::NEG_INFINITY);
            let mut next_states: Vec<Option<C::State>> = Vec::with_capacity(pool.len());

            for (r, cand) in pool.iter().enumerate() {
                if cand.terminated {
                    // Frozen: one slot at the eos column, score unchanged.
                    scores[[r, self.tgt_eos]] = cand.score;
                    next_states.push(None);
                    continue;
                }

                let state = if cand.tokens.is_empty() {
                    cand.state.clone()
                } else {
                    let xt = self.target_embed.col(*cand.tokens.last().unwrap());
                    let mut next = C::State::new(self.config.hidden_dim);
                    self.dec.forward(&xt, &cand.state, &mut next);
                    next
                };

                let mut dist = VecR::zeros(vocab);
                self.output.calc_dist(state.h(), &mut dist);
                for c in 0..vocab {
                    scores[[r, c]] = cand.score + dist[c].ln();
                }
                next_states.push(Some(state));
            }

            let mut next_pool: Vec<Candidate<C::State>> = Vec::with_capacity(beam);
            for _ in 0..beam {
                let Some((r, c)) = argmax_cell(&scores) else {
                    break;
                };
                let picked = &pool[r];

                if picked.terminated {
                    next_pool.push(picked.clone());
                    // A frozen candidate can be carried forward only once.
                    scores.row_mut(r).fill(Real::NEG_INFINITY);
                    continue;
                }

                let mut cand = Candidate {
                    state: next_states[r].as_ref().unwrap().clone(),
                    tokens: picked.tokens.clone(),
                    score: scores[[r, c]],
                    terminated: c == self.tgt_eos,
                };
                if !cand.terminated {
                    cand.tokens.push(c);
                }
                next_pool.push(cand);

                scores[[r, c]] = Real::NEG_INFINITY;
                if first_expansion {
                    // Duplicate seed rows: a class may only be picked once
                    // across the whole pool.
                    scores.column_mut(c).fill(Real::NEG_INFINITY);
                }
            }

            if next_pool.is_empty() {
                break;
            }
            pool = next_pool;
            first_expansion = false;
        }

        let best = &pool[0];
        BeamHypothesis {
            tokens: best.tokens.clone(),
            score: best.score,
            terminated: best.terminated,
        }
    }

    /// Dump all parameters to a flat headerless file. Fixed order:
    /// encoder, decoder, output layer, source embedding, target
    /// embedding.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.enc.save(&mut w)?;
        self.dec.save(&mut w)?;
        self.output.save(&mut w)?;
        self.source_embed.save(&mut w)?;
        self.target_embed.save(&mut w)?;
        Ok(())
    }

    /// Read parameters back in the same fixed order. The model must have
    /// been constructed with the same shapes; the file carries none.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut r = BufReader::new(File::open(path)?);
        self.enc.load(&mut r)?;
        self.dec.load(&mut r)?;
        self.output.load(&mut r)?;
        self.source_embed.load(&mut r)?;
        self.target_embed.load(&mut r)?;
        Ok(())
    }
}

impl<C: RecurrentCell> EncDecGrad<C> {
    pub fn reset(&mut self) {
        self.enc.reset();
        self.dec.reset();
        self.output.reset();
        self.source_embed.clear();
        self.target_embed.clear();
    }

    pub fn merge(&mut self, other: &EncDecGrad<C>) {
        self.enc.merge(&other.enc);
        self.dec.merge(&other.dec);
        self.output.merge(&other.output);
        self.source_embed.merge(&other.source_embed);
        self.target_embed.merge(&other.target_embed);
    }

    /// Sum of squared entries across every component, dense and sparse.
    pub fn squared_norm(&self) -> Real {
        self.enc.squared_norm()
            + self.dec.squared_norm()
            + self.output.squared_norm()
            + self.source_embed.squared_norm()
            + self.target_embed.squared_norm()
    }
}

/// Row-major global argmax over finite entries; first occurrence wins
/// ties. `None` when everything is masked.
fn argmax_cell(scores: &MatR) -> Option<(usize, usize)> {
    let mut best = None;
    let mut best_val = Real::NEG_INFINITY;
    for (r, row) in scores.rows().into_iter().enumerate() {
        for (c, &val) in row.iter().enumerate() {
            if val > best_val {
                best = Some((r, c));
                best_val = val;
            }
        }
    }
    best
}
