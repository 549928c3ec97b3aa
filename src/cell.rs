//! The Recurrent-Cell Capability
//!
//! The encoder-decoder orchestrator does not care which gated cell it is
//! driving: an LSTM and a GRU both take one input vector and the previous
//! step's state, and both produce a new state plus exact gradients on the
//! reverse pass. That shared contract lives here as a trait; the concrete
//! variant is chosen at construction and never changes afterwards.
//!
//! ## State chains
//!
//! Cells are stateless between calls. A *sequence* is represented by its
//! owner (the orchestrator) as a chain `[S0, S1, ..., Sn]` of state
//! records: index 0 is the all-zero initial state, index i+1 results from
//! stepping on token i. Forward builds the chain left to right; backward
//! consumes it right to left. Chains are allocated per call and dropped
//! with the call scope; nothing retains them across minibatches.
//!
//! ## The accumulate invariant
//!
//! A hidden state can receive gradient from several consumers: the next
//! timestep, the output projection, and (for the encoder's final state)
//! the decoder seed. Backward therefore always *adds* into predecessor
//! gradient fields, never assigns. State records start zeroed, so the
//! first contribution behaves like an assignment. Calling backward twice
//! on the same state without resetting double-accumulates; that is the
//! caller's contract to uphold.

use std::io::{Read, Write};

use crate::rng::XorShift;
use crate::{Real, VecR};

/// One timestep's record in a state chain: gate activations and outputs
/// on the forward pass, `del*` gradient fields on the backward pass.
pub trait CellState: Clone {
    /// All-zero state with hidden dimension `hidden_dim`.
    fn new(hidden_dim: usize) -> Self;

    /// Hidden output of this step.
    fn h(&self) -> &VecR;

    /// Add an external gradient contribution to this step's hidden output
    /// (e.g. from the output projection).
    fn add_delh(&mut self, grad: &VecR);

    /// Gradient w.r.t. this step's input vector. Valid after backward.
    fn delx(&self) -> &VecR;

    /// Copy the carried outputs (hidden, and memory cell if the variant
    /// has one) from another state. Used to seed the decoder's initial
    /// state from the encoder's final state.
    fn seed_from(&mut self, other: &Self);

    /// Add the carried gradients (`delh`, and `delc` if present) from a
    /// downstream state. The inverse of [`CellState::seed_from`] on the
    /// backward pass.
    fn carry_gradient_from(&mut self, other: &Self);
}

/// Zero-initialized accumulator with one entry per trainable cell tensor.
pub trait CellGrad {
    /// Reset every entry to zero for the next minibatch.
    fn reset(&mut self);

    /// `self += other`: merge a worker's private accumulator.
    fn merge(&mut self, other: &Self);

    /// Sum of squared entries, for the global gradient norm.
    fn squared_norm(&self) -> Real;
}

/// A gated recurrent cell: per-timestep forward transform and its exact
/// reverse-mode backward pass.
pub trait RecurrentCell: Sized + Send + Sync {
    type State: CellState + Send;
    type Grad: CellGrad + Send;

    fn new(input_dim: usize, hidden_dim: usize) -> Self;

    /// Fill the weight matrices with uniform noise in `[-scale, scale]`.
    /// Biases stay zero.
    fn init(&mut self, rng: &mut XorShift, scale: Real);

    /// One forward step: `(xt, prev) -> cur`.
    fn forward(&self, xt: &VecR, prev: &Self::State, cur: &mut Self::State);

    /// Forward step with no previous timestep (sequence seed): the
    /// recurrent `Wh·h_prev` terms are omitted entirely.
    fn forward_first(&self, xt: &VecR, cur: &mut Self::State);

    /// One backward step, called in strict reverse chronological order.
    /// Consumes `cur`'s `delh`/`delc`, accumulates parameter gradients
    /// into `grad`, adds carried gradients into `prev`, and writes
    /// `cur.delx`.
    fn backward(&self, prev: &mut Self::State, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR);

    /// Backward counterpart of [`RecurrentCell::forward_first`].
    fn backward_first(&self, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR);

    /// Zero gradient accumulator shaped like this cell.
    fn grad(&self) -> Self::Grad;

    /// Apply an SGD step with the given (already clipped and scaled)
    /// learning rate.
    fn sgd(&mut self, grad: &Self::Grad, learning_rate: Real);

    /// Append all parameters to a flat dump (fixed order, no header).
    fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()>;

    /// Read parameters back in the same fixed order. Shapes must already
    /// match; there is nothing in the stream to check against.
    fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()>;
}
