//! Viola: Educational Sequence-to-Sequence Translator
//!
//! A complete encoder-decoder recurrent translator implemented from scratch
//! in Rust for educational purposes. Named after the shipwrecked heroine of
//! *Twelfth Night*, who spends the whole play translating between worlds.
//!
//! Every gradient is hand-derived: there is no autograd here. The crate
//! builds up from small numeric pieces to a full trainable translator:
//!
//! - [`rng`] - Deterministic xorshift PRNG (uniform, Gaussian, shuffle)
//! - [`activation`] - tanh / logistic / ReLU and their derivatives
//! - [`optimizer`] - SGD, Adagrad, and momentum update rules
//! - [`lstm`] / [`gru`] - Gated recurrent cells with exact backpropagation
//!   through time, behind the [`cell::RecurrentCell`] trait
//! - [`softmax`] / [`blackout`] - Exact and sampled (BlackOut) output
//!   projection layers
//! - [`encdec`] - The encoder-decoder orchestrator: teacher-forced training
//!   with gradient clipping and a rayon worker pool, greedy translation,
//!   and beam-search decoding
//!
//! # Example
//!
//! ```rust,no_run
//! use viola::{Config, EncDec, Example, Lstm, OutputKind};
//!
//! let config = Config::tiny();
//! // 10-token source and target vocabularies, eos id 9 on the target side
//! let mut model: EncDec<Lstm> = EncDec::new(&config, 10, 10, 9, OutputKind::Exact);
//! let data = vec![Example { src: vec![1, 0, 9], tgt: vec![2, 3, 9] }];
//!
//! for epoch in 0..20 {
//!     let loss = model.train_epoch(&data).unwrap();
//!     println!("epoch {epoch}: loss {loss:.4}");
//! }
//!
//! let hyp = model.beam_search(&[1, 0, 9]);
//! println!("{:?} (complete: {})", hyp.tokens, hyp.terminated);
//! ```

pub mod activation;
pub mod blackout;
pub mod cell;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod encdec;
pub mod error;
pub mod gru;
pub mod logger;
pub mod lstm;
mod math;
pub mod optimizer;
pub mod output;
pub mod rng;
pub mod serial;
pub mod softmax;
pub mod sparse;
pub mod vocab;

/// Floating-point element type used throughout the crate.
///
/// Everything numeric is written against this alias, so switching the
/// whole model to `f32` is a one-line change.
pub type Real = f64;

/// Dense matrix of [`Real`] (backed by the external linear-algebra substrate).
pub type MatR = ndarray::Array2<Real>;

/// Dense vector of [`Real`].
pub type VecR = ndarray::Array1<Real>;

// Re-export main types for convenience
pub use cell::{CellGrad, CellState, RecurrentCell};
pub use config::Config;
pub use corpus::Example;
pub use encdec::{BeamHypothesis, EncDec};
pub use error::{Error, Result};
pub use gru::Gru;
pub use logger::TrainingLogger;
pub use lstm::Lstm;
pub use output::{OutputKind, OutputLayer};
pub use rng::XorShift;
pub use vocab::Vocabulary;
