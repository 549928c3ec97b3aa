//! Token Embedding Tables
//!
//! A dense `(input_dim, vocab)` matrix with one column per token id. The
//! encoder and decoder each own one. Lookups hand out owned column
//! copies; gradients come back sparse (only the columns a minibatch
//! touched) and are applied column by column.

use std::io::{Read, Write};

use crate::rng::XorShift;
use crate::serial;
use crate::sparse::SparseVecGrad;
use crate::{MatR, Real, VecR};

#[derive(Clone, Debug)]
pub struct Embedding {
    pub table: MatR,
}

impl Embedding {
    pub fn new(input_dim: usize, vocab_size: usize) -> Self {
        Self {
            table: MatR::zeros((input_dim, vocab_size)),
        }
    }

    pub fn init(&mut self, rng: &mut XorShift, scale: Real) {
        rng.uniform(&mut self.table, scale);
    }

    pub fn input_dim(&self) -> usize {
        self.table.nrows()
    }

    pub fn vocab_size(&self) -> usize {
        self.table.ncols()
    }

    /// Owned copy of the embedding column for token `id`.
    pub fn col(&self, id: usize) -> VecR {
        self.table.column(id).to_owned()
    }

    /// Apply an SGD step to the touched columns only.
    pub fn sgd(&mut self, grad: &SparseVecGrad, learning_rate: Real) {
        for (id, g) in grad.iter() {
            self.table.column_mut(id).scaled_add(-learning_rate, g);
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        serial::write_mat(w, &self.table)
    }

    pub fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        serial::read_mat(r, &mut self.table)
    }
}
