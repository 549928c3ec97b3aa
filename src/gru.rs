//! GRU Cell
//!
//! The gated recurrent unit: the lighter sibling of the LSTM, with two
//! gates, no separate memory cell, and interpolation instead of a forget
//! gate.
//!
//! ## Forward
//!
//! ```text
//! r  = σ(Wxr·x + Whr·h_prev + br)       reset gate
//! z  = σ(Wxz·x + Whz·h_prev + bz)       update gate
//! rh = r ⊙ h_prev
//! u  = tanh(Wxu·x + Whu·rh + bu)        candidate
//! h  = z ⊙ u + (1 - z) ⊙ h_prev
//! ```
//!
//! ## Backward
//!
//! ```text
//! delz  = σ'(z) ⊙ delh ⊙ (u - h_prev)
//! delu  = tanh'(u) ⊙ delh ⊙ z
//! delrh = Whu'·delu
//! delr  = σ'(r) ⊙ delrh ⊙ h_prev
//! delh_prev += Whr'·delr + Whz'·delz + delrh ⊙ r + delh ⊙ (1 - z)
//! delx  = Wxr'·delr + Wxz'·delz + Wxu'·delu
//! grad.Whu += delu ⊗ rh; other weights += del* ⊗ input
//! ```
//!
//! The derivation caches the activated gate values, so the derivative
//! helpers in [`crate::activation`] apply directly. Unlike the LSTM there
//! is no carried memory-cell gradient; the hidden gradient alone flows
//! back through the interpolation.

use std::io::{Read, Write};

use crate::activation;
use crate::cell::{CellGrad, CellState, RecurrentCell};
use crate::math::add_outer;
use crate::rng::XorShift;
use crate::serial;
use crate::{MatR, Real, VecR};

#[derive(Clone, Debug)]
pub struct Gru {
    pub wxr: MatR,
    pub whr: MatR,
    pub br: VecR,

    pub wxz: MatR,
    pub whz: MatR,
    pub bz: VecR,

    pub wxu: MatR,
    pub whu: MatR,
    pub bu: VecR,
}

/// Per-timestep GRU record. `rh` caches `r ⊙ h_prev`, the effective
/// recurrent input to the candidate.
#[derive(Clone, Debug)]
pub struct GruState {
    pub h: VecR,
    pub r: VecR,
    pub z: VecR,
    pub u: VecR,
    pub rh: VecR,

    pub delh: VecR,
    pub delx: VecR,
}

#[derive(Clone, Debug)]
pub struct GruGrad {
    pub wxr: MatR,
    pub whr: MatR,
    pub br: VecR,

    pub wxz: MatR,
    pub whz: MatR,
    pub bz: VecR,

    pub wxu: MatR,
    pub whu: MatR,
    pub bu: VecR,
}

impl RecurrentCell for Gru {
    type State = GruState;
    type Grad = GruGrad;

    fn new(input_dim: usize, hidden_dim: usize) -> Self {
        let w = || MatR::zeros((hidden_dim, input_dim));
        let h = || MatR::zeros((hidden_dim, hidden_dim));
        let b = || VecR::zeros(hidden_dim);
        Self {
            wxr: w(),
            whr: h(),
            br: b(),
            wxz: w(),
            whz: h(),
            bz: b(),
            wxu: w(),
            whu: h(),
            bu: b(),
        }
    }

    fn init(&mut self, rng: &mut XorShift, scale: Real) {
        rng.uniform(&mut self.wxr, scale);
        rng.uniform(&mut self.whr, scale);
        rng.uniform(&mut self.wxz, scale);
        rng.uniform(&mut self.whz, scale);
        rng.uniform(&mut self.wxu, scale);
        rng.uniform(&mut self.whu, scale);
    }

    fn forward(&self, xt: &VecR, prev: &Self::State, cur: &mut Self::State) {
        let mut r = self.wxr.dot(xt);
        r += &self.whr.dot(&prev.h);
        r += &self.br;
        activation::logistic(&mut r);

        let mut z = self.wxz.dot(xt);
        z += &self.whz.dot(&prev.h);
        z += &self.bz;
        activation::logistic(&mut z);

        let rh = &r * &prev.h;

        let mut u = self.wxu.dot(xt);
        u += &self.whu.dot(&rh);
        u += &self.bu;
        activation::tanh(&mut u);

        let mut h = &z * &u;
        h += &(&(1.0 - &z) * &prev.h);

        cur.r = r;
        cur.z = z;
        cur.rh = rh;
        cur.u = u;
        cur.h = h;
    }

    fn forward_first(&self, xt: &VecR, cur: &mut Self::State) {
        // No previous hidden state: the reset gate has nothing to reset
        // and the interpolation collapses to z ⊙ u.
        let mut z = self.wxz.dot(xt);
        z += &self.bz;
        activation::logistic(&mut z);

        let mut u = self.wxu.dot(xt);
        u += &self.bu;
        activation::tanh(&mut u);

        cur.h = &z * &u;
        cur.z = z;
        cur.u = u;
    }

    fn backward(&self, prev: &mut Self::State, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR) {
        let delz = &(&activation::logistic_prime(&cur.z) * &cur.delh) * &(&cur.u - &prev.h);
        let delu = &(&activation::tanh_prime(&cur.u) * &cur.delh) * &cur.z;
        let delrh = self.whu.t().dot(&delu);
        let delr = &(&activation::logistic_prime(&cur.r) * &delrh) * &prev.h;

        prev.delh += &self.whr.t().dot(&delr);
        prev.delh += &self.whz.t().dot(&delz);
        prev.delh += &(&delrh * &cur.r);
        prev.delh += &(&cur.delh * &(1.0 - &cur.z));

        let mut delx = self.wxr.t().dot(&delr);
        delx += &self.wxz.t().dot(&delz);
        delx += &self.wxu.t().dot(&delu);
        cur.delx = delx;

        add_outer(&mut grad.wxr, &delr, xt);
        add_outer(&mut grad.whr, &delr, &prev.h);
        add_outer(&mut grad.wxz, &delz, xt);
        add_outer(&mut grad.whz, &delz, &prev.h);
        add_outer(&mut grad.wxu, &delu, xt);
        add_outer(&mut grad.whu, &delu, &cur.rh);

        grad.br += &delr;
        grad.bz += &delz;
        grad.bu += &delu;
    }

    fn backward_first(&self, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR) {
        let delz = &(&activation::logistic_prime(&cur.z) * &cur.delh) * &cur.u;
        let delu = &(&activation::tanh_prime(&cur.u) * &cur.delh) * &cur.z;

        let mut delx = self.wxz.t().dot(&delz);
        delx += &self.wxu.t().dot(&delu);
        cur.delx = delx;

        add_outer(&mut grad.wxz, &delz, xt);
        add_outer(&mut grad.wxu, &delu, xt);
        grad.bz += &delz;
        grad.bu += &delu;
    }

    fn grad(&self) -> Self::Grad {
        GruGrad {
            wxr: MatR::zeros(self.wxr.dim()),
            whr: MatR::zeros(self.whr.dim()),
            br: VecR::zeros(self.br.len()),
            wxz: MatR::zeros(self.wxz.dim()),
            whz: MatR::zeros(self.whz.dim()),
            bz: VecR::zeros(self.bz.len()),
            wxu: MatR::zeros(self.wxu.dim()),
            whu: MatR::zeros(self.whu.dim()),
            bu: VecR::zeros(self.bu.len()),
        }
    }

    fn sgd(&mut self, grad: &Self::Grad, learning_rate: Real) {
        crate::optimizer::sgd(&grad.wxr, learning_rate, &mut self.wxr);
        crate::optimizer::sgd(&grad.whr, learning_rate, &mut self.whr);
        crate::optimizer::sgd_vec(&grad.br, learning_rate, &mut self.br);

        crate::optimizer::sgd(&grad.wxz, learning_rate, &mut self.wxz);
        crate::optimizer::sgd(&grad.whz, learning_rate, &mut self.whz);
        crate::optimizer::sgd_vec(&grad.bz, learning_rate, &mut self.bz);

        crate::optimizer::sgd(&grad.wxu, learning_rate, &mut self.wxu);
        crate::optimizer::sgd(&grad.whu, learning_rate, &mut self.whu);
        crate::optimizer::sgd_vec(&grad.bu, learning_rate, &mut self.bu);
    }

    fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        serial::write_mat(w, &self.wxr)?;
        serial::write_mat(w, &self.whr)?;
        serial::write_vec(w, &self.br)?;
        serial::write_mat(w, &self.wxz)?;
        serial::write_mat(w, &self.whz)?;
        serial::write_vec(w, &self.bz)?;
        serial::write_mat(w, &self.wxu)?;
        serial::write_mat(w, &self.whu)?;
        serial::write_vec(w, &self.bu)?;
        Ok(())
    }

    fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        serial::read_mat(r, &mut self.wxr)?;
        serial::read_mat(r, &mut self.whr)?;
        serial::read_vec(r, &mut self.br)?;
        serial::read_mat(r, &mut self.wxz)?;
        serial::read_mat(r, &mut self.whz)?;
        serial::read_vec(r, &mut self.bz)?;
        serial::read_mat(r, &mut self.wxu)?;
        serial::read_mat(r, &mut self.whu)?;
        serial::read_vec(r, &mut self.bu)?;
        Ok(())
    }
}

impl CellState for GruState {
    fn new(hidden_dim: usize) -> Self {
        let z = || VecR::zeros(hidden_dim);
        Self {
            h: z(),
            r: z(),
            z: z(),
            u: z(),
            rh: z(),
            delh: z(),
            delx: VecR::zeros(0),
        }
    }

    fn h(&self) -> &VecR {
        &self.h
    }

    fn add_delh(&mut self, grad: &VecR) {
        self.delh += grad;
    }

    fn delx(&self) -> &VecR {
        &self.delx
    }

    fn seed_from(&mut self, other: &Self) {
        self.h = other.h.clone();
    }

    fn carry_gradient_from(&mut self, other: &Self) {
        self.delh += &other.delh;
    }
}

impl CellGrad for GruGrad {
    fn reset(&mut self) {
        for m in [
            &mut self.wxr, &mut self.whr, &mut self.wxz,
            &mut self.whz, &mut self.wxu, &mut self.whu,
        ] {
            m.fill(0.0);
        }
        for b in [&mut self.br, &mut self.bz, &mut self.bu] {
            b.fill(0.0);
        }
    }

    fn merge(&mut self, other: &Self) {
        self.wxr += &other.wxr;
        self.whr += &other.whr;
        self.br += &other.br;
        self.wxz += &other.wxz;
        self.whz += &other.whz;
        self.bz += &other.bz;
        self.wxu += &other.wxu;
        self.whu += &other.whu;
        self.bu += &other.bu;
    }

    fn squared_norm(&self) -> Real {
        let sq = |m: &MatR| m.iter().map(|v| v * v).sum::<Real>();
        let sqv = |v: &VecR| v.iter().map(|x| x * x).sum::<Real>();
        sq(&self.wxr) + sq(&self.whr) + sqv(&self.br)
            + sq(&self.wxz) + sq(&self.whz) + sqv(&self.bz)
            + sq(&self.wxu) + sq(&self.whu) + sqv(&self.bu)
    }
}
