//! LSTM Cell with Exact Backpropagation Through Time
//!
//! The centerpiece of the crate: the per-timestep LSTM transform and its
//! hand-derived backward pass.
//!
//! ## Forward (one timestep, hidden size H)
//!
//! ```text
//! i = σ(Wxi·x + Whi·h_prev + bi)      input gate
//! f = σ(Wxf·x + Whf·h_prev + bf)      forget gate
//! o = σ(Wxo·x + Who·h_prev + bo)      output gate
//! u = tanh(Wxu·x + Whu·h_prev + bu)   candidate
//! c = i ⊙ u + f ⊙ c_prev
//! h = o ⊙ tanh(c)
//! ```
//!
//! ## Backward
//!
//! Given the external hidden gradient `delh` and any pre-existing `delc`:
//!
//! ```text
//! delc += tanh'(tanh c) ⊙ delh ⊙ o
//! delo  = σ'(o) ⊙ delh ⊙ tanh c
//! deli  = σ'(i) ⊙ delc ⊙ u
//! delf  = σ'(f) ⊙ delc ⊙ c_prev
//! delu  = tanh'(u) ⊙ delc ⊙ i
//! delc_prev += delc ⊙ f
//! delh_prev += Whi'·deli + Whf'·delf + Who'·delo + Whu'·delu
//! delx       = Wxi'·deli + Wxf'·delf + Wxo'·delo + Wxu'·delu
//! grad.W*   += del* ⊗ input         (accumulated, never overwritten)
//! grad.b*   += del*
//! ```
//!
//! Backward is called once per timestep in strict reverse chronological
//! order. The cell itself holds no mutable state between calls; the chain
//! of [`LstmState`] records owned by the caller is the stateful object.
//!
//! ## Context variant
//!
//! [`Lstm::with_context`] builds a cell with an auxiliary context input
//! `a` (an attention vector, say) that adds a `Wa·a` term to every gate.
//! [`Lstm::forward_with_context`] / [`Lstm::backward_with_context`]
//! additionally produce `dela` and the `Wa*` gradients.

use std::io::{Read, Write};

use crate::activation;
use crate::cell::{CellGrad, CellState, RecurrentCell};
use crate::math::add_outer;
use crate::rng::XorShift;
use crate::serial;
use crate::{MatR, Real, VecR};

/// Auxiliary context weights: one matrix per gate, applied to the extra
/// input `a`.
#[derive(Clone, Debug)]
pub struct LstmContext {
    pub wai: MatR,
    pub waf: MatR,
    pub wao: MatR,
    pub wau: MatR,
}

/// LSTM cell parameters: one `(input, hidden)` weight pair and one bias
/// per gate. Owned exclusively by the cell; mutated only through
/// [`RecurrentCell::sgd`].
#[derive(Clone, Debug)]
pub struct Lstm {
    pub wxi: MatR,
    pub whi: MatR,
    pub bi: VecR,

    pub wxf: MatR,
    pub whf: MatR,
    pub bf: VecR,

    pub wxo: MatR,
    pub who: MatR,
    pub bo: VecR,

    pub wxu: MatR,
    pub whu: MatR,
    pub bu: VecR,

    pub context: Option<LstmContext>,
}

/// Per-timestep record: gate activations and outputs from forward,
/// gradients once backward has run.
#[derive(Clone, Debug)]
pub struct LstmState {
    pub h: VecR,
    pub c: VecR,
    pub u: VecR,
    pub i: VecR,
    pub f: VecR,
    pub o: VecR,
    pub c_tanh: VecR,

    pub delh: VecR,
    pub delc: VecR,
    pub delx: VecR,
    /// Gradient w.r.t. the auxiliary context input; written only by
    /// [`Lstm::backward_with_context`].
    pub dela: VecR,
}

/// Gradient accumulator mirroring [`Lstm`]'s parameters.
#[derive(Clone, Debug)]
pub struct LstmGrad {
    pub wxi: MatR,
    pub whi: MatR,
    pub bi: VecR,

    pub wxf: MatR,
    pub whf: MatR,
    pub bf: VecR,

    pub wxo: MatR,
    pub who: MatR,
    pub bo: VecR,

    pub wxu: MatR,
    pub whu: MatR,
    pub bu: VecR,

    pub context: Option<LstmContext>,
}

impl Lstm {
    /// Cell with an auxiliary context input of dimension `context_dim`
    /// feeding every gate.
    pub fn with_context(input_dim: usize, context_dim: usize, hidden_dim: usize) -> Self {
        let mut cell = <Self as RecurrentCell>::new(input_dim, hidden_dim);
        cell.context = Some(LstmContext {
            wai: MatR::zeros((hidden_dim, context_dim)),
            waf: MatR::zeros((hidden_dim, context_dim)),
            wao: MatR::zeros((hidden_dim, context_dim)),
            wau: MatR::zeros((hidden_dim, context_dim)),
        });
        cell
    }

    /// Forward step with the auxiliary context input `at` added to every
    /// gate pre-activation. Precondition: built with
    /// [`Lstm::with_context`].
    pub fn forward_with_context(
        &self,
        xt: &VecR,
        at: &VecR,
        prev: &LstmState,
        cur: &mut LstmState,
    ) {
        let ctx = self.context.as_ref().expect("LSTM built without context weights");

        let mut i = self.wxi.dot(xt);
        i += &self.whi.dot(&prev.h);
        i += &ctx.wai.dot(at);
        i += &self.bi;
        activation::logistic(&mut i);

        let mut f = self.wxf.dot(xt);
        f += &self.whf.dot(&prev.h);
        f += &ctx.waf.dot(at);
        f += &self.bf;
        activation::logistic(&mut f);

        let mut o = self.wxo.dot(xt);
        o += &self.who.dot(&prev.h);
        o += &ctx.wao.dot(at);
        o += &self.bo;
        activation::logistic(&mut o);

        let mut u = self.wxu.dot(xt);
        u += &self.whu.dot(&prev.h);
        u += &ctx.wau.dot(at);
        u += &self.bu;
        activation::tanh(&mut u);

        cur.i = i;
        cur.f = f;
        cur.o = o;
        cur.u = u;
        self.finish_forward(prev, cur);
    }

    /// Backward step matching [`Lstm::forward_with_context`]; also fills
    /// `cur.dela` and the `Wa*` gradient blocks.
    pub fn backward_with_context(
        &self,
        prev: &mut LstmState,
        cur: &mut LstmState,
        grad: &mut LstmGrad,
        xt: &VecR,
        at: &VecR,
    ) {
        let ctx = self.context.as_ref().expect("LSTM built without context weights");
        let gctx = grad.context.as_mut().expect("gradient built without context blocks");

        let (deli, delf, delo, delu) = self.gate_deltas(prev, cur);

        cur.dela = ctx.wai.t().dot(&deli);
        cur.dela += &ctx.waf.t().dot(&delf);
        cur.dela += &ctx.wao.t().dot(&delo);
        cur.dela += &ctx.wau.t().dot(&delu);

        add_outer(&mut gctx.wai, &deli, at);
        add_outer(&mut gctx.waf, &delf, at);
        add_outer(&mut gctx.wao, &delo, at);
        add_outer(&mut gctx.wau, &delu, at);

        self.finish_backward(prev, cur, grad, xt, &deli, &delf, &delo, &delu);
    }

    /// Shared tail of every forward variant: memory cell and hidden
    /// output from the already-activated gates.
    fn finish_forward(&self, prev: &LstmState, cur: &mut LstmState) {
        let mut c = &cur.i * &cur.u;
        c += &(&cur.f * &prev.c);
        cur.c_tanh = c.clone();
        activation::tanh(&mut cur.c_tanh);
        cur.c = c;
        cur.h = &cur.o * &cur.c_tanh;
    }

    /// Shared head of every backward variant: route `delh`/`delc` through
    /// the gates. Accumulates into `cur.delc` and `prev.delc`.
    fn gate_deltas(&self, prev: &mut LstmState, cur: &mut LstmState) -> (VecR, VecR, VecR, VecR) {
        let through_o = &activation::tanh_prime(&cur.c_tanh) * &cur.delh;
        cur.delc += &(&through_o * &cur.o);
        prev.delc += &(&cur.delc * &cur.f);

        let delo = &(&activation::logistic_prime(&cur.o) * &cur.delh) * &cur.c_tanh;
        let deli = &(&activation::logistic_prime(&cur.i) * &cur.delc) * &cur.u;
        let delf = &(&activation::logistic_prime(&cur.f) * &cur.delc) * &prev.c;
        let delu = &(&activation::tanh_prime(&cur.u) * &cur.delc) * &cur.i;

        (deli, delf, delo, delu)
    }

    /// Shared tail of every backward variant: input/predecessor gradients
    /// and the dense parameter gradients.
    #[allow(clippy::too_many_arguments)]
    fn finish_backward(
        &self,
        prev: &mut LstmState,
        cur: &mut LstmState,
        grad: &mut LstmGrad,
        xt: &VecR,
        deli: &VecR,
        delf: &VecR,
        delo: &VecR,
        delu: &VecR,
    ) {
        let mut delx = self.wxi.t().dot(deli);
        delx += &self.wxf.t().dot(delf);
        delx += &self.wxo.t().dot(delo);
        delx += &self.wxu.t().dot(delu);
        cur.delx = delx;

        prev.delh += &self.whi.t().dot(deli);
        prev.delh += &self.whf.t().dot(delf);
        prev.delh += &self.who.t().dot(delo);
        prev.delh += &self.whu.t().dot(delu);

        add_outer(&mut grad.wxi, deli, xt);
        add_outer(&mut grad.whi, deli, &prev.h);
        add_outer(&mut grad.wxf, delf, xt);
        add_outer(&mut grad.whf, delf, &prev.h);
        add_outer(&mut grad.wxo, delo, xt);
        add_outer(&mut grad.who, delo, &prev.h);
        add_outer(&mut grad.wxu, delu, xt);
        add_outer(&mut grad.whu, delu, &prev.h);

        grad.bi += deli;
        grad.bf += delf;
        grad.bo += delo;
        grad.bu += delu;
    }
}

impl RecurrentCell for Lstm {
    type State = LstmState;
    type Grad = LstmGrad;

    fn new(input_dim: usize, hidden_dim: usize) -> Self {
        let w = || MatR::zeros((hidden_dim, input_dim));
        let h = || MatR::zeros((hidden_dim, hidden_dim));
        let b = || VecR::zeros(hidden_dim);
        Self {
            wxi: w(),
            whi: h(),
            bi: b(),
            wxf: w(),
            whf: h(),
            bf: b(),
            wxo: w(),
            who: h(),
            bo: b(),
            wxu: w(),
            whu: h(),
            bu: b(),
            context: None,
        }
    }

    fn init(&mut self, rng: &mut XorShift, scale: Real) {
        rng.uniform(&mut self.wxi, scale);
        rng.uniform(&mut self.whi, scale);
        rng.uniform(&mut self.wxf, scale);
        rng.uniform(&mut self.whf, scale);
        rng.uniform(&mut self.wxo, scale);
        rng.uniform(&mut self.who, scale);
        rng.uniform(&mut self.wxu, scale);
        rng.uniform(&mut self.whu, scale);

        if let Some(ctx) = self.context.as_mut() {
            rng.uniform(&mut ctx.wai, scale);
            rng.uniform(&mut ctx.waf, scale);
            rng.uniform(&mut ctx.wao, scale);
            rng.uniform(&mut ctx.wau, scale);
        }
    }

    fn forward(&self, xt: &VecR, prev: &Self::State, cur: &mut Self::State) {
        let mut i = self.wxi.dot(xt);
        i += &self.whi.dot(&prev.h);
        i += &self.bi;
        activation::logistic(&mut i);

        let mut f = self.wxf.dot(xt);
        f += &self.whf.dot(&prev.h);
        f += &self.bf;
        activation::logistic(&mut f);

        let mut o = self.wxo.dot(xt);
        o += &self.who.dot(&prev.h);
        o += &self.bo;
        activation::logistic(&mut o);

        let mut u = self.wxu.dot(xt);
        u += &self.whu.dot(&prev.h);
        u += &self.bu;
        activation::tanh(&mut u);

        cur.i = i;
        cur.f = f;
        cur.o = o;
        cur.u = u;
        self.finish_forward(prev, cur);
    }

    fn forward_first(&self, xt: &VecR, cur: &mut Self::State) {
        // No previous timestep: recurrent terms vanish and the forget
        // gate has nothing to forget.
        let mut i = self.wxi.dot(xt);
        i += &self.bi;
        activation::logistic(&mut i);

        let mut o = self.wxo.dot(xt);
        o += &self.bo;
        activation::logistic(&mut o);

        let mut u = self.wxu.dot(xt);
        u += &self.bu;
        activation::tanh(&mut u);

        cur.i = i;
        cur.o = o;
        cur.u = u;

        let c = &cur.i * &cur.u;
        cur.c_tanh = c.clone();
        activation::tanh(&mut cur.c_tanh);
        cur.c = c;
        cur.h = &cur.o * &cur.c_tanh;
    }

    fn backward(&self, prev: &mut Self::State, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR) {
        let (deli, delf, delo, delu) = self.gate_deltas(prev, cur);
        self.finish_backward(prev, cur, grad, xt, &deli, &delf, &delo, &delu);
    }

    fn backward_first(&self, cur: &mut Self::State, grad: &mut Self::Grad, xt: &VecR) {
        let through_o = &activation::tanh_prime(&cur.c_tanh) * &cur.delh;
        cur.delc += &(&through_o * &cur.o);

        let delo = &(&activation::logistic_prime(&cur.o) * &cur.delh) * &cur.c_tanh;
        let deli = &(&activation::logistic_prime(&cur.i) * &cur.delc) * &cur.u;
        let delu = &(&activation::tanh_prime(&cur.u) * &cur.delc) * &cur.i;

        let mut delx = self.wxi.t().dot(&deli);
        delx += &self.wxo.t().dot(&delo);
        delx += &self.wxu.t().dot(&delu);
        cur.delx = delx;

        add_outer(&mut grad.wxi, &deli, xt);
        add_outer(&mut grad.wxo, &delo, xt);
        add_outer(&mut grad.wxu, &delu, xt);
        grad.bi += &deli;
        grad.bo += &delo;
        grad.bu += &delu;
    }

    fn grad(&self) -> Self::Grad {
        LstmGrad {
            wxi: MatR::zeros(self.wxi.dim()),
            whi: MatR::zeros(self.whi.dim()),
            bi: VecR::zeros(self.bi.len()),
            wxf: MatR::zeros(self.wxf.dim()),
            whf: MatR::zeros(self.whf.dim()),
            bf: VecR::zeros(self.bf.len()),
            wxo: MatR::zeros(self.wxo.dim()),
            who: MatR::zeros(self.who.dim()),
            bo: VecR::zeros(self.bo.len()),
            wxu: MatR::zeros(self.wxu.dim()),
            whu: MatR::zeros(self.whu.dim()),
            bu: VecR::zeros(self.bu.len()),
            context: self.context.as_ref().map(|ctx| LstmContext {
                wai: MatR::zeros(ctx.wai.dim()),
                waf: MatR::zeros(ctx.waf.dim()),
                wao: MatR::zeros(ctx.wao.dim()),
                wau: MatR::zeros(ctx.wau.dim()),
            }),
        }
    }

    fn sgd(&mut self, grad: &Self::Grad, learning_rate: Real) {
        crate::optimizer::sgd(&grad.wxi, learning_rate, &mut self.wxi);
        crate::optimizer::sgd(&grad.whi, learning_rate, &mut self.whi);
        crate::optimizer::sgd_vec(&grad.bi, learning_rate, &mut self.bi);

        crate::optimizer::sgd(&grad.wxf, learning_rate, &mut self.wxf);
        crate::optimizer::sgd(&grad.whf, learning_rate, &mut self.whf);
        crate::optimizer::sgd_vec(&grad.bf, learning_rate, &mut self.bf);

        crate::optimizer::sgd(&grad.wxo, learning_rate, &mut self.wxo);
        crate::optimizer::sgd(&grad.who, learning_rate, &mut self.who);
        crate::optimizer::sgd_vec(&grad.bo, learning_rate, &mut self.bo);

        crate::optimizer::sgd(&grad.wxu, learning_rate, &mut self.wxu);
        crate::optimizer::sgd(&grad.whu, learning_rate, &mut self.whu);
        crate::optimizer::sgd_vec(&grad.bu, learning_rate, &mut self.bu);

        if let (Some(ctx), Some(g)) = (self.context.as_mut(), grad.context.as_ref()) {
            crate::optimizer::sgd(&g.wai, learning_rate, &mut ctx.wai);
            crate::optimizer::sgd(&g.waf, learning_rate, &mut ctx.waf);
            crate::optimizer::sgd(&g.wao, learning_rate, &mut ctx.wao);
            crate::optimizer::sgd(&g.wau, learning_rate, &mut ctx.wau);
        }
    }

    fn save<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        serial::write_mat(w, &self.wxi)?;
        serial::write_mat(w, &self.whi)?;
        serial::write_vec(w, &self.bi)?;
        serial::write_mat(w, &self.wxf)?;
        serial::write_mat(w, &self.whf)?;
        serial::write_vec(w, &self.bf)?;
        serial::write_mat(w, &self.wxo)?;
        serial::write_mat(w, &self.who)?;
        serial::write_vec(w, &self.bo)?;
        serial::write_mat(w, &self.wxu)?;
        serial::write_mat(w, &self.whu)?;
        serial::write_vec(w, &self.bu)?;
        if let Some(ctx) = &self.context {
            serial::write_mat(w, &ctx.wai)?;
            serial::write_mat(w, &ctx.waf)?;
            serial::write_mat(w, &ctx.wao)?;
            serial::write_mat(w, &ctx.wau)?;
        }
        Ok(())
    }

    fn load<R: Read>(&mut self, r: &mut R) -> std::io::Result<()> {
        serial::read_mat(r, &mut self.wxi)?;
        serial::read_mat(r, &mut self.whi)?;
        serial::read_vec(r, &mut self.bi)?;
        serial::read_mat(r, &mut self.wxf)?;
        serial::read_mat(r, &mut self.whf)?;
        serial::read_vec(r, &mut self.bf)?;
        serial::read_mat(r, &mut self.wxo)?;
        serial::read_mat(r, &mut self.who)?;
        serial::read_vec(r, &mut self.bo)?;
        serial::read_mat(r, &mut self.wxu)?;
        serial::read_mat(r, &mut self.whu)?;
        serial::read_vec(r, &mut self.bu)?;
        if let Some(ctx) = self.context.as_mut() {
            serial::read_mat(r, &mut ctx.wai)?;
            serial::read_mat(r, &mut ctx.waf)?;
            serial::read_mat(r, &mut ctx.wao)?;
            serial::read_mat(r, &mut ctx.wau)?;
        }
        Ok(())
    }
}

impl CellState for LstmState {
    fn new(hidden_dim: usize) -> Self {
        let z = || VecR::zeros(hidden_dim);
        Self {
            h: z(),
            c: z(),
            u: z(),
            i: z(),
            f: z(),
            o: z(),
            c_tanh: z(),
            delh: z(),
            delc: z(),
            delx: VecR::zeros(0),
            dela: VecR::zeros(0),
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
        self.c = other.c.clone();
    }

    fn carry_gradient_from(&mut self, other: &Self) {
        self.delh += &other.delh;
        self.delc += &other.delc;
    }
}

impl CellGrad for LstmGrad {
    fn reset(&mut self) {
        for m in [
            &mut self.wxi, &mut self.whi, &mut self.wxf, &mut self.whf,
            &mut self.wxo, &mut self.who, &mut self.wxu, &mut self.whu,
        ] {
            m.fill(0.0);
        }
        for b in [&mut self.bi, &mut self.bf, &mut self.bo, &mut self.bu] {
            b.fill(0.0);
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.wai.fill(0.0);
            ctx.waf.fill(0.0);
            ctx.wao.fill(0.0);
            ctx.wau.fill(0.0);
        }
    }

    fn merge(&mut self, other: &Self) {
        self.wxi += &other.wxi;
        self.whi += &other.whi;
        self.bi += &other.bi;
        self.wxf += &other.wxf;
        self.whf += &other.whf;
        self.bf += &other.bf;
        self.wxo += &other.wxo;
        self.who += &other.who;
        self.bo += &other.bo;
        self.wxu += &other.wxu;
        self.whu += &other.whu;
        self.bu += &other.bu;
        if let (Some(ctx), Some(o)) = (self.context.as_mut(), other.context.as_ref()) {
            ctx.wai += &o.wai;
            ctx.waf += &o.waf;
            ctx.wao += &o.wao;
            ctx.wau += &o.wau;
        }
    }

    fn squared_norm(&self) -> Real {
        let sq = |m: &MatR| m.iter().map(|v| v * v).sum::<Real>();
        let sqv = |v: &VecR| v.iter().map(|x| x * x).sum::<Real>();
        let mut norm = sq(&self.wxi) + sq(&self.whi) + sqv(&self.bi)
            + sq(&self.wxf) + sq(&self.whf) + sqv(&self.bf)
            + sq(&self.wxo) + sq(&self.who) + sqv(&self.bo)
            + sq(&self.wxu) + sq(&self.whu) + sqv(&self.bu);
        if let Some(ctx) = &self.context {
            norm += sq(&ctx.wai) + sq(&ctx.waf) + sq(&ctx.wao) + sq(&ctx.wau);
        }
        norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IN: usize = 3;
    const HID: usize = 4;
    const EPS: Real = 1e-6;

    fn random_vec(rng: &mut XorShift, len: usize) -> VecR {
        let mut m = MatR::zeros((len, 1));
        rng.uniform(&mut m, 1.0);
        m.column(0).to_owned()
    }

    fn test_cell(seed: u64) -> (Lstm, XorShift) {
        let mut rng = XorShift::new(seed);
        let mut cell = <Lstm as RecurrentCell>::new(IN, HID);
        cell.init(&mut rng, 0.5);
        (cell, rng)
    }

    /// Scalar objective: weighted sum of the new hidden state.
    fn objective(cell: &Lstm, xt: &VecR, prev: &LstmState, w: &VecR) -> Real {
        let mut cur = LstmState::new(HID);
        cell.forward(xt, prev, &mut cur);
        cur.h.dot(w)
    }

    fn analytic_grads(cell: &Lstm, xt: &VecR, prev: &LstmState, w: &VecR) -> (LstmGrad, VecR) {
        let mut grad = cell.grad();
        let mut prev = prev.clone();
        let mut cur = LstmState::new(HID);
        cell.forward(xt, &prev, &mut cur);
        cur.add_delh(w);
        cell.backward(&mut prev, &mut cur, &mut grad, xt);
        (grad, cur.delx.clone())
    }

    /// Finite-difference check over every scalar parameter of one weight
    /// matrix.
    fn check_mat<G, P>(cell: &Lstm, xt: &VecR, prev: &LstmState, w: &VecR, pick_g: G, pick_p: P)
    where
        G: Fn(&LstmGrad) -> &MatR,
        P: Fn(&mut Lstm) -> &mut MatR,
    {
        let (grad, _) = analytic_grads(cell, xt, prev, w);
        let analytic = pick_g(&grad).clone();
        let (rows, cols) = analytic.dim();

        for i in 0..rows {
            for j in 0..cols {
                let mut plus = cell.clone();
                pick_p(&mut plus)[[i, j]] += EPS;
                let mut minus = cell.clone();
                pick_p(&mut minus)[[i, j]] -= EPS;
                let numeric =
                    (objective(&plus, xt, prev, w) - objective(&minus, xt, prev, w)) / (2.0 * EPS);
                assert_relative_eq!(numeric, analytic[[i, j]], max_relative = 1e-4, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn forward_outputs_are_bounded() {
        let (cell, mut rng) = test_cell(11);
        let xt = random_vec(&mut rng, IN);
        let prev = LstmState::new(HID);
        let mut cur = LstmState::new(HID);
        cell.forward(&xt, &prev, &mut cur);

        assert!(cur.i.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(cur.f.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(cur.o.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(cur.h.iter().all(|&v| v.abs() <= 1.0));
    }

    #[test]
    fn parameter_gradients_match_finite_differences() {
        let (cell, mut rng) = test_cell(17);
        let xt = random_vec(&mut rng, IN);
        let mut prev = LstmState::new(HID);
        prev.h = random_vec(&mut rng, HID);
        prev.c = random_vec(&mut rng, HID);
        let w = random_vec(&mut rng, HID);

        check_mat(&cell, &xt, &prev, &w, |g| &g.wxi, |c| &mut c.wxi);
        check_mat(&cell, &xt, &prev, &w, |g| &g.whf, |c| &mut c.whf);
        check_mat(&cell, &xt, &prev, &w, |g| &g.wxo, |c| &mut c.wxo);
        check_mat(&cell, &xt, &prev, &w, |g| &g.whu, |c| &mut c.whu);
    }

    #[test]
    fn bias_gradients_match_finite_differences() {
        let (cell, mut rng) = test_cell(23);
        let xt = random_vec(&mut rng, IN);
        let mut prev = LstmState::new(HID);
        prev.h = random_vec(&mut rng, HID);
        prev.c = random_vec(&mut rng, HID);
        let w = random_vec(&mut rng, HID);

        let (grad, _) = analytic_grads(&cell, &xt, &prev, &w);
        for k in 0..HID {
            let mut plus = cell.clone();
            plus.bf[k] += EPS;
            let mut minus = cell.clone();
            minus.bf[k] -= EPS;
            let numeric =
                (objective(&plus, &xt, &prev, &w) - objective(&minus, &xt, &prev, &w)) / (2.0 * EPS);
            assert_relative_eq!(numeric, grad.bf[k], max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let (cell, mut rng) = test_cell(29);
        let xt = random_vec(&mut rng, IN);
        let mut prev = LstmState::new(HID);
        prev.h = random_vec(&mut rng, HID);
        prev.c = random_vec(&mut rng, HID);
        let w = random_vec(&mut rng, HID);

        let (_, delx) = analytic_grads(&cell, &xt, &prev, &w);
        for k in 0..IN {
            let mut xp = xt.clone();
            xp[k] += EPS;
            let mut xm = xt.clone();
            xm[k] -= EPS;
            let numeric =
                (objective(&cell, &xp, &prev, &w) - objective(&cell, &xm, &prev, &w)) / (2.0 * EPS);
            assert_relative_eq!(numeric, delx[k], max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn context_gradients_match_finite_differences() {
        const CTX: usize = 2;
        let mut rng = XorShift::new(31);
        let mut cell = Lstm::with_context(IN, CTX, HID);
        cell.init(&mut rng, 0.5);

        let xt = random_vec(&mut rng, IN);
        let at = random_vec(&mut rng, CTX);
        let mut prev = LstmState::new(HID);
        prev.h = random_vec(&mut rng, HID);
        prev.c = random_vec(&mut rng, HID);
        let w = random_vec(&mut rng, HID);

        let objective = |cell: &Lstm, at: &VecR| {
            let mut cur = LstmState::new(HID);
            cell.forward_with_context(&xt, at, &prev, &mut cur);
            cur.h.dot(&w)
        };

        let mut grad = cell.grad();
        let mut prev_b = prev.clone();
        let mut cur = LstmState::new(HID);
        cell.forward_with_context(&xt, &at, &prev_b, &mut cur);
        cur.add_delh(&w);
        cell.backward_with_context(&mut prev_b, &mut cur, &mut grad, &xt, &at);

        // Context weight gradients.
        let analytic = grad.context.as_ref().unwrap().wau.clone();
        for i in 0..HID {
            for j in 0..CTX {
                let mut plus = cell.clone();
                plus.context.as_mut().unwrap().wau[[i, j]] += EPS;
                let mut minus = cell.clone();
                minus.context.as_mut().unwrap().wau[[i, j]] -= EPS;
                let numeric = (objective(&plus, &at) - objective(&minus, &at)) / (2.0 * EPS);
                assert_relative_eq!(numeric, analytic[[i, j]], max_relative = 1e-4, epsilon = 1e-8);
            }
        }

        // Context input gradient.
        for k in 0..CTX {
            let mut ap = at.clone();
            ap[k] += EPS;
            let mut am = at.clone();
            am[k] -= EPS;
            let numeric = (objective(&cell, &ap) - objective(&cell, &am)) / (2.0 * EPS);
            assert_relative_eq!(numeric, cur.dela[k], max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn first_step_gradients_match_finite_differences() {
        let (cell, mut rng) = test_cell(37);
        let xt = random_vec(&mut rng, IN);
        let w = random_vec(&mut rng, HID);

        let objective = |cell: &Lstm, xt: &VecR| {
            let mut cur = LstmState::new(HID);
            cell.forward_first(xt, &mut cur);
            cur.h.dot(&w)
        };

        let mut grad = cell.grad();
        let mut cur = LstmState::new(HID);
        cell.forward_first(&xt, &mut cur);
        cur.add_delh(&w);
        cell.backward_first(&mut cur, &mut grad, &xt);

        for i in 0..HID {
            for j in 0..IN {
                let mut plus = cell.clone();
                plus.wxu[[i, j]] += EPS;
                let mut minus = cell.clone();
                minus.wxu[[i, j]] -= EPS;
                let numeric = (objective(&plus, &xt) - objective(&minus, &xt)) / (2.0 * EPS);
                assert_relative_eq!(numeric, grad.wxu[[i, j]], max_relative = 1e-4, epsilon = 1e-8);
            }
        }

        for k in 0..IN {
            let mut xp = xt.clone();
            xp[k] += EPS;
            let mut xm = xt.clone();
            xm[k] -= EPS;
            let numeric = (objective(&cell, &xp) - objective(&cell, &xm)) / (2.0 * EPS);
            assert_relative_eq!(numeric, cur.delx[k], max_relative = 1e-4, epsilon = 1e-8);
        }
    }

    #[test]
    fn backward_accumulates_into_predecessor() {
        let (cell, mut rng) = test_cell(41);
        let xt = random_vec(&mut rng, IN);
        let mut prev = LstmState::new(HID);
        prev.h = random_vec(&mut rng, HID);
        prev.c = random_vec(&mut rng, HID);
        // Pre-existing gradient on the predecessor must survive.
        prev.delh = VecR::from_elem(HID, 0.25);
        let before = prev.delh.clone();

        let mut cur = LstmState::new(HID);
        cell.forward(&xt, &prev, &mut cur);
        cur.add_delh(&random_vec(&mut rng, HID));

        let mut grad = cell.grad();
        let mut prev2 = prev.clone();
        cell.backward(&mut prev2, &mut cur, &mut grad, &xt);

        // += semantics: the original contribution is still in there.
        let diff = &prev2.delh - &before;
        assert!(diff.iter().any(|&v| v != 0.0));
        let mut prev3 = prev.clone();
        prev3.delh.fill(0.0);
        let mut cur2 = LstmState::new(HID);
        cell.forward(&xt, &prev3, &mut cur2);
        cur2.delh = cur.delh.clone();
        let mut grad2 = cell.grad();
        cell.backward(&mut prev3, &mut cur2, &mut grad2, &xt);
        for k in 0..HID {
            assert_relative_eq!(prev2.delh[k], before[k] + prev3.delh[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn save_load_round_trip() {
        let (cell, _) = test_cell(43);
        let mut buf = Vec::new();
        cell.save(&mut buf).unwrap();

        let mut loaded = <Lstm as RecurrentCell>::new(IN, HID);
        loaded.load(&mut buf.as_slice()).unwrap();
        assert_eq!(cell.wxi, loaded.wxi);
        assert_eq!(cell.whu, loaded.whu);
        assert_eq!(cell.bf, loaded.bf);
    }
}
