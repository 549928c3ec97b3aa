//! Parameter Update Rules
//!
//! Pure functions over `(gradient, learning rate, optional history,
//! parameter)`. The orchestrator calls plain SGD after clipping; Adagrad
//! and momentum are provided for experiments with the same calling
//! convention.
//!
//! ```text
//! sgd:       param -= lr * grad
//! adagrad:   hist  += grad^2;           param -= lr * grad / sqrt(hist)
//! momentum:  hist   = m*hist + lr*grad; param -= hist
//! ```
//!
//! Adagrad and momentum mutate `grad`/`hist` in place rather than
//! allocating, mirroring how the accumulators are reused across minibatches.

use crate::{MatR, Real, VecR};

/// Plain SGD step on a matrix parameter.
pub fn sgd(grad: &MatR, learning_rate: Real, param: &mut MatR) {
    param.scaled_add(-learning_rate, grad);
}

/// Plain SGD step on a vector parameter.
pub fn sgd_vec(grad: &VecR, learning_rate: Real, param: &mut VecR) {
    param.scaled_add(-learning_rate, grad);
}

/// Adagrad step on a matrix parameter. `hist` accumulates squared
/// gradients across calls; `grad` is rescaled in place.
pub fn adagrad(grad: &mut MatR, learning_rate: Real, hist: &mut MatR, param: &mut MatR) {
    ndarray::Zip::from(hist.view_mut())
        .and(grad.view_mut())
        .for_each(|h, g| {
            *h += *g * *g;
            *g /= h.sqrt();
        });
    sgd(grad, learning_rate, param);
}

/// Adagrad step on a vector parameter.
pub fn adagrad_vec(grad: &mut VecR, learning_rate: Real, hist: &mut VecR, param: &mut VecR) {
    ndarray::Zip::from(hist.view_mut())
        .and(grad.view_mut())
        .for_each(|h, g| {
            *h += *g * *g;
            *g /= h.sqrt();
        });
    sgd_vec(grad, learning_rate, param);
}

/// Momentum step on a matrix parameter. `hist` carries the running
/// velocity with decay factor `m`.
pub fn momentum(grad: &MatR, learning_rate: Real, m: Real, hist: &mut MatR, param: &mut MatR) {
    *hist *= m;
    hist.scaled_add(learning_rate, grad);
    param.scaled_add(-1.0, hist);
}

/// Momentum step on a vector parameter.
pub fn momentum_vec(grad: &VecR, learning_rate: Real, m: Real, hist: &mut VecR, param: &mut VecR) {
    *hist *= m;
    hist.scaled_add(learning_rate, grad);
    param.scaled_add(-1.0, hist);
}
