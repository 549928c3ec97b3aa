//! Activation Functions
//!
//! Elementwise nonlinearities and their derivatives for backpropagation.
//!
//! Forward functions mutate in place, since every call site applies them to
//! a freshly computed pre-activation. Derivative helpers take the
//! *activated* value, not the pre-activation, because that is what the
//! state chain caches:
//!
//! ```text
//! tanh'(x)     = 1 - tanh(x)^2      given y = tanh(x):     1 - y^2
//! logistic'(x) = p(1 - p)           given p = logistic(x): p(1 - p)
//! relu'(x)     = [x > 0]            given y = relu(x):     [y > 0]
//! ```

use crate::{Real, VecR};

/// `tanh`, in place.
pub fn tanh(x: &mut VecR) {
    x.mapv_inplace(Real::tanh);
}

/// Derivative of `tanh` expressed in terms of the activated value.
pub fn tanh_prime(y: &VecR) -> VecR {
    y.mapv(|v| 1.0 - v * v)
}

/// Logistic sigmoid for a single value.
pub fn logistic_scalar(x: Real) -> Real {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic sigmoid, in place.
pub fn logistic(x: &mut VecR) {
    x.mapv_inplace(logistic_scalar);
}

/// Derivative of the logistic sigmoid expressed in terms of the activated
/// value.
pub fn logistic_prime(y: &VecR) -> VecR {
    y.mapv(|v| v * (1.0 - v))
}

/// Rectified linear unit, in place.
pub fn relu(x: &mut VecR) {
    x.mapv_inplace(|v| if v > 0.0 { v } else { 0.0 });
}

/// Derivative of ReLU expressed in terms of the activated value.
pub fn relu_prime(y: &VecR) -> VecR {
    y.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}
