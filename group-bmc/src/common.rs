pub use log::{debug, info, warn};

pub use matrix_param::dirichlet::*;
pub use matrix_param::traits::*;
pub use matrix_util::traits::*;

pub use rayon::prelude::*;

pub type Mat = nalgebra::DMatrix<f64>;
pub type DVec = nalgebra::DVector<f64>;

/// Guards `log(0)` for exactly-zero probabilities
pub const LOG_EPS: f64 = f64::EPSILON;

/// `x * y` with the `0 * ±inf = 0` convention of `r log r` terms
#[inline]
pub fn weighted(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y
    }
}

/// Logistic sigmoid, stable for large `|x|`
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
