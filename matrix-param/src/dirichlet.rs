//! Dirichlet density over a probability simplex.
//!
//! ```text
//! p(f | a) = Γ(Σ a) / Π Γ(a[k]) · Π f[k]^(a[k] - 1)
//! ```
//!
//! The free functions are closed-form moments and the special-function
//! quantities needed by variational Free Energy calculations.

use crate::traits::*;
use nalgebra::{DMatrix, DVector};
use special::Gamma as SpecialGamma;

/// Mean and covariance of `Dirichlet(a)`
///
/// ```text
/// E[k]   = a[k] / a0
/// V[k,k] = a[k](a0 - a[k]) / (a0² (a0 + 1))
/// V[j,k] = -a[j] a[k] / (a0² (a0 + 1))
/// ```
pub fn dirichlet_moments(a: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let kk = a.len();
    let a0 = a.sum();
    if kk == 0 || a0 <= 0.0 {
        return (DVector::zeros(kk), DMatrix::zeros(kk, kk));
    }

    let mean = a / a0;
    let denom = a0 * a0 * (a0 + 1.0);
    let cov = DMatrix::from_fn(kk, kk, |j, k| {
        if j == k {
            a[k] * (a0 - a[k]) / denom
        } else {
            -a[j] * a[k] / denom
        }
    });
    (mean, cov)
}

/// `E[log f[k]] = ψ(a[k]) - ψ(Σ a)`
pub fn dirichlet_expected_log(a: &DVector<f64>) -> DVector<f64> {
    let psi_sum = SpecialGamma::digamma(a.sum());
    a.map(|x| SpecialGamma::digamma(x) - psi_sum)
}

/// Log of the normalizing constant, `lnΓ(Σ a) - Σ lnΓ(a[k])`
pub fn dirichlet_log_normalizer(a: &DVector<f64>) -> f64 {
    SpecialGamma::ln_gamma(a.sum()).0
        - a.iter()
            .map(|&x| SpecialGamma::ln_gamma(x).0)
            .sum::<f64>()
}

/// Differential entropy of `Dirichlet(a)`
///
/// ```text
/// H = -lnΓ(Σa) + Σ lnΓ(a[k]) - Σ (a[k] - 1)(ψ(a[k]) - ψ(Σa))
/// ```
pub fn dirichlet_entropy(a: &DVector<f64>) -> f64 {
    let elog = dirichlet_expected_log(a);
    -dirichlet_log_normalizer(a) - a.zip_map(&elog, |ak, ek| (ak - 1.0) * ek).sum()
}

/// A Dirichlet parameter vector with hyper parameter `a0` and the
/// sufficient statistic accumulated on top of it.
#[derive(Debug, Clone)]
pub struct DirichletParam {
    /////////////////////
    // hyper parameter //
    /////////////////////
    a0: DVector<f64>,
    //////////////////////////
    // sufficient statistic //
    //////////////////////////
    a_stat: DVector<f64>,
    //////////////////////////
    // estimated parameters //
    //////////////////////////
    estimated_mean: DVector<f64>,
    estimated_cov: DMatrix<f64>,
    estimated_log_mean: DVector<f64>,
}

impl DirichletParam {
    /// New Dirichlet parameter with its statistic set to the prior
    ///
    /// * `a0` - prior concentrations, all finite and > 0
    pub fn new(a0: DVector<f64>) -> anyhow::Result<Self> {
        if a0.is_empty() {
            anyhow::bail!("empty Dirichlet concentration vector");
        }
        if let Some((k, x)) = a0
            .iter()
            .enumerate()
            .find(|(_, x)| !(x.is_finite() && **x > 0.0))
        {
            anyhow::bail!("Dirichlet concentration a0[{}] = {} must be finite and > 0", k, x);
        }
        let kk = a0.len();
        let mut ret = Self {
            a_stat: a0.clone(),
            a0,
            estimated_mean: DVector::zeros(kk),
            estimated_cov: DMatrix::zeros(kk, kk),
            estimated_log_mean: DVector::zeros(kk),
        };
        ret.calibrate();
        Ok(ret)
    }

    pub fn prior(&self) -> &DVector<f64> {
        &self.a0
    }

    /// Current concentrations (prior + statistic)
    pub fn concentration(&self) -> &DVector<f64> {
        &self.a_stat
    }
}

impl ConjugateParam for DirichletParam {
    type DVec = DVector<f64>;

    fn add_stat(&mut self, add: &Self::DVec) {
        self.a_stat += add;
    }

    fn update_stat(&mut self, update: &Self::DVec) {
        self.reset_stat();
        self.add_stat(update);
    }

    fn reset_stat(&mut self) {
        self.a_stat.copy_from(&self.a0);
    }

    fn calibrate(&mut self) {
        self.map_calibrate_mean();
        self.map_calibrate_cov();
        self.map_calibrate_log_mean();
    }

    fn map_calibrate_mean(&mut self) {
        self.estimated_mean = &self.a_stat / self.a_stat.sum();
    }

    fn map_calibrate_cov(&mut self) {
        self.estimated_cov = dirichlet_moments(&self.a_stat).1;
    }

    fn map_calibrate_log_mean(&mut self) {
        self.estimated_log_mean = dirichlet_expected_log(&self.a_stat);
    }
}

impl Inference for DirichletParam {
    type Mat = DMatrix<f64>;
    type DVec = DVector<f64>;

    fn posterior_mean(&self) -> &Self::DVec {
        &self.estimated_mean
    }

    fn posterior_cov(&self) -> &Self::Mat {
        &self.estimated_cov
    }

    fn posterior_log_mean(&self) -> &Self::DVec {
        &self.estimated_log_mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_moments_uniform_pair() {
        let a = DVector::from_vec(vec![1.0, 1.0]);
        let (mean, cov) = dirichlet_moments(&a);
        assert_abs_diff_eq!(mean[0], 0.5);
        // Beta(1,1) variance = 1/12
        assert_abs_diff_eq!(cov[(0, 0)], 1.0 / 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[(0, 1)], -1.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cov_rows_sum_to_zero() {
        let a = DVector::from_vec(vec![0.5, 3.0, 7.25, 1.0]);
        let (mean, cov) = dirichlet_moments(&a);
        assert_abs_diff_eq!(mean.sum(), 1.0, epsilon = 1e-12);
        for j in 0..4 {
            assert_abs_diff_eq!(cov.row(j).sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_entropy_flat() {
        // Dirichlet(1,..,1) is uniform on the simplex: H = -ln((K-1)!)
        let a = DVector::from_element(4, 1.0);
        assert_abs_diff_eq!(dirichlet_entropy(&a), -(6f64).ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_expected_log_beta() {
        // Beta(2,1): E[ln f] = ψ(2) - ψ(3) = -1/2
        let a = DVector::from_vec(vec![2.0, 1.0]);
        let elog = dirichlet_expected_log(&a);
        assert_abs_diff_eq!(elog[0], -0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_param_update() -> anyhow::Result<()> {
        let mut param = DirichletParam::new(DVector::from_element(3, 1.0))?;
        param.update_stat(&DVector::from_vec(vec![2.0, 0.0, 1.0]));
        param.calibrate();
        assert_abs_diff_eq!(param.concentration()[0], 3.0);
        assert_abs_diff_eq!(param.posterior_mean()[0], 0.5, epsilon = 1e-12);

        param.update_stat(&DVector::from_vec(vec![0.0, 0.0, 0.0]));
        assert_abs_diff_eq!(param.concentration()[0], 1.0);
        Ok(())
    }

    #[test]
    fn test_invalid_prior() {
        assert!(DirichletParam::new(DVector::from_vec(vec![1.0, 0.0])).is_err());
        assert!(DirichletParam::new(DVector::from_vec(vec![])).is_err());
        assert!(DirichletParam::new(DVector::from_vec(vec![f64::NAN])).is_err());
    }
}
