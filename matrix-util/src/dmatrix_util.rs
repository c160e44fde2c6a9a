use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rayon::prelude::*;
pub use rand_distr::{Distribution, Gamma, StandardNormal};

impl MatOps for DMatrix<f64> {
    type Mat = Self;
    type DVec = DVector<f64>;
    type Scalar = f64;

    fn softmax_columns_inplace(&mut self) {
        let nrows = self.nrows();
        if nrows > 0 {
            self.as_mut_slice()
                .chunks_mut(nrows)
                .for_each(softmax_inplace);
        }
    }

    fn softmax_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.softmax_columns_inplace();
        ret
    }

    fn par_softmax_columns_inplace(&mut self) {
        let nrows = self.nrows();
        if nrows > 0 {
            self.as_mut_slice()
                .par_chunks_mut(nrows)
                .for_each(softmax_inplace);
        }
    }

    fn log_sum_exp_columns(&self) -> Self::DVec {
        let nrows = self.nrows();
        if nrows == 0 {
            return DVector::from_element(self.ncols(), f64::NEG_INFINITY);
        }
        DVector::from_iterator(
            self.ncols(),
            self.as_slice().chunks(nrows).map(log_sum_exp),
        )
    }
}

/// `log(sum(exp(x)))`, shifted by the max; `-inf` if every entry is `-inf`
pub fn log_sum_exp(x: &[f64]) -> f64 {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + x.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

/// Max-shifted softmax of one column (stored contiguously)
pub fn softmax_inplace(x: &mut [f64]) {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        // nothing to tell the rows apart
        let k = x.len() as f64;
        x.iter_mut().for_each(|v| *v = 1.0 / k);
        return;
    }
    let mut denom = 0.0;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        denom += *v;
    }
    x.iter_mut().for_each(|v| *v /= denom);
}

impl SampleOps for DMatrix<f64> {
    type Mat = Self;
    type DVec = DVector<f64>;
    type Scalar = f64;

    fn rdirichlet_columns<R: Rng + ?Sized>(
        alpha: &Self::DVec,
        nn: usize,
        rng: &mut R,
    ) -> anyhow::Result<Self::Mat> {
        let gammas = alpha
            .iter()
            .map(|&a| {
                Gamma::new(a, 1.0)
                    .map_err(|e| anyhow::anyhow!("invalid Gamma shape {}: {}", a, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let kk = alpha.len();
        let mut ret = DMatrix::<f64>::zeros(kk, nn);

        for mut x_j in ret.column_iter_mut() {
            for (x, g) in x_j.iter_mut().zip(gammas.iter()) {
                *x = g.sample(rng);
            }
            let denom = x_j.sum();
            if !(denom.is_finite() && denom > 0.0) {
                return Err(anyhow::anyhow!(
                    "degenerate Dirichlet draw: Gamma variates summed to {}",
                    denom
                ));
            }
            x_j /= denom;
        }
        Ok(ret)
    }

    fn rmvnorm_columns<R: Rng + ?Sized>(
        mean: &Self::DVec,
        sqrt_cov: &Self::Mat,
        nn: usize,
        rng: &mut R,
    ) -> Self::Mat {
        let kk = mean.len();
        let zz = DMatrix::<f64>::from_fn(kk, nn, |_, _| -> f64 { StandardNormal.sample(rng) });
        let mut ret = sqrt_cov * zz;
        for mut x_j in ret.column_iter_mut() {
            x_j += mean;
        }
        ret
    }
}
