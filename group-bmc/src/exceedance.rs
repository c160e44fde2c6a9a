//! Exceedance probabilities: for each category, the posterior
//! probability that its frequency is the largest of all.
//!
//! Two tiers:
//! - **Dirichlet**: Monte-Carlo draws from the exact posterior `Dirichlet(a)`.
//! - **Gaussian**: moment-matched `N(E, V)` surrogate; closed form for
//!   two categories, Monte-Carlo otherwise.
//!
//! The probabilities need not sum to exactly one: Monte-Carlo noise and
//! the Gaussian surrogate (whose draws leave the simplex) are
//! approximation artifacts.

use crate::common::*;
use matrix_util::dmatrix_util::softmax_inplace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use special::Error;

/// Draws are made in blocks of this many columns
const SAMPLE_BLOCK: usize = 1_000;

/// Largest number of Monte-Carlo draws a caller may ask for
pub const MAX_EXCEEDANCE_SAMPLES: usize = 1_000_000_000;

/// The Dirichlet tier gives up beyond `K x samples` Gamma variates
pub const DIRICHLET_MAX_VARIATES: usize = 1 << 28;

/// The Gaussian tier never draws more than this many samples
pub const GAUSSIAN_MAX_SAMPLES: usize = 100_000;

/// How the reported exceedance probabilities were obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ExceedanceMethod {
    /// A single category; its probability is one
    Trivial,
    /// Sampled from the exact Dirichlet posterior
    Dirichlet,
    /// The Dirichlet tier failed and the Gaussian tier took over
    GaussianFallback { reason: Box<str> },
}

#[derive(Debug, Clone)]
pub struct ExceedanceOut {
    pub ep: DVec,
    pub method: ExceedanceMethod,
}

/// Numerical failures of the Dirichlet tier
#[derive(Debug, Clone, PartialEq)]
pub enum ExceedanceFailure {
    /// A concentration is not a valid Gamma shape
    InvalidConcentration { index: usize, value: f64 },
    /// Every Gamma variate of a draw underflowed (or overflowed)
    DegenerateDraw(Box<str>),
    /// `K x samples` exceeds the Dirichlet sampling budget
    TooLarge { categories: usize, samples: usize },
}

impl std::fmt::Display for ExceedanceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceedanceFailure::InvalidConcentration { index, value } => write!(
                f,
                "Dirichlet concentration #{} = {} is not a valid Gamma shape",
                index + 1,
                value
            ),
            ExceedanceFailure::DegenerateDraw(msg) => write!(f, "{}", msg),
            ExceedanceFailure::TooLarge {
                categories,
                samples,
            } => write!(
                f,
                "{} categories x {} samples exceeds the Dirichlet budget of {} variates",
                categories, samples, DIRICHLET_MAX_VARIATES
            ),
        }
    }
}

impl std::error::Error for ExceedanceFailure {}

/// Count, for each category, how often it is the column maximum
fn count_column_max(xx: &Mat, counts: &mut [usize]) {
    for x_j in xx.column_iter() {
        // first maximum wins ties
        let (kmax, _) = x_j
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(kb, xb), (k, &x)| {
                if x > xb {
                    (k, x)
                } else {
                    (kb, xb)
                }
            });
        counts[kmax] += 1;
    }
}

/// Split `nsamp` draws into seeded blocks, run `draw` on each block in
/// parallel and turn the argmax counts into frequencies
fn sample_exceedance<F>(
    kk: usize,
    nsamp: usize,
    seed: u64,
    draw: F,
) -> Result<DVec, ExceedanceFailure>
where
    F: Fn(usize, &mut StdRng) -> Result<Mat, ExceedanceFailure> + Sync,
{
    let nblocks = nsamp.div_ceil(SAMPLE_BLOCK);

    let counts = (0..nblocks)
        .into_par_iter()
        .map(|b| -> Result<Vec<usize>, ExceedanceFailure> {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(b as u64));
            let nn = SAMPLE_BLOCK.min(nsamp - b * SAMPLE_BLOCK);
            let xx = draw(nn, &mut rng)?;
            let mut counts = vec![0; kk];
            count_column_max(&xx, &mut counts);
            Ok(counts)
        })
        .try_reduce(
            || vec![0; kk],
            |mut acc, c| {
                acc.iter_mut().zip(c).for_each(|(x, y)| *x += y);
                Ok(acc)
            },
        )?;

    Ok(DVec::from_iterator(
        kk,
        counts.into_iter().map(|c| c as f64 / nsamp as f64),
    ))
}

/// Exceedance probabilities by sampling the exact posterior `Dirichlet(a)`
///
/// * `a` - Dirichlet concentrations
/// * `nsamp` - number of Monte-Carlo draws
/// * `seed` - random seed
pub fn dirichlet_exceedance(a: &DVec, nsamp: usize, seed: u64) -> Result<DVec, ExceedanceFailure> {
    let kk = a.len();
    if kk <= 1 {
        return Ok(DVec::from_element(kk, 1.0));
    }

    if let Some((index, &value)) = a
        .iter()
        .enumerate()
        .find(|(_, x)| !(x.is_finite() && **x > 0.0))
    {
        return Err(ExceedanceFailure::InvalidConcentration { index, value });
    }

    if kk
        .checked_mul(nsamp)
        .is_none_or(|n| n > DIRICHLET_MAX_VARIATES)
    {
        return Err(ExceedanceFailure::TooLarge {
            categories: kk,
            samples: nsamp,
        });
    }

    sample_exceedance(kk, nsamp, seed, |nn, rng| {
        Mat::rdirichlet_columns(a, nn, rng)
            .map_err(|e| ExceedanceFailure::DegenerateDraw(e.to_string().into_boxed_str()))
    })
}

/// Exceedance probabilities under the Gaussian surrogate `N(mean, cov)`,
/// with at most `GAUSSIAN_MAX_SAMPLES` draws
///
/// The covariance of a Dirichlet is singular (frequencies sum to one),
/// so the square root comes from a symmetric eigendecomposition with
/// negative eigenvalues clamped to zero.
pub fn gaussian_exceedance(
    mean: &DVec,
    cov: &Mat,
    nsamp: usize,
    seed: u64,
) -> anyhow::Result<DVec> {
    let kk = mean.len();
    if cov.shape() != (kk, kk) {
        anyhow::bail!(
            "covariance is {} x {}, expected {} x {}",
            cov.nrows(),
            cov.ncols(),
            kk,
            kk
        );
    }
    if mean.iter().chain(cov.iter()).any(|x| !x.is_finite()) {
        anyhow::bail!("non-finite moments in the Gaussian surrogate");
    }

    match kk {
        0 => Ok(DVec::zeros(0)),
        1 => Ok(DVec::from_element(1, 1.0)),
        2 => {
            // P(f1 > f2) = Φ((μ1 - μ2) / sd(f1 - f2))
            let d = mean[0] - mean[1];
            let s2 = cov[(0, 0)] + cov[(1, 1)] - 2.0 * cov[(0, 1)];
            let p = if s2 > 0.0 {
                0.5 * (-d / (2.0 * s2).sqrt()).compl_error()
            } else if d > 0.0 {
                1.0
            } else if d < 0.0 {
                0.0
            } else {
                0.5
            };
            Ok(DVec::from_vec(vec![p, 1.0 - p]))
        }
        _ => {
            let eig = cov.clone().symmetric_eigen();
            let sqrt_lambda = eig.eigenvalues.map(|x| x.max(0.0).sqrt());
            let sqrt_cov = &eig.eigenvectors * Mat::from_diagonal(&sqrt_lambda);
            let nsamp = nsamp.clamp(1, GAUSSIAN_MAX_SAMPLES);

            sample_exceedance(kk, nsamp, seed, |nn, rng| {
                Ok(Mat::rmvnorm_columns(mean, &sqrt_cov, nn, rng))
            })
            .map_err(|e| anyhow::anyhow!("{}", e))
        }
    }
}

/// Try the Dirichlet tier first and fall back to the Gaussian surrogate
/// on a numerical failure. The fallback is logged and recorded in the
/// returned method.
pub fn exceedance_with_fallback(
    a: &DVec,
    mean: &DVec,
    cov: &Mat,
    nsamp: usize,
    seed: u64,
) -> anyhow::Result<ExceedanceOut> {
    if a.len() == 1 {
        return Ok(ExceedanceOut {
            ep: DVec::from_element(1, 1.0),
            method: ExceedanceMethod::Trivial,
        });
    }

    match dirichlet_exceedance(a, nsamp, seed) {
        Ok(ep) => Ok(ExceedanceOut {
            ep,
            method: ExceedanceMethod::Dirichlet,
        }),
        Err(failure) => {
            warn!(
                "exact exceedance probabilities failed ({}); using the Gaussian approximation",
                failure
            );
            let ep = gaussian_exceedance(mean, cov, nsamp, seed)?;
            Ok(ExceedanceOut {
                ep,
                method: ExceedanceMethod::GaussianFallback {
                    reason: failure.to_string().into_boxed_str(),
                },
            })
        }
    }
}

/// Protected exceedance probabilities, `(1 - bor) ep + bor / K`
pub fn protected_exceedance(ep: &DVec, bor: f64) -> DVec {
    let kk = ep.len() as f64;
    ep.map(|x| (1.0 - bor) * x + bor / kk)
}

/// Posterior over models under fixed effects: `softmax(Σ_i L[:,i])`,
/// uniform if every model is ruled out by some subject
pub fn fixed_effects_posterior(log_evidence: &DVec) -> DVec {
    let mut ret = log_evidence.clone();
    softmax_inplace(ret.as_mut_slice());
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_symmetric_dirichlet() -> Result<(), ExceedanceFailure> {
        let a = DVec::from_element(3, 4.0);
        let ep = dirichlet_exceedance(&a, 30_000, 1)?;
        for k in 0..3 {
            assert_abs_diff_eq!(ep[k], 1.0 / 3.0, epsilon = 0.02);
        }
        assert_abs_diff_eq!(ep.sum(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_dominant_category() -> Result<(), ExceedanceFailure> {
        let a = DVec::from_vec(vec![50.0, 2.0, 2.0]);
        let ep = dirichlet_exceedance(&a, 5_000, 1)?;
        assert!(ep[0] > 0.99, "{}", ep);
        Ok(())
    }

    #[test]
    fn test_seed_reproducible() -> Result<(), ExceedanceFailure> {
        let a = DVec::from_vec(vec![3.0, 2.5, 1.0, 4.0]);
        let ep1 = dirichlet_exceedance(&a, 2_500, 9)?;
        let ep2 = dirichlet_exceedance(&a, 2_500, 9)?;
        assert_eq!(ep1, ep2);
        Ok(())
    }

    #[test]
    fn test_invalid_concentration() {
        let a = DVec::from_vec(vec![1.0, f64::INFINITY]);
        let err = dirichlet_exceedance(&a, 100, 1);
        assert_eq!(
            err,
            Err(ExceedanceFailure::InvalidConcentration {
                index: 1,
                value: f64::INFINITY
            })
        );
    }

    #[test]
    fn test_gaussian_pair_closed_form() -> anyhow::Result<()> {
        let a = DVec::from_vec(vec![2.5, 2.5]);
        let (mean, cov) = dirichlet_moments(&a);
        let ep = gaussian_exceedance(&mean, &cov, 10, 1)?;
        assert_abs_diff_eq!(ep[0], 0.5, epsilon = 1e-12);

        let a = DVec::from_vec(vec![40.0, 2.0]);
        let (mean, cov) = dirichlet_moments(&a);
        let ep = gaussian_exceedance(&mean, &cov, 10, 1)?;
        assert!(ep[0] > 0.99);
        assert_abs_diff_eq!(ep.sum(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_gaussian_singular_cov() -> anyhow::Result<()> {
        let a = DVec::from_vec(vec![30.0, 3.0, 3.0, 3.0]);
        let (mean, cov) = dirichlet_moments(&a);
        let ep = gaussian_exceedance(&mean, &cov, 20_000, 3)?;
        let exact = dirichlet_exceedance(&a, 20_000, 3).map_err(|e| anyhow::anyhow!("{}", e))?;
        assert!(ep[0] > 0.95);
        assert_abs_diff_eq!(ep[0], exact[0], epsilon = 0.05);
        Ok(())
    }

    #[test]
    fn test_fallback_is_recorded() -> anyhow::Result<()> {
        let a = DVec::from_vec(vec![f64::NAN, 1.0]);
        let mean = DVec::from_vec(vec![0.7, 0.3]);
        let cov = Mat::from_row_slice(2, 2, &[0.0025, -0.0025, -0.0025, 0.0025]);
        let out = exceedance_with_fallback(&a, &mean, &cov, 1_000, 1)?;
        match out.method {
            ExceedanceMethod::GaussianFallback { reason } => {
                assert!(reason.contains("Gamma shape"), "{}", reason)
            }
            other => panic!("expected a fallback, got {:?}", other),
        }
        assert!(out.ep[0] > 0.99);
        Ok(())
    }

    #[test]
    fn test_dirichlet_budget() {
        let a = DVec::from_element(3, 2.0);
        let err = dirichlet_exceedance(&a, DIRICHLET_MAX_VARIATES, 1);
        assert_eq!(
            err,
            Err(ExceedanceFailure::TooLarge {
                categories: 3,
                samples: DIRICHLET_MAX_VARIATES
            })
        );
        let err = dirichlet_exceedance(&a, usize::MAX, 1);
        assert!(matches!(err, Err(ExceedanceFailure::TooLarge { .. })));
    }

    #[test]
    fn test_fallback_beyond_budget() -> anyhow::Result<()> {
        let a = DVec::from_vec(vec![20.0, 4.0, 4.0]);
        let (mean, cov) = dirichlet_moments(&a);
        let out = exceedance_with_fallback(&a, &mean, &cov, usize::MAX, 5)?;
        match out.method {
            ExceedanceMethod::GaussianFallback { reason } => {
                assert!(reason.contains("budget"), "{}", reason)
            }
            other => panic!("expected a fallback, got {:?}", other),
        }
        assert!(out.ep[0] > 0.95, "{}", out.ep);
        assert_abs_diff_eq!(out.ep.sum(), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_single_category() -> anyhow::Result<()> {
        let a = DVec::from_element(1, 3.0);
        let (mean, cov) = dirichlet_moments(&a);
        let out = exceedance_with_fallback(&a, &mean, &cov, 10, 1)?;
        assert_eq!(out.method, ExceedanceMethod::Trivial);
        assert_abs_diff_eq!(out.ep[0], 1.0);
        Ok(())
    }

    #[test]
    fn test_protected() {
        let ep = DVec::from_vec(vec![1.0, 0.0]);
        let pep = protected_exceedance(&ep, 1.0);
        assert_abs_diff_eq!(pep[0], 0.5);
        let pep = protected_exceedance(&ep, 0.0);
        assert_abs_diff_eq!(pep[0], 1.0);
    }

    #[test]
    fn test_fixed_effects() {
        let fx = fixed_effects_posterior(&DVec::from_vec(vec![-10.0, -10.0 - 2f64.ln()]));
        assert_abs_diff_eq!(fx[0], 2.0 / 3.0, epsilon = 1e-12);

        let ruled_out = DVec::from_element(2, f64::NEG_INFINITY);
        let fx = fixed_effects_posterior(&ruled_out);
        assert_abs_diff_eq!(fx[1], 0.5);
    }
}
