//! Variational Free Energy of the random-effects model
//!
//! ```text
//! f ~ Dirichlet(a0),  m[i] | f ~ Categorical(f),  log p(y[i] | m[i] = k) = L[k,i]
//! q(f) = Dirichlet(a),  q(m[i]) = Categorical(r[:,i])
//!
//! F = E[log p(y, m, f)] + H[q(f)] + Σ_i H[q(m[i])]
//! ```

use crate::common::*;
use serde::Serialize;

/// Free Energy and its three additive terms
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FreeEnergyTerms {
    /// Expected log-joint `E[log p(y, m, f)]`
    pub expected_log_joint: f64,
    /// Entropy of the frequency density `H[q(f)]`
    pub frequency_entropy: f64,
    /// Entropy of the attributions `Σ_i H[q(m[i])]`
    pub attribution_entropy: f64,
    pub total: f64,
}

/// `-Σ_i Σ_k r[k,i] log(r[k,i] + ε)`
pub fn attribution_entropy(r: &Mat) -> f64 {
    -r.iter().map(|&x| weighted(x, (x + LOG_EPS).ln())).sum::<f64>()
}

/// Expected log-joint
///
/// ```text
/// lnΓ(Σa0) - Σ lnΓ(a0[k]) + Σ_k (a0[k] - 1) E[log f[k]] + Σ_k Σ_i r[k,i] (E[log f[k]] + L[k,i])
/// ```
pub fn expected_log_joint(ll: &Mat, a: &DVec, r: &Mat, a_prior: &DVec) -> f64 {
    let elog = dirichlet_expected_log(a);

    let prior_term = dirichlet_log_normalizer(a_prior)
        + a_prior.zip_map(&elog, |a0, e| (a0 - 1.0) * e).sum();

    let data_term: f64 = r
        .column_iter()
        .zip(ll.column_iter())
        .map(|(r_i, ll_i)| {
            r_i.iter()
                .zip(ll_i.iter())
                .zip(elog.iter())
                .map(|((&r_ki, &l_ki), &e_k)| weighted(r_ki, e_k + l_ki))
                .sum::<f64>()
        })
        .sum();

    prior_term + data_term
}

/// Free Energy of the variational posterior `(a, r)` under the prior `a_prior`
///
/// * `ll` - K x n log-evidence matrix
/// * `a` - posterior Dirichlet concentrations
/// * `r` - K x n attribution matrix
/// * `a_prior` - prior Dirichlet concentrations
pub fn free_energy(ll: &Mat, a: &DVec, r: &Mat, a_prior: &DVec) -> FreeEnergyTerms {
    let expected_log_joint = expected_log_joint(ll, a, r, a_prior);
    let frequency_entropy = dirichlet_entropy(a);
    let attribution_entropy = attribution_entropy(r);

    FreeEnergyTerms {
        expected_log_joint,
        frequency_entropy,
        attribution_entropy,
        total: expected_log_joint + frequency_entropy + attribution_entropy,
    }
}
