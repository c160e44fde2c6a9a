//! Log-evidence of the null hypothesis that every model (or every
//! family) is equally frequent in the population.

use crate::common::*;
use crate::families::FamilyPartition;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NullEvidence {
    /// `F0 = Σ_i log Σ_k exp(L[k,i]) - n log K`
    pub model: f64,
    /// Same under uniform family frequencies, if families are given
    pub family: Option<f64>,
}

/// Log-evidence of the model-level null `f = 1/K`
pub fn model_null_evidence(ll: &Mat) -> f64 {
    let (kk, nn) = ll.shape();
    ll.log_sum_exp_columns().sum() - nn as f64 * (kk as f64).ln()
}

/// Free Energy of the family-level null, with model frequencies fixed at
/// `f0[k] = 1 / (nf |family(k)|)`
///
/// ```text
/// F0_fam = Σ_i Σ_k g[k,i] (L[k,i] - log(g[k,i] + ε) + log f0[k]),  g[:,i] = softmax(L[:,i])
/// ```
pub fn family_null_evidence(ll: &Mat, families: &FamilyPartition) -> f64 {
    let log_f0 = families.null_frequencies().map(f64::ln);
    let gg = ll.softmax_columns();

    gg.column_iter()
        .zip(ll.column_iter())
        .map(|(g_i, ll_i)| {
            g_i.iter()
                .zip(ll_i.iter())
                .zip(log_f0.iter())
                .map(|((&g, &l), &lf)| weighted(g, l - (g + LOG_EPS).ln() + lf))
                .sum::<f64>()
        })
        .sum()
}

pub fn null_free_energy(ll: &Mat, families: Option<&FamilyPartition>) -> NullEvidence {
    NullEvidence {
        model: model_null_evidence(ll),
        family: families.map(|fam| family_null_evidence(ll, fam)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_uninformative_evidence() {
        let ll = Mat::zeros(4, 5);
        assert_abs_diff_eq!(model_null_evidence(&ll), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_model_null() {
        let ll = Mat::from_row_slice(2, 2, &[0.0, -1.0, -2.0, -1.0]);
        let expected = (1.0 + (-2f64).exp()).ln() + (-1.0 + 2f64.ln()) - 2.0 * 2f64.ln();
        assert_abs_diff_eq!(model_null_evidence(&ll), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_singleton_families_match_model_null() -> anyhow::Result<()> {
        // with one model per family both nulls coincide
        let ll = Mat::from_row_slice(3, 2, &[-1.0, -4.0, -2.0, -0.5, -3.0, -2.5]);
        let fam = FamilyPartition::new(&[vec![0], vec![1], vec![2]], 3)?;
        let null = null_free_energy(&ll, Some(&fam));
        assert_abs_diff_eq!(null.family.unwrap_or(f64::NAN), null.model, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_family_null_by_hand() -> anyhow::Result<()> {
        // families {0, 1} and {2}: f0 = [1/4, 1/4, 1/2]
        let ll = Mat::from_row_slice(3, 2, &[0.0, 1.0, 0.0, -1.0, 0.0, 2.0]);
        let fam = FamilyPartition::new(&[vec![0, 1], vec![2]], 3)?;
        let ln2 = 2f64.ln();

        // subject 1: g = [1/3, 1/3, 1/3]
        let subject_1 = 3f64.ln() + (2.0 * (-2.0 * ln2) + (-ln2)) / 3.0;

        // subject 2: g = softmax([1, -1, 2])
        let z = 1f64.exp() + (-1f64).exp() + 2f64.exp();
        let g = [1f64.exp() / z, (-1f64).exp() / z, 2f64.exp() / z];
        let subject_2 = z.ln() - 2.0 * ln2 * (g[0] + g[1]) - ln2 * g[2];

        assert_abs_diff_eq!(
            family_null_evidence(&ll, &fam),
            subject_1 + subject_2,
            epsilon = 1e-9
        );

        // pooling two models into one family changes the null
        let model = model_null_evidence(&ll);
        assert!((family_null_evidence(&ll, &fam) - model).abs() > 1e-3);
        Ok(())
    }

    #[test]
    fn test_neg_inf_evidence() -> anyhow::Result<()> {
        let mut ll = Mat::zeros(2, 2);
        ll[(1, 0)] = f64::NEG_INFINITY;
        let fam = FamilyPartition::new(&[vec![0], vec![1]], 2)?;
        let null = null_free_energy(&ll, Some(&fam));
        assert!(null.model.is_finite());
        assert!(null.family.is_some_and(f64::is_finite));
        Ok(())
    }
}
