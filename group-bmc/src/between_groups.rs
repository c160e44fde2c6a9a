//! Do two or more groups of subjects share the same model frequencies?
//!
//! ```text
//! H_diff: each group g has its own frequencies,  F_diff = Σ_g F_g
//! H_same: one set of frequencies for everyone,   F_same = F(pooled subjects)
//! p(H_same) = sigmoid(F_same - F_diff)
//! ```

use crate::common::*;
use crate::engine::{group_bmc, BmcOutput, StopReason};
use crate::options::BmcOptions;

pub struct GroupComparison {
    /// One fit per group
    pub groups: Vec<BmcOutput>,
    /// Fit of all subjects pooled together
    pub pooled: BmcOutput,
    pub f_diff: f64,
    pub f_same: f64,
    /// Posterior probability that all groups share the same frequencies;
    /// NaN if any fit was cancelled
    pub p_equal: f64,
    /// Some fit stopped on the cancel flag, so the Free Energies are
    /// not comparable
    pub cancelled: bool,
}

/// Stack the subjects (columns) of every group
pub fn concatenate_subjects(groups: &[Mat]) -> anyhow::Result<Mat> {
    let kk = groups.first().map(|g| g.nrows()).unwrap_or(0);
    if let Some((g, x)) = groups.iter().enumerate().find(|(_, x)| x.nrows() != kk) {
        anyhow::bail!(
            "L: group {} has {} models, but group 1 has {}",
            g + 1,
            x.nrows(),
            kk
        );
    }

    let ntot = groups.iter().map(|g| g.ncols()).sum();
    let mut ret = Mat::zeros(kk, ntot);
    let mut offset = 0;
    for x in groups {
        ret.columns_mut(offset, x.ncols()).copy_from(x);
        offset += x.ncols();
    }
    Ok(ret)
}

/// Compare the hypotheses that the groups share (or not) the same model
/// frequencies
///
/// * `groups` - K x n_g log-evidence matrices, one per group
/// * `options` - applied to every fit
pub fn compare_groups(groups: &[Mat], options: &BmcOptions) -> anyhow::Result<GroupComparison> {
    compare_groups_with(groups, |ll| group_bmc(ll, options))
}

/// Same as [`compare_groups`] with a caller-supplied fitting routine
pub fn compare_groups_with<F>(groups: &[Mat], mut fit: F) -> anyhow::Result<GroupComparison>
where
    F: FnMut(&Mat) -> anyhow::Result<BmcOutput>,
{
    if groups.len() < 2 {
        anyhow::bail!("at least two groups are needed, got {}", groups.len());
    }

    let pooled_ll = concatenate_subjects(groups)?;

    let fits = groups
        .iter()
        .enumerate()
        .map(|(g, ll)| {
            info!("fitting group {} / {}", g + 1, groups.len());
            fit(ll).map_err(|e| anyhow::anyhow!("group {}: {}", g + 1, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!("fitting {} pooled subjects", pooled_ll.ncols());
    let pooled = fit(&pooled_ll)?;

    let f_diff: f64 = fits.iter().map(|x| x.free_energy).sum();
    let f_same = pooled.free_energy;

    let cancelled = fits
        .iter()
        .chain(std::iter::once(&pooled))
        .any(|x| x.stop_reason == StopReason::Cancelled);

    let p_equal = if cancelled {
        warn!("cancelled before every fit finished; p(same frequencies) is not reported");
        f64::NAN
    } else {
        sigmoid(f_same - f_diff)
    };

    info!(
        "F_same = {:.4}, F_diff = {:.4}, p(same frequencies) = {:.3}",
        f_same, f_diff, p_equal
    );

    Ok(GroupComparison {
        groups: fits,
        pooled,
        f_diff,
        f_same,
        p_equal,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_concatenate() -> anyhow::Result<()> {
        let g1 = Mat::from_element(2, 3, 1.0);
        let g2 = Mat::from_element(2, 2, 2.0);
        let x = concatenate_subjects(&[g1, g2])?;
        assert_eq!(x.shape(), (2, 5));
        assert_abs_diff_eq!(x[(1, 2)], 1.0);
        assert_abs_diff_eq!(x[(0, 3)], 2.0);

        let g3 = Mat::zeros(3, 1);
        assert!(concatenate_subjects(&[x, g3]).is_err());
        Ok(())
    }

    #[test]
    fn test_single_group_rejected() {
        let options = BmcOptions::default();
        assert!(compare_groups(&[Mat::zeros(2, 3)], &options).is_err());
    }
}
