use crate::common::*;
use crate::exceedance::MAX_EXCEEDANCE_SAMPLES;
use crate::families::FamilyPartition;
use serde::Serialize;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const DEFAULT_MAX_ITER: usize = 32;
pub const DEFAULT_MIN_ITER: usize = 1;
pub const DEFAULT_TOL_FUN: f64 = 1e-4;
pub const DEFAULT_EXCEEDANCE_SAMPLES: usize = 10_000;

/// Options for group-level Bayesian model comparison.
#[derive(Debug, Clone)]
pub struct BmcOptions {
    /// Maximum number of VB iterations. Default: 32
    pub max_iter: usize,
    /// Minimum number of VB iterations. Default: 1
    pub min_iter: usize,
    /// Free-Energy change below which the iteration stops. Default: 1e-4
    pub tol_fun: f64,
    /// Prior Dirichlet concentrations, one per model. Default: 1 per
    /// model, or `1/|family|` per model when families are given
    pub priors: Option<DVec>,
    /// Partition of the model indices (0-based) into families
    pub families: Option<Vec<Vec<usize>>>,
    /// Names of the families, in the same order. Default: "1", "2", ...
    pub family_names: Option<Vec<Box<str>>>,
    /// Report each iteration to the progress observer. Default: true
    pub display_progress: bool,
    /// Log a textual summary at the end. Default: true
    pub verbose: bool,
    /// Monte-Carlo draws for exceedance probabilities. Default: 10,000
    pub exceedance_samples: usize,
    /// Random seed of the exceedance sampler. Default: 42
    pub seed: u64,
    /// Update subject attributions in parallel. Default: true
    pub parallel_subjects: bool,
    /// Checked once per iteration; stops the iteration when set
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for BmcOptions {
    fn default() -> Self {
        BmcOptions {
            max_iter: DEFAULT_MAX_ITER,
            min_iter: DEFAULT_MIN_ITER,
            tol_fun: DEFAULT_TOL_FUN,
            priors: None,
            families: None,
            family_names: None,
            display_progress: true,
            verbose: true,
            exceedance_samples: DEFAULT_EXCEEDANCE_SAMPLES,
            seed: 42,
            parallel_subjects: true,
            cancel: None,
        }
    }
}

/// Prior concentrations and the prior attribution matrix whose columns
/// are the normalized concentrations.
#[derive(Debug, Clone)]
pub struct BmcPriors {
    pub a: DVec,
    pub r: Mat,
}

/// Options checked against the evidence matrix.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub priors: BmcPriors,
    pub families: Option<FamilyPartition>,
}

/// Fail on anything the VB iteration cannot digest: an empty matrix,
/// NaN or `+inf` entries, or a subject for which every model is `-inf`.
pub fn validate_log_evidence(ll: &Mat) -> anyhow::Result<()> {
    let (kk, nn) = ll.shape();
    if kk == 0 || nn == 0 {
        anyhow::bail!(
            "L: log-evidence matrix must have at least one model and one subject, got {} x {}",
            kk,
            nn
        );
    }

    for (i, ll_i) in ll.column_iter().enumerate() {
        if let Some(k) = ll_i.iter().position(|x| x.is_nan() || *x == f64::INFINITY) {
            anyhow::bail!(
                "L: entry (model {}, subject {}) = {} is not a valid log-evidence",
                k + 1,
                i + 1,
                ll_i[k]
            );
        }
        if ll_i.iter().all(|x| *x == f64::NEG_INFINITY) {
            anyhow::bail!("L: every model has -inf log-evidence for subject {}", i + 1);
        }
    }
    Ok(())
}

impl BmcOptions {
    fn validate(&self) -> anyhow::Result<()> {
        if self.max_iter == 0 {
            anyhow::bail!("max_iter must be at least 1");
        }
        if self.min_iter > self.max_iter {
            anyhow::bail!(
                "min_iter ({}) must not exceed max_iter ({})",
                self.min_iter,
                self.max_iter
            );
        }
        if !(self.tol_fun.is_finite() && self.tol_fun >= 0.0) {
            anyhow::bail!("tol_fun must be finite and non-negative, got {}", self.tol_fun);
        }
        if self.exceedance_samples == 0 || self.exceedance_samples > MAX_EXCEEDANCE_SAMPLES {
            anyhow::bail!(
                "exceedance_samples must be between 1 and {}, got {}",
                MAX_EXCEEDANCE_SAMPLES,
                self.exceedance_samples
            );
        }
        Ok(())
    }

    /// Validate the options and the evidence matrix together and work
    /// out the priors
    pub fn resolve(&self, ll: &Mat) -> anyhow::Result<ResolvedOptions> {
        self.validate()?;
        validate_log_evidence(ll)?;

        let (kk, nn) = ll.shape();

        let families = match (&self.families, &self.family_names) {
            (Some(groups), Some(names)) => {
                Some(FamilyPartition::new(groups, kk)?.with_names(names.clone())?)
            }
            (Some(groups), None) => Some(FamilyPartition::new(groups, kk)?),
            (None, Some(_)) => anyhow::bail!("families: names given without a partition"),
            (None, None) => None,
        };

        let a = match (&self.priors, &families) {
            (Some(a), _) => {
                if a.len() != kk {
                    anyhow::bail!("priors: expected {} concentrations, got {}", kk, a.len());
                }
                if let Some((k, x)) = a
                    .iter()
                    .enumerate()
                    .find(|(_, x)| !(x.is_finite() && **x > 0.0))
                {
                    anyhow::bail!(
                        "priors: concentration of model {} = {} must be finite and > 0",
                        k + 1,
                        x
                    );
                }
                a.clone()
            }
            (None, Some(fam)) => fam.uniform_prior(),
            (None, None) => DVec::from_element(kk, 1.0),
        };

        let r0 = &a / a.sum();
        let r = Mat::from_fn(kk, nn, |k, _| r0[k]);

        Ok(ResolvedOptions {
            priors: BmcPriors { a, r },
            families,
        })
    }

    /// The options as they were applied to one run
    pub fn echo(&self, resolved: &ResolvedOptions) -> OptionsEcho {
        OptionsEcho {
            max_iter: self.max_iter,
            min_iter: self.min_iter,
            tol_fun: self.tol_fun,
            priors: resolved.priors.a.iter().copied().collect(),
            families: resolved
                .families
                .as_ref()
                .map(|fam| (0..fam.num_families()).map(|f| fam.members(f).to_vec()).collect()),
            family_names: resolved.families.as_ref().map(|fam| fam.names().to_vec()),
            exceedance_samples: self.exceedance_samples,
            seed: self.seed,
            parallel_subjects: self.parallel_subjects,
        }
    }
}

/// Resolved options reported back with the output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionsEcho {
    pub max_iter: usize,
    pub min_iter: usize,
    pub tol_fun: f64,
    pub priors: Vec<f64>,
    /// 0-based model indices per family
    pub families: Option<Vec<Vec<usize>>>,
    pub family_names: Option<Vec<Box<str>>>,
    pub exceedance_samples: usize,
    pub seed: u64,
    pub parallel_subjects: bool,
}
