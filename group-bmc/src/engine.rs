//! Variational Bayes fixed-point iteration for random-effects BMC.

use crate::common::*;
use crate::exceedance::*;
use crate::families::FamilyPartition;
use crate::free_energy::{free_energy, FreeEnergyTerms};
use crate::null_model::{null_free_energy, NullEvidence};
use crate::observer::{IterationSnapshot, LogProgress, NoProgress, ProgressObserver};
use crate::options::{BmcOptions, OptionsEcho, ResolvedOptions};
use crate::summary::log_summary;

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// A drop of the Free Energy larger than this (relative to `max(|F|, 1)`)
/// is flagged
const FE_DECREASE_TOL: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `|ΔF| <= tol_fun`
    Tolerance,
    /// `max_iter` reached first
    MaxIter,
    /// The cancellation flag was raised
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Tolerance => write!(f, "converged"),
            StopReason::MaxIter => write!(f, "reached max_iter"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Iterating,
    Converged(StopReason),
}

/// Dirichlet concentrations and the K x n attribution matrix
#[derive(Debug, Clone)]
pub struct VbPosterior {
    pub a: DVec,
    pub r: Mat,
}

/// The same quantities pooled over families
#[derive(Debug, Clone)]
pub struct FamilyOutput {
    pub names: Vec<Box<str>>,
    /// `Cᵗ a`
    pub a: DVec,
    /// `Cᵗ r`, nf x n
    pub r: Mat,
    pub ef: DVec,
    pub vf: Mat,
    pub ep: DVec,
    pub ep_method: ExceedanceMethod,
    pub null_free_energy: f64,
    pub bor: f64,
    pub pep: DVec,
}

#[derive(Debug, Clone)]
pub struct BmcOutput {
    pub posterior: VbPosterior,
    pub prior: VbPosterior,
    /// Final Free Energy
    pub free_energy: f64,
    /// Free Energy of the prior state, then one value per iteration
    pub free_energy_trace: Vec<f64>,
    pub terms: FreeEnergyTerms,
    pub null: NullEvidence,
    /// `p(H1) = sigmoid(F - F0)`
    pub p_h1: f64,
    /// Bayesian omnibus risk, `1 - p(H1)`
    pub bor: f64,
    /// Posterior mean of the model frequencies
    pub ef: DVec,
    pub vf: Mat,
    pub ep: DVec,
    pub ep_method: ExceedanceMethod,
    /// Protected exceedance probabilities
    pub pep: DVec,
    /// `Σ_i L[k,i]`
    pub fixed_effects_log_evidence: DVec,
    pub fixed_effects_posterior: DVec,
    pub families: Option<FamilyOutput>,
    pub iterations: usize,
    pub stop_reason: StopReason,
    /// Number of flagged Free-Energy decreases
    pub fe_decreases: usize,
    pub elapsed: Duration,
    pub num_models: usize,
    pub num_subjects: usize,
    pub options: OptionsEcho,
}

/// VB fit of one evidence matrix
pub struct GroupBmc<'a> {
    ll: &'a Mat,
    options: BmcOptions,
    resolved: ResolvedOptions,
    ////////////////////////
    // variational params //
    ////////////////////////
    freq: DirichletParam,
    r: Mat,
    ///////////////
    // diagnosis //
    ///////////////
    free_energy_trace: Vec<f64>,
    terms: FreeEnergyTerms,
    iteration: usize,
    fe_decreases: usize,
    state: EngineState,
    started: Instant,
}

impl<'a> GroupBmc<'a> {
    /// Validate the inputs, set the posterior to the prior and evaluate
    /// the first Free Energy
    ///
    /// * `ll` - K x n log-evidence matrix (models x subjects)
    /// * `options` - iteration and prior settings
    pub fn new(ll: &'a Mat, options: &BmcOptions) -> anyhow::Result<Self> {
        let started = Instant::now();
        let resolved = options.resolve(ll)?;
        let freq = DirichletParam::new(resolved.priors.a.clone())?;
        let r = resolved.priors.r.clone();

        let mut ret = Self {
            ll,
            options: options.clone(),
            resolved,
            freq,
            r,
            free_energy_trace: vec![],
            terms: FreeEnergyTerms::default(),
            iteration: 0,
            fe_decreases: 0,
            state: EngineState::Initializing,
            started,
        };

        ret.terms = ret.evaluate_free_energy();
        ret.free_energy_trace.push(ret.terms.total);
        ret.state = EngineState::Iterating;

        debug!(
            "initialized {} models x {} subjects, F = {:.4}",
            ll.nrows(),
            ll.ncols(),
            ret.terms.total
        );
        Ok(ret)
    }

    fn evaluate_free_energy(&self) -> FreeEnergyTerms {
        free_energy(
            self.ll,
            self.freq.concentration(),
            &self.r,
            self.freq.prior(),
        )
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn free_energy(&self) -> f64 {
        self.terms.total
    }

    pub fn free_energy_trace(&self) -> &[f64] {
        &self.free_energy_trace
    }

    pub fn concentration(&self) -> &DVec {
        self.freq.concentration()
    }

    pub fn attribution(&self) -> &Mat {
        &self.r
    }

    /// `E[log f[k]] = ψ(a[k]) - ψ(Σ a)`
    pub fn expected_log_frequencies(&self) -> &DVec {
        self.freq.posterior_log_mean()
    }

    /// One coordinate-ascent sweep: attributions given the frequency
    /// density, then the concentrations given the attributions.
    /// Returns the change of the Free Energy.
    pub fn step(&mut self) -> f64 {
        let elog = self.freq.posterior_log_mean();

        let mut logits = self.ll.clone();
        for mut x_i in logits.column_iter_mut() {
            x_i += elog;
        }

        if self.options.parallel_subjects {
            logits.par_softmax_columns_inplace();
        } else {
            logits.softmax_columns_inplace();
        }
        self.r = logits;

        self.freq.update_stat(&self.r.column_sum());
        self.freq.calibrate();

        let prev = self.terms.total;
        self.terms = self.evaluate_free_energy();
        self.free_energy_trace.push(self.terms.total);
        self.iteration += 1;

        let delta = self.terms.total - prev;
        let slack = FE_DECREASE_TOL * prev.abs().max(1.0);
        if delta < -slack {
            self.fe_decreases += 1;
            warn!(
                "Free Energy decreased at iteration {}: {:.6} -> {:.6}",
                self.iteration, prev, self.terms.total
            );
        }
        debug_assert!(
            delta >= -slack,
            "Free Energy decreased by {:.3e} at iteration {}",
            -delta,
            self.iteration
        );
        delta
    }

    fn stop_reason(&self, delta: f64) -> Option<StopReason> {
        if self.iteration < self.options.min_iter {
            None
        } else if delta.abs() <= self.options.tol_fun {
            Some(StopReason::Tolerance)
        } else if self.iteration >= self.options.max_iter {
            Some(StopReason::MaxIter)
        } else {
            None
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Iterate until convergence, `max_iter` or cancellation, reporting
    /// every iteration to `observer`
    pub fn run<O>(mut self, observer: &mut O) -> anyhow::Result<BmcOutput>
    where
        O: ProgressObserver + ?Sized,
    {
        let stop_reason = loop {
            if self.is_cancelled() {
                info!("cancelled after {} iteration(s)", self.iteration);
                break StopReason::Cancelled;
            }

            let delta = self.step();

            observer.on_iteration(&IterationSnapshot {
                iteration: self.iteration,
                free_energy: self.terms.total,
                delta,
                a: self.freq.concentration(),
                r: &self.r,
                ef: self.freq.posterior_mean(),
            });

            if let Some(reason) = self.stop_reason(delta) {
                match reason {
                    StopReason::Tolerance => info!(
                        "VB converged at iteration {} (ΔF = {:.2e})",
                        self.iteration,
                        delta.abs()
                    ),
                    _ => warn!(
                        "VB reached max_iter = {} with |ΔF| = {:.2e} > {:.2e}",
                        self.options.max_iter,
                        delta.abs(),
                        self.options.tol_fun
                    ),
                }
                break reason;
            }
        };

        self.state = EngineState::Converged(stop_reason);
        let out = self.finalize(stop_reason)?;
        observer.on_finish(&out);
        Ok(out)
    }

    /// Moments, exceedance probabilities, null comparison and the family
    /// block of the current posterior
    pub fn finalize(self, stop_reason: StopReason) -> anyhow::Result<BmcOutput> {
        let (kk, nn) = self.ll.shape();
        let nsamp = self.options.exceedance_samples;
        let seed = self.options.seed;

        let a = self.freq.concentration().clone();
        let ef = self.freq.posterior_mean().clone();
        let vf = self.freq.posterior_cov().clone();
        let ff = self.terms.total;

        let ep_out = exceedance_with_fallback(&a, &ef, &vf, nsamp, seed)?;

        let null = null_free_energy(self.ll, self.resolved.families.as_ref());
        let p_h1 = sigmoid(ff - null.model);
        let bor = sigmoid(null.model - ff);
        let pep = protected_exceedance(&ep_out.ep, bor);

        let fixed_effects_log_evidence = self.ll.column_sum();
        let fixed_effects_posterior = fixed_effects_posterior(&fixed_effects_log_evidence);

        let families = match (&self.resolved.families, null.family) {
            (Some(fam), Some(f0)) => Some(pool_families(
                fam,
                &a,
                &self.r,
                &ef,
                &vf,
                ff,
                f0,
                nsamp,
                seed.wrapping_add(1),
            )?),
            _ => None,
        };

        let options = self.options.echo(&self.resolved);

        Ok(BmcOutput {
            posterior: VbPosterior { a, r: self.r },
            prior: VbPosterior {
                a: self.resolved.priors.a,
                r: self.resolved.priors.r,
            },
            free_energy: ff,
            free_energy_trace: self.free_energy_trace,
            terms: self.terms,
            null,
            p_h1,
            bor,
            ef,
            vf,
            ep: ep_out.ep,
            ep_method: ep_out.method,
            pep,
            fixed_effects_log_evidence,
            fixed_effects_posterior,
            families,
            iterations: self.iteration,
            stop_reason,
            fe_decreases: self.fe_decreases,
            elapsed: self.started.elapsed(),
            num_models: kk,
            num_subjects: nn,
            options,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn pool_families(
    fam: &FamilyPartition,
    a: &DVec,
    r: &Mat,
    ef: &DVec,
    vf: &Mat,
    free_energy: f64,
    null_free_energy: f64,
    nsamp: usize,
    seed: u64,
) -> anyhow::Result<FamilyOutput> {
    let a_fam = fam.pool(a);
    let ef_fam = fam.pool(ef);
    let vf_fam = fam.pool_cov(vf);

    // the aggregate of a Dirichlet is again a Dirichlet
    let ep_out = exceedance_with_fallback(&a_fam, &ef_fam, &vf_fam, nsamp, seed)?;
    let bor = sigmoid(null_free_energy - free_energy);
    let pep = protected_exceedance(&ep_out.ep, bor);

    Ok(FamilyOutput {
        names: fam.names().to_vec(),
        a: a_fam,
        r: fam.pool_columns(r),
        ef: ef_fam,
        vf: vf_fam,
        ep: ep_out.ep,
        ep_method: ep_out.method,
        null_free_energy,
        bor,
        pep,
    })
}

/// Fit the random-effects model to `ll` (K models x n subjects).
///
/// Progress goes to the log when `display_progress` is set and a summary
/// when `verbose` is set.
pub fn group_bmc(ll: &Mat, options: &BmcOptions) -> anyhow::Result<BmcOutput> {
    let out = if options.display_progress {
        group_bmc_with_observer(ll, options, &mut LogProgress)?
    } else {
        group_bmc_with_observer(ll, options, &mut NoProgress)?
    };

    if options.verbose {
        log_summary(&out);
    }
    Ok(out)
}

/// Same as [`group_bmc`] with a caller-supplied observer and no summary
pub fn group_bmc_with_observer<O>(
    ll: &Mat,
    options: &BmcOptions,
    observer: &mut O,
) -> anyhow::Result<BmcOutput>
where
    O: ProgressObserver + ?Sized,
{
    GroupBmc::new(ll, options)?.run(observer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn quiet() -> BmcOptions {
        BmcOptions {
            display_progress: false,
            verbose: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_initial_state() -> anyhow::Result<()> {
        let ll = Mat::zeros(3, 4);
        let engine = GroupBmc::new(&ll, &quiet())?;
        assert_eq!(engine.state(), EngineState::Iterating);
        assert_eq!(engine.iteration(), 0);
        assert_eq!(engine.free_energy_trace().len(), 1);
        assert_abs_diff_eq!(engine.concentration().clone(), DVec::from_element(3, 1.0));
        assert_abs_diff_eq!(engine.attribution()[(2, 3)], 1.0 / 3.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_step_updates() -> anyhow::Result<()> {
        let ll = Mat::from_row_slice(2, 3, &[0.0, 1.0, -2.0, -1.0, 0.5, 3.0]);
        let mut engine = GroupBmc::new(&ll, &quiet())?;
        let delta = engine.step();
        assert!(delta >= 0.0);
        assert_abs_diff_eq!(engine.concentration().sum(), 2.0 + 3.0, epsilon = 1e-10);
        for r_i in engine.attribution().column_iter() {
            assert_abs_diff_eq!(r_i.sum(), 1.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_serial_matches_parallel() -> anyhow::Result<()> {
        let ll = Mat::from_row_slice(3, 4, &[
            -1.0, -4.0, -2.0, -0.5, //
            -3.0, -2.5, -1.0, -6.0, //
            -2.0, -2.0, -2.0, -2.0,
        ]);
        let par = group_bmc(&ll, &quiet())?;
        let ser = group_bmc(
            &ll,
            &BmcOptions {
                parallel_subjects: false,
                ..quiet()
            },
        )?;
        assert_abs_diff_eq!(par.posterior.a, ser.posterior.a, epsilon = 1e-12);
        assert_eq!(par.iterations, ser.iterations);
        Ok(())
    }

    #[test]
    fn test_bor_and_pep() -> anyhow::Result<()> {
        let ll = Mat::from_row_slice(2, 4, &[0.0, 0.0, 0.0, 0.0, -8.0, -8.0, -8.0, -8.0]);
        let out = group_bmc(&ll, &quiet())?;
        assert_abs_diff_eq!(out.bor + out.p_h1, 1.0, epsilon = 1e-12);
        assert!(out.bor < 0.5);
        assert!(out.pep[0] > 0.5);
        assert_abs_diff_eq!(out.fixed_effects_log_evidence[1], -32.0);
        assert!(out.fixed_effects_posterior[0] > 0.999);
        Ok(())
    }
}
