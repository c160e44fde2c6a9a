//! Serializable digest of a fit and its textual report.

use crate::common::*;
use crate::engine::{BmcOutput, FamilyOutput, StopReason};
use crate::exceedance::ExceedanceMethod;
use crate::free_energy::FreeEnergyTerms;
use crate::null_model::NullEvidence;
use crate::options::OptionsEcho;

use matrix_util::common_io::mkdir;
use serde::Serialize;

fn to_vec(x: &DVec) -> Vec<f64> {
    x.iter().copied().collect()
}

fn to_rows(x: &Mat) -> Vec<Vec<f64>> {
    x.row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilySummary {
    pub names: Vec<Box<str>>,
    pub a: Vec<f64>,
    pub ef: Vec<f64>,
    pub vf: Vec<Vec<f64>>,
    pub ep: Vec<f64>,
    pub ep_method: ExceedanceMethod,
    pub pep: Vec<f64>,
    pub null_free_energy: f64,
    pub bor: f64,
}

impl From<&FamilyOutput> for FamilySummary {
    fn from(fam: &FamilyOutput) -> Self {
        Self {
            names: fam.names.clone(),
            a: to_vec(&fam.a),
            ef: to_vec(&fam.ef),
            vf: to_rows(&fam.vf),
            ep: to_vec(&fam.ep),
            ep_method: fam.ep_method.clone(),
            pep: to_vec(&fam.pep),
            null_free_energy: fam.null_free_energy,
            bor: fam.bor,
        }
    }
}

/// Everything but the attribution matrices
#[derive(Debug, Clone, Serialize)]
pub struct BmcSummary {
    pub num_models: usize,
    pub num_subjects: usize,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub elapsed_secs: f64,
    pub free_energy: f64,
    pub free_energy_trace: Vec<f64>,
    pub terms: FreeEnergyTerms,
    pub fe_decreases: usize,
    pub null: NullEvidence,
    pub p_h1: f64,
    pub bor: f64,
    pub a: Vec<f64>,
    pub ef: Vec<f64>,
    pub vf: Vec<Vec<f64>>,
    pub ep: Vec<f64>,
    pub ep_method: ExceedanceMethod,
    pub pep: Vec<f64>,
    pub fixed_effects_log_evidence: Vec<f64>,
    pub fixed_effects_posterior: Vec<f64>,
    pub families: Option<FamilySummary>,
    pub options: OptionsEcho,
}

impl From<&BmcOutput> for BmcSummary {
    fn from(out: &BmcOutput) -> Self {
        Self {
            num_models: out.num_models,
            num_subjects: out.num_subjects,
            iterations: out.iterations,
            stop_reason: out.stop_reason,
            elapsed_secs: out.elapsed.as_secs_f64(),
            free_energy: out.free_energy,
            free_energy_trace: out.free_energy_trace.clone(),
            terms: out.terms,
            fe_decreases: out.fe_decreases,
            null: out.null,
            p_h1: out.p_h1,
            bor: out.bor,
            a: to_vec(&out.posterior.a),
            ef: to_vec(&out.ef),
            vf: to_rows(&out.vf),
            ep: to_vec(&out.ep),
            ep_method: out.ep_method.clone(),
            pep: to_vec(&out.pep),
            fixed_effects_log_evidence: to_vec(&out.fixed_effects_log_evidence),
            fixed_effects_posterior: to_vec(&out.fixed_effects_posterior),
            families: out.families.as_ref().map(FamilySummary::from),
            options: out.options.clone(),
        }
    }
}

impl BmcSummary {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, json_file: &str) -> anyhow::Result<()> {
        mkdir(json_file)?;
        std::fs::write(json_file, self.to_json()?)?;
        info!("Wrote summary: {}", json_file);
        Ok(())
    }
}

fn fmt_vec(x: &DVec) -> String {
    x.iter()
        .map(|v| format!("{:.3}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fmt_method(method: &ExceedanceMethod) -> &str {
    match method {
        ExceedanceMethod::Trivial => "single category",
        ExceedanceMethod::Dirichlet => "Dirichlet sampling",
        ExceedanceMethod::GaussianFallback { .. } => "Gaussian fallback",
    }
}

/// Report a finished fit with `info!`
pub fn log_summary(out: &BmcOutput) {
    info!(
        "Bayesian model comparison: {} models, {} subjects",
        out.num_models, out.num_subjects
    );
    info!(
        "VB: {} after {} iteration(s) in {:.3}s",
        out.stop_reason,
        out.iterations,
        out.elapsed.as_secs_f64()
    );
    info!(
        "F = {:.4} (ELJ = {:.4}, H[q(f)] = {:.4}, H[q(m)] = {:.4})",
        out.free_energy,
        out.terms.expected_log_joint,
        out.terms.frequency_entropy,
        out.terms.attribution_entropy
    );
    info!(
        "null F0 = {:.4}, p(H1) = {:.3}, BOR = {:.3}",
        out.null.model, out.p_h1, out.bor
    );
    info!("E[f]  = [{}]", fmt_vec(&out.ef));
    info!("EP    = [{}] ({})", fmt_vec(&out.ep), fmt_method(&out.ep_method));
    info!("PEP   = [{}]", fmt_vec(&out.pep));
    info!("FFX p = [{}]", fmt_vec(&out.fixed_effects_posterior));

    if let Some(fam) = &out.families {
        info!("families: {}", fam.names.join(" "));
        info!(
            "family F0 = {:.4}, BOR = {:.3}",
            fam.null_free_energy, fam.bor
        );
        info!("family E[f] = [{}]", fmt_vec(&fam.ef));
        info!(
            "family EP   = [{}] ({})",
            fmt_vec(&fam.ep),
            fmt_method(&fam.ep_method)
        );
        info!("family PEP  = [{}]", fmt_vec(&fam.pep));
    }

    if out.fe_decreases > 0 {
        warn!(
            "Free Energy decreased {} time(s) during the iteration",
            out.fe_decreases
        );
    }
}
