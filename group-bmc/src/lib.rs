//! Group-level Bayesian model comparison with random effects.
//!
//! Given a K x n matrix of log-evidences (K models, n subjects), fit
//! by Variational Bayes a Dirichlet density over the population
//! frequencies of the models and a categorical attribution of every
//! subject to the models, then report exceedance probabilities and the
//! comparison against the null of equal frequencies.
//!
//! # Model
//!
//! ```text
//! f ~ Dirichlet(a0),  m[i] ~ Categorical(f),  p(y[i] | m[i] = k) = exp(L[k,i])
//! ```
//!
//! Models can be grouped into families, in which case the posterior is
//! also pooled over family members.
//!
//! # References
//!
//! Stephan et al. (2009). "Bayesian model selection for group studies."
//! NeuroImage 46(4).
//!
//! Rigoux et al. (2014). "Bayesian model selection for group studies
//! - Revisited." NeuroImage 84.

pub mod common;

/// Partition of the models into families
pub mod families;

/// Iteration, prior and sampling settings
pub mod options;

/// Free Energy of the variational posterior
pub mod free_energy;

/// Exceedance probabilities (Dirichlet sampling, Gaussian fallback)
pub mod exceedance;

/// Evidence of the equal-frequency null
pub mod null_model;

/// VB fixed-point iteration
pub mod engine;

/// Per-iteration progress hooks
pub mod observer;

/// Serializable summary and textual report
pub mod summary;

/// Same or different frequencies across groups of subjects
pub mod between_groups;

pub use between_groups::{compare_groups, compare_groups_with, GroupComparison};
pub use engine::{group_bmc, group_bmc_with_observer, BmcOutput, GroupBmc, StopReason};
pub use families::FamilyPartition;
pub use options::BmcOptions;
