mod run_compare_groups;
mod run_fit;

use clap::{Parser, Subcommand};
use run_compare_groups::*;
use run_fit::*;

/// GROUP-BMC
#[derive(Parser, Debug)]
#[command(
    version,
    about = "GROUP-BMC",
    long_about = "Group-level Bayesian Model Comparison with random effects\n\n\
                  Takes a model x subject matrix of log-evidences and fits, by\n\
                  Variational Bayes, the posterior over the population frequencies\n\
                  of the models and the attribution of each subject to the models.\n\n\
                  Input files are delimited text (tab, comma or space; `.gz` ok).\n\
                  `-inf` marks a model that failed for a subject.",
    term_width = 80
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Random-effects model comparison of one group",
        long_about = "Random-effects model comparison of one group of subjects.\n\n\
                      Outputs:\n\
                      - {out}.a.tsv: posterior Dirichlet concentrations (K x 1)\n\
                      - {out}.r.tsv: subject attributions (K x n)\n\
                      - {out}.ep.tsv: E[f], Var[f], EP and PEP per model (K x 4)\n\
                      - {out}.F.tsv: Free-Energy trace\n\
                      - {out}.family.{a,r,ep}.tsv: the same pooled over families\n\
                      - {out}.summary.json: everything but the attributions"
    )]
    Fit(FitArgs),

    #[command(
        about = "Do groups of subjects share the same model frequencies?",
        long_about = "Compare two or more groups of subjects.\n\n\
                      Fits each group on its own and all subjects pooled together,\n\
                      then reports p(same frequencies) = sigmoid(F_same - F_diff).\n\n\
                      Outputs:\n\
                      - {out}.groups.tsv: F per group, F_diff, F_same and p_equal\n\
                      - {out}.group_{g}.*: per-group outputs as in `fit`\n\
                      - {out}.pooled.*: outputs of the pooled fit"
    )]
    CompareGroups(CompareGroupsArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::CompareGroups(args) => {
            run_compare_groups(args)?;
        }
    }

    Ok(())
}
