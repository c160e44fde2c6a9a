use group_bmc::common::*;
use group_bmc::engine::{group_bmc_with_observer, BmcOutput};
use group_bmc::observer::{IterationSnapshot, LogProgress, ProgressObserver};
use group_bmc::options::*;
use group_bmc::summary::{log_summary, BmcSummary};
use group_bmc::FamilyPartition;

use clap::{Args, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget};
use matrix_util::common_io::write_lines;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settings shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct VbArgs {
    #[arg(
        long,
        default_value_t = false,
        help = "Input files are subject x model",
        long_help = "Read the input files as subject x model matrices \n\
		     (one row per subject) and transpose them."
    )]
    subjects_in_rows: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Skip the first data line as a header"
    )]
    header: bool,

    #[arg(
        short = 'f',
        long,
        value_delimiter = ',',
        help = "Family label of each model (comma-separated)",
        long_help = "Family label of each model (comma-separated), \n\
		     e.g., `rl,rl,bayes,bayes,wsls` for five models. \n\
		     Models with the same label are pooled into one family \n\
		     and the default prior becomes uniform over families."
    )]
    families: Option<Vec<Box<str>>>,

    #[arg(
        short = 'a',
        long,
        value_delimiter = ',',
        help = "Prior Dirichlet concentrations (comma-separated)",
        long_help = "Prior Dirichlet concentrations, one per model (comma-separated). \n\
		     Default: 1 per model, or 1/|family| with `--families`."
    )]
    priors: Option<Vec<f64>>,

    #[arg(long, default_value_t = DEFAULT_MAX_ITER, help = "Maximum number of VB iterations")]
    max_iter: usize,

    #[arg(long, default_value_t = DEFAULT_MIN_ITER, help = "Minimum number of VB iterations")]
    min_iter: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_TOL_FUN,
        help = "Stop when the Free Energy changes less than this"
    )]
    tol_fun: f64,

    #[arg(
        long,
        default_value_t = DEFAULT_EXCEEDANCE_SAMPLES,
        help = "Monte-Carlo draws for exceedance probabilities"
    )]
    exceedance_samples: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        default_value_t = 16,
        help = "Maximum number of threads",
        long_help = "Maximum number of threads to use for parallel processing. \n\
		     Choose the right number in HPC environments."
    )]
    max_threads: usize,

    #[arg(long, default_value_t = false, help = "Hide the progress bar")]
    no_progress: bool,

    #[arg(
        short,
        long,
        help = "Verbosity.",
        long_help = "Increase output verbosity: log every iteration and a summary."
    )]
    verbose: bool,
}

impl VbArgs {
    /// Logger, thread pool and the Ctrl-C stop flag; call once per process
    pub fn init(&self) -> anyhow::Result<Arc<AtomicBool>> {
        if self.verbose {
            std::env::set_var("RUST_LOG", "info");
        }
        env_logger::init();

        let max_threads = num_cpus::get().min(self.max_threads.max(1));
        ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .build_global()?;

        info!("will use {} threads", rayon::current_num_threads());

        let stop = Arc::new(AtomicBool::new(false));
        {
            let stop = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                info!("Interrupt received, stopping the iteration and saving results...");
                stop.store(true, Ordering::SeqCst);
            })?;
        }
        Ok(stop)
    }

    /// Read a K x n log-evidence matrix
    pub fn read_log_evidence(&self, file: &str) -> anyhow::Result<Mat> {
        let skip = if self.header { Some(0) } else { None };
        let ll = Mat::read_file_delim(file, &['\t', ',', ' '], skip)?;
        let ll = if self.subjects_in_rows {
            ll.transpose()
        } else {
            ll
        };
        info!("{}: {} models x {} subjects", file, ll.nrows(), ll.ncols());
        Ok(ll)
    }

    pub fn to_options(
        &self,
        num_models: usize,
        stop: Arc<AtomicBool>,
    ) -> anyhow::Result<BmcOptions> {
        let (families, family_names) = match &self.families {
            Some(labels) => {
                if labels.len() != num_models {
                    anyhow::bail!(
                        "families: {} labels for {} models",
                        labels.len(),
                        num_models
                    );
                }
                let fam = FamilyPartition::from_labels(labels)?;
                let groups = (0..fam.num_families())
                    .map(|f| fam.members(f).to_vec())
                    .collect();
                (Some(groups), Some(fam.names().to_vec()))
            }
            None => (None, None),
        };

        Ok(BmcOptions {
            max_iter: self.max_iter,
            min_iter: self.min_iter,
            tol_fun: self.tol_fun,
            priors: self.priors.as_ref().map(|a| DVec::from_vec(a.clone())),
            families,
            family_names,
            display_progress: !self.no_progress,
            verbose: self.verbose,
            exceedance_samples: self.exceedance_samples,
            seed: self.seed,
            parallel_subjects: true,
            cancel: Some(stop),
        })
    }
}

#[derive(Parser, Debug, Clone)]
///
/// Random-effects Bayesian model comparison of one group
///
pub struct FitArgs {
    #[arg(
        required = true,
        help = "Log-evidence matrix file (model x subject)",
        long_help = "Log-evidence matrix file, one row per model and \n\
		     one column per subject (see `--subjects-in-rows`)."
    )]
    log_evidence_file: Box<str>,

    #[arg(short, long, required = true, help = "Output header")]
    out: Box<str>,

    #[command(flatten)]
    vb: VbArgs,
}

/// Advance an `indicatif` bar by one tick per iteration
pub struct ProgressBarObserver {
    pb: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new(max_iter: usize, show: bool) -> Self {
        let pb = ProgressBar::new(max_iter as u64);
        if !show {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { pb }
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot) {
        self.pb.inc(1);
        self.pb
            .set_message(format!("F = {:.4}", snapshot.free_energy));
    }

    fn on_finish(&mut self, _output: &BmcOutput) {
        self.pb.finish_and_clear();
    }
}

/// Fit with a progress bar, or with log lines when verbose
pub fn fit_with_progress(ll: &Mat, options: &BmcOptions) -> anyhow::Result<BmcOutput> {
    let out = if options.verbose {
        group_bmc_with_observer(ll, options, &mut LogProgress)?
    } else {
        let mut pb = ProgressBarObserver::new(options.max_iter, options.display_progress);
        group_bmc_with_observer(ll, options, &mut pb)?
    };

    if options.verbose {
        log_summary(&out);
    }
    Ok(out)
}

fn column(x: &DVec) -> Mat {
    Mat::from_column_slice(x.len(), 1, x.as_slice())
}

/// Per-model (or per-family) statistics, one row each: E[f], Var[f], EP, PEP
fn stat_columns(ef: &DVec, vf: &Mat, ep: &DVec, pep: &DVec) -> Mat {
    Mat::from_columns(&[ef.clone(), vf.diagonal(), ep.clone(), pep.clone()])
}

/// Write `{out}.a.tsv`, `{out}.r.tsv`, `{out}.ep.tsv`, `{out}.F.tsv`,
/// the family variants and `{out}.summary.json`
pub fn write_fit_outputs(out: &BmcOutput, hdr: &str) -> anyhow::Result<()> {
    column(&out.posterior.a).to_tsv(&format!("{}.a.tsv", hdr))?;
    out.posterior.r.to_tsv(&format!("{}.r.tsv", hdr))?;
    stat_columns(&out.ef, &out.vf, &out.ep, &out.pep).to_tsv(&format!("{}.ep.tsv", hdr))?;

    let trace = out
        .free_energy_trace
        .iter()
        .map(|x| x.to_string().into_boxed_str())
        .collect::<Vec<_>>();
    write_lines(&trace, &format!("{}.F.tsv", hdr))?;

    if let Some(fam) = &out.families {
        column(&fam.a).to_tsv(&format!("{}.family.a.tsv", hdr))?;
        fam.r.to_tsv(&format!("{}.family.r.tsv", hdr))?;
        stat_columns(&fam.ef, &fam.vf, &fam.ep, &fam.pep)
            .to_tsv(&format!("{}.family.ep.tsv", hdr))?;
        write_lines(&fam.names, &format!("{}.family.names.tsv", hdr))?;
    }

    BmcSummary::from(out).write_json(&format!("{}.summary.json", hdr))?;
    info!("Wrote outputs: {}.*", hdr);
    Ok(())
}

pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    let stop = args.vb.init()?;

    let ll = args.vb.read_log_evidence(&args.log_evidence_file)?;
    let options = args.vb.to_options(ll.nrows(), stop)?;

    let out = fit_with_progress(&ll, &options)?;

    if out.stop_reason == group_bmc::StopReason::MaxIter {
        info!(
            "no convergence within {} iterations; consider a larger --max-iter",
            options.max_iter
        );
    }

    write_fit_outputs(&out, &args.out)
}
