use crate::run_fit::*;

use group_bmc::between_groups::compare_groups_with;

use clap::Parser;
use matrix_util::common_io::write_lines;

#[derive(Parser, Debug, Clone)]
///
/// Compare model frequencies between groups of subjects
///
pub struct CompareGroupsArgs {
    #[arg(
        required = true,
        num_args = 2..,
        help = "Log-evidence matrix files, one per group",
        long_help = "Log-evidence matrix files, one per group (at least two). \n\
		     Every file must list the same models in the same order."
    )]
    log_evidence_files: Vec<Box<str>>,

    #[arg(short, long, required = true, help = "Output header")]
    out: Box<str>,

    #[command(flatten)]
    vb: VbArgs,
}

pub fn run_compare_groups(args: &CompareGroupsArgs) -> anyhow::Result<()> {
    let stop = args.vb.init()?;

    let groups = args
        .log_evidence_files
        .iter()
        .map(|file| args.vb.read_log_evidence(file))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let num_models = groups.first().map(|g| g.nrows()).unwrap_or(0);
    let options = args.vb.to_options(num_models, stop)?;

    let cmp = compare_groups_with(&groups, |ll| fit_with_progress(ll, &options))?;

    let mut lines: Vec<Box<str>> = vec!["group\tfile\tsubjects\tF\tstop".into()];
    for (g, (fit, file)) in cmp.groups.iter().zip(args.log_evidence_files.iter()).enumerate() {
        lines.push(
            format!(
                "{}\t{}\t{}\t{}\t{}",
                g + 1,
                file,
                fit.num_subjects,
                fit.free_energy,
                fit.stop_reason
            )
            .into(),
        );
    }
    lines.push(format!("F_diff\t.\t.\t{}\t.", cmp.f_diff).into());
    lines.push(
        format!(
            "F_same\t.\t{}\t{}\t{}",
            cmp.pooled.num_subjects, cmp.f_same, cmp.pooled.stop_reason
        )
        .into(),
    );
    lines.push(format!("p_equal\t.\t.\t{}\t.", cmp.p_equal).into());
    lines.push(format!("cancelled\t.\t.\t{}\t.", cmp.cancelled).into());
    write_lines(&lines, &format!("{}.groups.tsv", args.out))?;

    for (g, fit) in cmp.groups.iter().enumerate() {
        write_fit_outputs(fit, &format!("{}.group_{}", args.out, g + 1))?;
    }
    write_fit_outputs(&cmp.pooled, &format!("{}.pooled", args.out))?;

    Ok(())
}
