use matrix_util::dmatrix_util::*;
use matrix_util::traits::{IoOps, SampleOps};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn dmatrix_io_test() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let alpha = DVector::from_element(5, 2.0);
    let xx = DMatrix::<f64>::rdirichlet_columns(&alpha, 30, &mut rng)?;

    let dir = tempfile::tempdir()?;
    let tsv_file = dir.path().join("xx.tsv.gz");
    let tsv_file = tsv_file.to_str().ok_or(anyhow::anyhow!("path"))?;
    xx.to_tsv(tsv_file)?;

    let yy = DMatrix::<f64>::read_file_delim(tsv_file, "\t", None)?;

    approx::assert_abs_diff_eq!(xx, yy);

    Ok(())
}

#[test]
fn read_log_evidence_with_header_and_neg_inf() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lev.tsv");
    std::fs::write(
        &path,
        "# log evidence, one row per model\ns1\ts2\ts3\n-1.5\t-2\t-inf\n0\t-3.25\t-1\n",
    )?;

    let ll = DMatrix::<f64>::read_file_delim(path.to_str().ok_or(anyhow::anyhow!("path"))?, "\t", Some(0))?;

    assert_eq!(ll.shape(), (2, 3));
    assert_eq!(ll[(0, 1)], -2.0);
    assert_eq!(ll[(0, 2)], f64::NEG_INFINITY);
    assert_eq!(ll[(1, 1)], -3.25);
    Ok(())
}

#[test]
fn ragged_rows_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ragged.tsv");
    std::fs::write(&path, "1\t2\t3\n4\t5\n")?;

    let ret = DMatrix::<f64>::read_file_delim(path.to_str().ok_or(anyhow::anyhow!("path"))?, "\t", None);
    assert!(ret.is_err());
    Ok(())
}

#[test]
fn bad_field_reports_location() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.tsv");
    std::fs::write(&path, "1\t2\n3\tabc\n")?;

    let err = DMatrix::<f64>::read_file_delim(path.to_str().ok_or(anyhow::anyhow!("path"))?, "\t", None)
        .err()
        .ok_or(anyhow::anyhow!("expected a parse error"))?;
    let msg = err.to_string();
    assert!(msg.contains("line 2"), "{}", msg);
    assert!(msg.contains("column 2"), "{}", msg);
    Ok(())
}
