use approx::assert_abs_diff_eq;
use matrix_util::dmatrix_util::*;
use matrix_util::traits::{MatOps, SampleOps};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn log_sum_exp_columns_test() {
    let xx = DMatrix::<f64>::from_row_slice(2, 2, &[0.0, 800.0, 0.0, f64::NEG_INFINITY]);
    let lse = xx.log_sum_exp_columns();
    assert_abs_diff_eq!(lse[0], 2f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(lse[1], 800.0, epsilon = 1e-12);
}

#[test]
fn softmax_is_shift_invariant() {
    let xx = DMatrix::<f64>::from_row_slice(3, 2, &[1.0, 1001.0, 2.0, 1002.0, 3.0, 1003.0]);
    let pp = xx.softmax_columns();

    for k in 0..3 {
        assert_abs_diff_eq!(pp[(k, 0)], pp[(k, 1)], epsilon = 1e-12);
    }
    assert_abs_diff_eq!(pp.column(1).sum(), 1.0, epsilon = 1e-12);
}

#[test]
fn par_softmax_matches_serial() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let sqrt_cov = DMatrix::<f64>::identity(6, 6) * 5.0;
    let xx = DMatrix::<f64>::rmvnorm_columns(&DVector::zeros(6), &sqrt_cov, 300, &mut rng);

    let serial = xx.softmax_columns();
    let mut parallel = xx.clone();
    parallel.par_softmax_columns_inplace();

    approx::assert_abs_diff_eq!(serial, parallel, epsilon = 1e-14);
    Ok(())
}

#[test]
fn softmax_handles_neg_inf() {
    let ninf = f64::NEG_INFINITY;
    let xx = DMatrix::<f64>::from_row_slice(3, 2, &[0.0, ninf, ninf, ninf, 0.0, ninf]);
    let pp = xx.softmax_columns();

    assert_abs_diff_eq!(pp[(0, 0)], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(pp[(1, 0)], 0.0, epsilon = 1e-12);
    // all -inf: uniform
    for k in 0..3 {
        assert_abs_diff_eq!(pp[(k, 1)], 1.0 / 3.0, epsilon = 1e-12);
    }
}

#[test]
fn log_sum_exp_test() {
    let xx = DMatrix::<f64>::from_row_slice(2, 2, &[0.0, 800.0, 0.0, 800.0]);
    let lse = xx.log_sum_exp_columns();
    assert_abs_diff_eq!(lse[0], 2f64.ln(), epsilon = 1e-12);
    assert_abs_diff_eq!(lse[1], 800.0 + 2f64.ln(), epsilon = 1e-9);
}

#[test]
fn rdirichlet_columns_on_simplex() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let alpha = DVector::from_vec(vec![8.0, 1.0, 1.0]);
    let xx = DMatrix::<f64>::rdirichlet_columns(&alpha, 5000, &mut rng)?;

    for j in 0..xx.ncols() {
        assert_abs_diff_eq!(xx.column(j).sum(), 1.0, epsilon = 1e-12);
    }

    let mean0 = xx.row(0).mean();
    assert_abs_diff_eq!(mean0, 0.8, epsilon = 0.02);
    Ok(())
}

#[test]
fn rdirichlet_rejects_bad_shape() {
    let mut rng = StdRng::seed_from_u64(1);
    let alpha = DVector::from_vec(vec![1.0, f64::NAN]);
    assert!(DMatrix::<f64>::rdirichlet_columns(&alpha, 10, &mut rng).is_err());
}

#[test]
fn rmvnorm_columns_mean() {
    let mut rng = StdRng::seed_from_u64(3);
    let mean = DVector::from_vec(vec![1.0, -2.0]);
    let sqrt_cov = DMatrix::<f64>::identity(2, 2) * 0.1;
    let xx = DMatrix::<f64>::rmvnorm_columns(&mean, &sqrt_cov, 4000, &mut rng);

    assert_abs_diff_eq!(xx.row(0).mean(), 1.0, epsilon = 0.01);
    assert_abs_diff_eq!(xx.row(1).mean(), -2.0, epsilon = 0.01);
}
