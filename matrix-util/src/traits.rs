use crate::common_io::Delimiter;

/// Column-wise operations on a matrix whose columns are
/// (unnormalized) categorical distributions or log-weights
pub trait MatOps {
    type Mat;
    type DVec;
    type Scalar;

    /// `X[,j] <- exp(X[,j] - max) / sum(exp(X[,j] - max))`
    fn softmax_columns_inplace(&mut self);
    fn softmax_columns(&self) -> Self::Mat;
    /// Same as `softmax_columns_inplace`, one rayon task per column
    fn par_softmax_columns_inplace(&mut self);

    /// `log(sum(exp(X[,j])))` for each column, max-shifted
    fn log_sum_exp_columns(&self) -> Self::DVec;
}

/// Random matrices whose columns are draws from multivariate
/// distributions, only implemented for `nalgebra::DMatrix`
pub trait SampleOps {
    type Mat;
    type DVec;
    type Scalar;

    /// Sample `nn` columns from `Dirichlet(alpha)` by normalizing
    /// independent `Gamma(alpha[k], 1)` draws
    fn rdirichlet_columns<R: rand::Rng + ?Sized>(
        alpha: &Self::DVec,
        nn: usize,
        rng: &mut R,
    ) -> anyhow::Result<Self::Mat>;

    /// Sample `nn` columns from `N(mean, S S')` given a square root `S`
    fn rmvnorm_columns<R: rand::Rng + ?Sized>(
        mean: &Self::DVec,
        sqrt_cov: &Self::Mat,
        nn: usize,
        rng: &mut R,
    ) -> Self::Mat;
}

/// Read and write matrices from and to delimited text files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}
