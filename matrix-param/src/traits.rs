pub trait Inference {
    type Mat;
    type DVec;

    fn posterior_mean(&self) -> &Self::DVec;
    fn posterior_cov(&self) -> &Self::Mat;
    fn posterior_log_mean(&self) -> &Self::DVec;
}

/// A conjugate parameter vector with one type of sufficient
/// statistic on top of the hyper parameter `a0`
pub trait ConjugateParam {
    type DVec;

    /// `a <- a + add`
    fn add_stat(&mut self, add: &Self::DVec);
    /// `a <- a0 + update`
    fn update_stat(&mut self, update: &Self::DVec);
    /// `a <- a0`
    fn reset_stat(&mut self);

    fn calibrate(&mut self);
    fn map_calibrate_mean(&mut self);
    fn map_calibrate_cov(&mut self);
    fn map_calibrate_log_mean(&mut self);
}
