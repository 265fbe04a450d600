/// A block of natural parameters of a conjugate exponential-family
/// distribution.
///
/// Natural parameters of the posterior are the prior's plus the
/// observed sufficient statistics, so every learning step we need is
/// expressible with these few operations.
pub trait NaturalParam: Clone {
    /// `self += factor * other`
    ///
    /// Panics if the two blocks do not share the same shape.
    fn add_scaled(&mut self, other: &Self, factor: f64);

    /// `self *= factor`
    fn scale(&mut self, factor: f64);

    /// Largest element-wise change `|a - b| / max(|b|, 1)` against a
    /// previous value of the same block.
    fn max_relative_change(&self, previous: &Self) -> f64;

    /// `KL(self || prior)` treating `self` as the variational
    /// posterior.
    fn kl_divergence(&self, prior: &Self) -> anyhow::Result<f64>;

    /// `base + factor * (self - base)`
    fn fade_towards(&mut self, base: &Self, factor: f64) {
        self.add_scaled(base, -1.0);
        self.scale(factor);
        self.add_scaled(base, 1.0);
    }
}

#[inline]
pub(crate) fn relative_change(current: f64, previous: f64) -> f64 {
    (current - previous).abs() / previous.abs().max(1.0)
}
