/// Randomized-response noise model for one-hot bucket reports.
///
/// Each client flips every bucket bit independently with probability
/// `p = 1 / (1 + e^epsilon)`. Given the number of reports and the noisy sum
/// of a bucket, the unbiased estimate of the true count is
/// `(noisy_sum - total_count * p) / (1 - 2p)`.
///
/// Estimates are never clamped: noise can legitimately push them below zero,
/// and callers decide whether to clamp for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    epsilon: f64,
    flip_probability: f64,
}

impl NoiseModel {
    /// `epsilon = f64::INFINITY` gives `p = 0`, i.e. identity debiasing.
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            flip_probability: flip_probability(epsilon),
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn flip_probability(&self) -> f64 {
        self.flip_probability
    }

    /// Debiased estimate of one bucket. Not finite when `1 - 2p` is zero,
    /// which only happens for `epsilon = 0`.
    pub fn debias(&self, total_count: f64, noisy_sum: f64) -> f64 {
        let p = self.flip_probability;
        (noisy_sum - total_count * p) / (1.0 - 2.0 * p)
    }

    /// Element-wise [`NoiseModel::debias`] of a bucket-sum vector, multiplied
    /// by `scale`.
    pub fn debias_all(
        &self,
        total_count: i64,
        bucket_sums: &[i64],
        scale: f64,
    ) -> Vec<f64> {
        bucket_sums
            .iter()
            .map(|&sum| self.debias(total_count as f64, sum as f64) * scale)
            .collect()
    }

    /// Standard deviation of a single debiased bucket over `total_count`
    /// reports.
    pub fn std_dev(&self, total_count: f64) -> f64 {
        let p = self.flip_probability;
        total_count.sqrt() * (p * (1.0 - p)).sqrt()
    }
}

/// `p = 1 / (1 + e^epsilon)`.
pub fn flip_probability(epsilon: f64) -> f64 {
    1.0 / (1.0 + epsilon.exp())
}
