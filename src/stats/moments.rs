//! Running central moments (Pébay's one-pass update).

use serde::Serialize;

/// Count, extrema and the first four central moments of a stream.
///
/// Memory is constant; skewness and kurtosis come from the accumulated
/// moments without retaining raw values.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamingMoments {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
    m3: f64,
    m4: f64,
}

impl StreamingMoments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64) {
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }

        let n1 = self.count as f64;
        self.count += 1;
        let n = self.count as f64;
        let delta = x - self.mean;
        let delta_n = delta / n;
        let delta_n2 = delta_n * delta_n;
        let term1 = delta * delta_n * n1;

        self.mean += delta_n;
        self.m4 += term1 * delta_n2 * (n * n - 3.0 * n + 3.0) + 6.0 * delta_n2 * self.m2
            - 4.0 * delta_n * self.m3;
        self.m3 += term1 * delta_n * (n - 2.0) - 3.0 * delta_n * self.m2;
        self.m2 += term1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance (n − 1 denominator).
    pub fn variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / (self.count as f64 - 1.0))
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Adjusted Fisher–Pearson skewness G1.
    pub fn skewness(&self) -> Option<f64> {
        if self.count < 3 || self.m2 <= 0.0 {
            return None;
        }
        let n = self.count as f64;
        let g1 = n.sqrt() * self.m3 / self.m2.powf(1.5);
        Some(g1 * (n * (n - 1.0)).sqrt() / (n - 2.0))
    }

    /// Bias-corrected excess kurtosis G2.
    pub fn kurtosis(&self) -> Option<f64> {
        if self.count < 4 || self.m2 <= 0.0 {
            return None;
        }
        let n = self.count as f64;
        let g2 = n * self.m4 / (self.m2 * self.m2) - 3.0;
        Some(((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn one_to_five() {
        let mut m = StreamingMoments::new();
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            m.add(x);
        }
        assert_eq!(m.count(), 5);
        assert_eq!(m.min(), Some(1.0));
        assert_eq!(m.max(), Some(5.0));
        assert!(close(m.mean().unwrap(), 3.0));
        assert!(close(m.std_dev().unwrap(), 1.5811));
        assert!(close(m.skewness().unwrap(), 0.0));
        assert!(close(m.kurtosis().unwrap(), -1.2));
    }

    #[test]
    fn small_samples_leave_higher_moments_absent() {
        let mut m = StreamingMoments::new();
        assert_eq!(m.mean(), None);
        m.add(4.0);
        assert_eq!(m.std_dev(), None);
        m.add(6.0);
        assert!(close(m.std_dev().unwrap(), 2f64.sqrt()));
        assert_eq!(m.skewness(), None);
        m.add(8.0);
        assert!(m.skewness().is_some());
        assert_eq!(m.kurtosis(), None);
    }

    #[test]
    fn skew_sign_follows_tail() {
        let mut m = StreamingMoments::new();
        for x in [1.0, 1.0, 1.0, 2.0, 10.0] {
            m.add(x);
        }
        assert!(m.skewness().unwrap() > 0.0);
    }

    #[test]
    fn constant_stream_has_no_shape() {
        let mut m = StreamingMoments::new();
        for _ in 0..10 {
            m.add(7.0);
        }
        assert_eq!(m.variance(), Some(0.0));
        assert_eq!(m.skewness(), None);
        assert_eq!(m.kurtosis(), None);
    }
}
