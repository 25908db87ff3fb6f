//! Merging t-digest for approximate quantiles in bounded memory.

use serde::Serialize;

pub const DEFAULT_COMPRESSION: f64 = 100.0;
pub const DEFAULT_BUFFER: usize = 500;

/// A cluster of values summarized by mean and weight.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Centroid {
    pub mean: f64,
    pub weight: u64,
}

impl Centroid {
    fn absorb(&mut self, other: &Centroid) {
        let weight = self.weight + other.weight;
        self.mean += (other.mean - self.mean) * other.weight as f64 / weight as f64;
        self.weight = weight;
    }
}

/// Centroids sorted by mean plus an insertion buffer.
///
/// Centroid weights plus the buffered value count always equal the number of
/// values added.
#[derive(Clone, Debug)]
pub struct TDigest {
    compression: f64,
    buffer_cap: usize,
    centroids: Vec<Centroid>,
    buffer: Vec<f64>,
    count: u64,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION, DEFAULT_BUFFER)
    }
}

impl TDigest {
    pub fn new(compression: f64, buffer_cap: usize) -> Self {
        Self {
            compression: compression.max(1.0),
            buffer_cap: buffer_cap.max(1),
            centroids: Vec::new(),
            buffer: Vec::with_capacity(buffer_cap.max(1)),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_cap {
            self.flush();
        }
    }

    /// Merge the buffer into the centroid list and recompress.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.buffer.sort_by(f64::total_cmp);
        let mut incoming = self.buffer.drain(..).map(|mean| Centroid { mean, weight: 1 });
        let existing = std::mem::take(&mut self.centroids);

        // merge-sort buffered points with existing centroids
        let mut merged = Vec::with_capacity(existing.len() + self.buffer_cap);
        let mut next_new = incoming.next();
        for c in existing {
            while let Some(n) = next_new.take() {
                if n.mean < c.mean {
                    merged.push(n);
                    next_new = incoming.next();
                } else {
                    next_new = Some(n);
                    break;
                }
            }
            merged.push(c);
        }
        merged.extend(next_new);
        merged.extend(incoming);

        self.centroids = compress(merged, self.compression);
    }

    /// Total weight held in centroids (excludes the unflushed buffer).
    pub fn total_weight(&self) -> u64 {
        self.centroids.iter().map(|c| c.weight).sum()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    /// Estimated value at quantile `q` in `[0, 1]`; `None` when empty.
    ///
    /// Requires a flushed digest; an unflushed one is queried through a
    /// flushed copy.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if !self.buffer.is_empty() {
            let mut flushed = self.clone();
            flushed.flush();
            return flushed.quantile(q);
        }
        let q = q.clamp(0.0, 1.0);
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }

        // piecewise linear through (0, min), each centroid midpoint, (count, max)
        let target = q * self.count as f64;
        let mut prev_rank = 0.0;
        let mut prev_mean = self.min;
        let mut cumulative = 0.0;
        for c in &self.centroids {
            let mid = cumulative + c.weight as f64 / 2.0;
            if target < mid {
                let span = mid - prev_rank;
                if span <= 0.0 {
                    return Some(prev_mean);
                }
                return Some(prev_mean + (target - prev_rank) / span * (c.mean - prev_mean));
            }
            cumulative += c.weight as f64;
            prev_rank = mid;
            prev_mean = c.mean;
        }
        let span = self.count as f64 - prev_rank;
        if span <= 0.0 {
            return Some(self.max);
        }
        Some(prev_mean + (target - prev_rank) / span * (self.max - prev_mean))
    }
}

/// One left-to-right scan: fold a centroid into its predecessor while the
/// merged weight stays within `4·N·q·(1−q)/C`, `N` being the total weight.
/// Keeps the centroid count near `C·ln N` rather than growing with `N`.
fn compress(sorted: Vec<Centroid>, compression: f64) -> Vec<Centroid> {
    let total: u64 = sorted.iter().map(|c| c.weight).sum();
    if total == 0 {
        return Vec::new();
    }
    let total = total as f64;
    let mut out: Vec<Centroid> = Vec::with_capacity(sorted.len());
    let mut before = 0.0;
    for c in sorted {
        if let Some(last) = out.last_mut() {
            let proposed = (last.weight + c.weight) as f64;
            let q = (before + proposed / 2.0) / total;
            let limit = 4.0 * total * q * (1.0 - q) / compression;
            if proposed <= limit {
                last.absorb(&c);
                continue;
            }
            before += last.weight as f64;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_account_for_every_value() {
        let mut d = TDigest::new(100.0, 64);
        for i in 0..10_000 {
            d.add((i % 977) as f64 * 0.5);
            assert_eq!(d.total_weight() + d.buffered() as u64, d.count());
        }
        d.flush();
        assert_eq!(d.total_weight(), 10_000);
        assert_eq!(d.buffered(), 0);
        assert!(d.centroids().len() < 10_000 / 4);
    }

    #[test]
    fn centroid_count_is_bounded_by_compression() {
        let mut d = TDigest::default();
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        for _ in 0..1_000_000 {
            // xorshift keeps the input unordered
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            d.add((state >> 11) as f64 / (1u64 << 53) as f64);
        }
        d.flush();
        assert_eq!(d.total_weight(), 1_000_000);
        assert!(
            d.centroids().len() < 10 * DEFAULT_COMPRESSION as usize,
            "{} centroids",
            d.centroids().len()
        );
        let p50 = d.quantile(0.5).unwrap();
        assert!((p50 - 0.5).abs() < 0.01, "p50 = {p50}");
        let p99 = d.quantile(0.99).unwrap();
        assert!((p99 - 0.99).abs() < 0.005, "p99 = {p99}");
    }

    #[test]
    fn uniform_median() {
        let mut d = TDigest::default();
        for i in 1..=1000 {
            d.add(i as f64);
        }
        let p50 = d.quantile(0.5).unwrap();
        assert!((p50 - 500.0).abs() < 10.0, "p50 = {p50}");
        let p90 = d.quantile(0.9).unwrap();
        assert!((p90 - 900.0).abs() < 15.0, "p90 = {p90}");
        assert_eq!(d.quantile(0.0), Some(1.0));
        assert_eq!(d.quantile(1.0), Some(1000.0));
    }

    #[test]
    fn centroids_stay_sorted() {
        let mut d = TDigest::new(50.0, 100);
        for i in 0..5_000u64 {
            d.add(((i * 7919) % 5_000) as f64);
        }
        d.flush();
        assert!(d.centroids().windows(2).all(|w| w[0].mean <= w[1].mean));
    }

    #[test]
    fn empty_and_single() {
        let mut d = TDigest::default();
        assert_eq!(d.quantile(0.5), None);
        d.add(f64::NAN);
        assert_eq!(d.count(), 0);
        d.add(3.0);
        assert_eq!(d.quantile(0.5), Some(3.0));
    }
}
