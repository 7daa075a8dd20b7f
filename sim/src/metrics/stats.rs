//! Distribution summaries over windowed samples

use serde::{Deserialize, Serialize};

/// Summary of one sample distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Summarize `samples`, or `None` if there are none
    ///
    /// Non-finite samples are ignored. Percentiles use the nearest-rank
    /// method, so every reported value is an observed sample.
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut sorted: Vec<f64> = samples.into_iter().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            p50: nearest_rank(&sorted, 50.0),
            p90: nearest_rank(&sorted, 90.0),
            p99: nearest_rank(&sorted, 99.0),
        })
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_samples() {
        assert!(Percentiles::from_samples(Vec::new()).is_none());
        assert!(Percentiles::from_samples(vec![f64::NAN]).is_none());
    }

    #[test]
    fn test_single_sample() {
        let p = Percentiles::from_samples(vec![7.0]).unwrap();
        assert_eq!(p.count, 1);
        assert_eq!(p.min, 7.0);
        assert_eq!(p.p50, 7.0);
        assert_eq!(p.p99, 7.0);
    }

    #[test]
    fn test_one_to_hundred() {
        let p = Percentiles::from_samples((1..=100).rev().map(f64::from)).unwrap();
        assert_eq!(p.count, 100);
        assert_eq!(p.min, 1.0);
        assert_eq!(p.max, 100.0);
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p90, 90.0);
        assert_eq!(p.p99, 99.0);
        assert!((p.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_rank_small() {
        let sorted = [10.0, 20.0, 30.0];
        assert_eq!(nearest_rank(&sorted, 0.0), 10.0);
        assert_eq!(nearest_rank(&sorted, 50.0), 20.0);
        assert_eq!(nearest_rank(&sorted, 99.0), 30.0);
        assert_eq!(nearest_rank(&sorted, 100.0), 30.0);
    }
}
