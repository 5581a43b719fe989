//! High / medium / low bucketing of stored scores.
//!
//! Buckets are derived on read and never persisted.

use crate::config::DistributionThresholds;
use crate::domain::ScoreDistribution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    High,
    Medium,
    Low,
}

/// Cut points resolved against a concrete set of scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cuts {
    /// Scores strictly above this are high.
    pub high_above: f64,
    /// Scores strictly below this are low.
    pub low_below: f64,
}

impl Cuts {
    pub fn band(&self, score: f64) -> Band {
        if score > self.high_above {
            Band::High
        } else if score < self.low_below {
            Band::Low
        } else {
            Band::Medium
        }
    }
}

/// Resolve thresholds against `scores`. Terciles over a degenerate range put
/// everything in medium.
pub fn resolve_cuts(scores: &[f64], thresholds: &DistributionThresholds) -> Cuts {
    match thresholds {
        DistributionThresholds::Fixed { high, low } => Cuts {
            high_above: *high,
            low_below: *low,
        },
        DistributionThresholds::Terciles => {
            let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if !min.is_finite() || !max.is_finite() || (max - min).abs() < f64::EPSILON {
                return Cuts {
                    high_above: f64::INFINITY,
                    low_below: f64::NEG_INFINITY,
                };
            }
            let width = (max - min) / 3.0;
            Cuts {
                high_above: max - width,
                low_below: min + width,
            }
        }
    }
}

/// Count scores per band and average them. Empty input yields zeros.
pub fn bucket_scores(scores: &[f64], thresholds: &DistributionThresholds) -> ScoreDistribution {
    if scores.is_empty() {
        return ScoreDistribution::default();
    }
    let cuts = resolve_cuts(scores, thresholds);
    let mut dist = ScoreDistribution {
        total: scores.len(),
        ..Default::default()
    };
    for score in scores {
        match cuts.band(*score) {
            Band::High => dist.high += 1,
            Band::Medium => dist.medium += 1,
            Band::Low => dist.low += 1,
        }
    }
    dist.average = scores.iter().sum::<f64>() / scores.len() as f64;
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terciles_one_per_bucket() {
        let dist = bucket_scores(&[10.0, 50.0, 90.0], &DistributionThresholds::Terciles);
        assert_eq!((dist.high, dist.medium, dist.low), (1, 1, 1));
        assert_eq!(dist.average, 50.0);
        assert_eq!(dist.total, 3);
    }

    #[test]
    fn test_fixed_thresholds() {
        let thresholds = DistributionThresholds::Fixed { high: 200.0, low: 100.0 };
        let dist = bucket_scores(&[50.0, 100.0, 200.0, 201.0, 999.0], &thresholds);
        assert_eq!(dist.low, 1);
        assert_eq!(dist.medium, 2);
        assert_eq!(dist.high, 2);
    }

    #[test]
    fn test_equal_scores_land_in_medium() {
        let dist = bucket_scores(&[42.0, 42.0, 42.0], &DistributionThresholds::Terciles);
        assert_eq!((dist.high, dist.medium, dist.low), (0, 3, 0));
    }

    #[test]
    fn test_empty_is_zeroed() {
        let dist = bucket_scores(&[], &DistributionThresholds::Terciles);
        assert_eq!(dist, ScoreDistribution::default());
    }
}
