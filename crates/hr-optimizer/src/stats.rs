//! Block-respecting rank statistics used to eliminate racing candidates.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use hr_types::ObjectiveDirection;

/// Inverse of the standard normal CDF (Acklam's approximation, ~1.15e-9).
#[allow(clippy::excessive_precision)]
pub fn inverse_normal_cdf(p: f64) -> f64 {
    let p = p.clamp(1e-15, 1.0 - 1e-15);

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Upper `p` quantile of the chi-squared distribution with `df` degrees of freedom.
///
/// One degree of freedom is exact through the normal quantile; larger values
/// use the Wilson–Hilferty cube approximation.
pub fn chi_squared_quantile(p: f64, df: usize) -> f64 {
    if df == 0 {
        return 0.0;
    }
    if df == 1 {
        let z = inverse_normal_cdf(0.5 + p / 2.0);
        return z * z;
    }
    let k = df as f64;
    let z = inverse_normal_cdf(p);
    let h = 2.0 / (9.0 * k);
    k * (1.0 - h + z * h.sqrt()).powi(3)
}

/// Ranks of one block, 1 for the best. Ties share their average rank and
/// failed runs (`None`) rank after every successful one.
pub fn block_ranks(scores: &[Option<f64>], direction: ObjectiveDirection) -> Vec<f64> {
    let order = |a: &Option<f64>, b: &Option<f64>| match (a, b) {
        (Some(x), Some(y)) => direction.compare(*x, *y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| order(&scores[a], &scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < indices.len() {
        let mut end = start + 1;
        while end < indices.len()
            && order(&scores[indices[start]], &scores[indices[end]]) == Ordering::Equal
        {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let average = (start + 1 + end) as f64 / 2.0;
        for &i in &indices[start..end] {
            ranks[i] = average;
        }
        start = end;
    }
    ranks
}

/// Result of one Friedman test over `n` blocks and `k` candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriedmanOutcome {
    pub statistic: f64,
    pub critical: f64,
    pub significant: bool,
    pub rank_sums: Vec<f64>,
    /// Column with the lowest rank sum; earliest column on ties.
    pub leader: usize,
    /// Columns whose rank sum is significantly worse than the leader's,
    /// worst first.
    pub eliminated: Vec<usize>,
}

/// Friedman rank test with instances as blocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FriedmanTest {
    pub significance: f64,
}

impl Default for FriedmanTest {
    fn default() -> Self {
        Self { significance: 0.05 }
    }
}

impl FriedmanTest {
    pub fn new(significance: f64) -> Self {
        Self { significance }
    }

    /// Rank sum of every column over the given blocks.
    pub fn rank_sums(blocks: &[Vec<Option<f64>>], direction: ObjectiveDirection) -> Vec<f64> {
        let k = blocks.first().map_or(0, Vec::len);
        let mut sums = vec![0.0; k];
        for block in blocks {
            for (sum, rank) in sums.iter_mut().zip(block_ranks(block, direction)) {
                *sum += rank;
            }
        }
        sums
    }

    /// Run the test. Returns `None` with fewer than two columns or no blocks.
    pub fn run(&self, blocks: &[Vec<Option<f64>>], direction: ObjectiveDirection) -> Option<FriedmanOutcome> {
        let n = blocks.len();
        let k = blocks.first().map_or(0, Vec::len);
        if n == 0 || k < 2 || blocks.iter().any(|b| b.len() != k) {
            return None;
        }

        let mut rank_sums = vec![0.0; k];
        let mut squared = 0.0;
        for block in blocks {
            for (j, rank) in block_ranks(block, direction).into_iter().enumerate() {
                rank_sums[j] += rank;
                squared += rank * rank;
            }
        }

        let (nf, kf) = (n as f64, k as f64);
        let expected = nf * kf * (kf + 1.0).powi(2) / 4.0;
        let spread: f64 = rank_sums.iter().map(|r| r * r).sum::<f64>() - nf * expected;
        let denominator = squared - expected;
        // Every block fully tied.
        let statistic = if denominator <= f64::EPSILON {
            0.0
        } else {
            (kf - 1.0) * spread / denominator
        };

        let critical = chi_squared_quantile(1.0 - self.significance, k - 1);
        let significant = statistic > critical;

        let leader = rank_sums
            .iter()
            .enumerate()
            .fold(0, |best, (j, r)| if *r < rank_sums[best] { j } else { best });

        let mut eliminated = Vec::new();
        if significant {
            let margin = inverse_normal_cdf(1.0 - self.significance)
                * (nf * kf * (kf + 1.0) / 6.0).sqrt();
            eliminated = (0..k)
                .filter(|&j| rank_sums[j] - rank_sums[leader] > margin)
                .collect();
            eliminated.sort_by(|&a, &b| {
                rank_sums[b]
                    .partial_cmp(&rank_sums[a])
                    .unwrap_or(Ordering::Equal)
                    .then(b.cmp(&a))
            });
        }

        Some(FriedmanOutcome {
            statistic,
            critical,
            significant,
            rank_sums,
            leader,
            eliminated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn normal_quantiles() {
        assert!(close(inverse_normal_cdf(0.5), 0.0, 1e-9));
        assert!(close(inverse_normal_cdf(0.975), 1.959_964, 1e-5));
        assert!(close(inverse_normal_cdf(0.05), -1.644_854, 1e-5));
    }

    #[test]
    fn chi_squared_quantiles() {
        assert!(close(chi_squared_quantile(0.95, 1), 3.841, 1e-3));
        assert!(close(chi_squared_quantile(0.95, 3), 7.815, 0.05));
        assert!(close(chi_squared_quantile(0.95, 10), 18.307, 0.05));
    }

    #[test]
    fn ties_share_average_rank_and_failures_rank_last() {
        let ranks = block_ranks(
            &[Some(3.0), None, Some(1.0), Some(3.0)],
            ObjectiveDirection::Minimize,
        );
        assert_eq!(ranks, vec![2.5, 4.0, 1.0, 2.5]);

        let ranks = block_ranks(&[Some(3.0), Some(1.0)], ObjectiveDirection::Maximize);
        assert_eq!(ranks, vec![1.0, 2.0]);
    }

    #[test]
    fn consistent_ordering_is_significant() {
        let blocks: Vec<Vec<Option<f64>>> = (0..5)
            .map(|_| vec![Some(1.0), Some(10.0), Some(11.0), Some(12.0)])
            .collect();
        let outcome = FriedmanTest::default()
            .run(&blocks, ObjectiveDirection::Minimize)
            .unwrap();
        assert_eq!(outcome.rank_sums, vec![5.0, 10.0, 15.0, 20.0]);
        assert!(close(outcome.statistic, 15.0, 1e-9));
        assert!(outcome.significant);
        assert_eq!(outcome.leader, 0);
        assert_eq!(outcome.eliminated, vec![3, 2]);
    }

    #[test]
    fn identical_scores_are_not_significant() {
        let blocks: Vec<Vec<Option<f64>>> = (0..6).map(|_| vec![Some(2.0); 3]).collect();
        let outcome = FriedmanTest::default()
            .run(&blocks, ObjectiveDirection::Minimize)
            .unwrap();
        assert_eq!(outcome.statistic, 0.0);
        assert!(!outcome.significant);
        assert!(outcome.eliminated.is_empty());
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        let test = FriedmanTest::default();
        assert!(test.run(&[], ObjectiveDirection::Minimize).is_none());
        assert!(test
            .run(&[vec![Some(1.0)]], ObjectiveDirection::Minimize)
            .is_none());
    }
}
