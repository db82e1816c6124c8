//! Aggregate statistics over trial rewards.
//!
//! A trial counts as a success when its reward is at least
//! [`SUCCESS_THRESHOLD`]. With `n` trials and `c` successes:
//!
//! - `pass@k`: probability that at least one of `k` draws without replacement
//!   succeeds, `1 - C(n-c, k) / C(n, k)`, evaluated as a running product.
//! - `pass^k`: probability that all `k` independent attempts succeed, `(c/n)^k`.

use serde::{Deserialize, Serialize};

/// Minimum reward for a trial to count as a success.
pub const SUCCESS_THRESHOLD: f64 = 0.5;

/// Returns true if the reward counts as a success.
pub fn is_success(reward: f64) -> bool {
    reward >= SUCCESS_THRESHOLD
}

/// Mean reward. Zero for no trials.
pub fn pass_rate(rewards: &[f64]) -> f64 {
    if rewards.is_empty() {
        return 0.0;
    }
    rewards.iter().sum::<f64>() / rewards.len() as f64
}

/// Number of successes among the rewards.
pub fn success_count(rewards: &[f64]) -> usize {
    rewards.iter().filter(|r| is_success(**r)).count()
}

/// Unbiased pass@k estimator.
///
/// Zero when there are no trials or no successes. One when fewer than `k`
/// failures exist, since every `k`-draw must then include a success.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> f64 {
    if n == 0 || c == 0 || k == 0 {
        return 0.0;
    }
    let c = c.min(n);
    if n - c < k {
        return 1.0;
    }

    let mut all_fail = 1.0;
    for i in 0..k {
        all_fail *= (n - c - i) as f64 / (n - i) as f64;
    }
    1.0 - all_fail
}

/// pass^k under independence: `(c/n)^k`.
pub fn pass_pow_k(n: usize, c: usize, k: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = c.min(n) as f64 / n as f64;
    p.powi(k as i32)
}

/// Statistics for one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub pass_rate: f64,
    pub successes: usize,
    pub k: usize,
    pub pass_at_k: f64,
    pub pass_pow_k: f64,
}

impl AggregateMetrics {
    /// Computes every statistic over the rewards.
    ///
    /// `k` defaults to the number of trials and is clamped to `1..=n`.
    pub fn compute(rewards: &[f64], k: Option<usize>) -> Self {
        let n = rewards.len();
        let c = success_count(rewards);
        let k = k.unwrap_or(n).clamp(1, n.max(1));
        Self {
            pass_rate: pass_rate(rewards),
            successes: c,
            k,
            pass_at_k: pass_at_k(n, c, k),
            pass_pow_k: pass_pow_k(n, c, k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rate() {
        assert_eq!(pass_rate(&[]), 0.0);
        assert!((pass_rate(&[1.0, 0.0, 0.5, 0.5]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_success_threshold() {
        assert_eq!(success_count(&[0.5, 0.49, 1.0, 0.0]), 2);
    }

    #[test]
    fn test_pass_at_k_when_failures_fewer_than_k() {
        // n=5, c=3, k=5: only 2 failures, every 5-draw contains a success.
        assert_eq!(pass_at_k(5, 3, 5), 1.0);
    }

    #[test]
    fn test_pass_at_k_product() {
        // n=5, c=1, k=2: 1 - (4/5)(3/4) = 0.4
        assert!((pass_at_k(5, 1, 2) - 0.4).abs() < 1e-12);
        // k=1 equals the success fraction.
        assert!((pass_at_k(10, 3, 1) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_pass_at_k_edge_cases() {
        assert_eq!(pass_at_k(0, 0, 1), 0.0);
        assert_eq!(pass_at_k(5, 0, 5), 0.0);
        assert_eq!(pass_at_k(5, 5, 1), 1.0);
    }

    #[test]
    fn test_pass_pow_k() {
        // (3/5)^5 = 0.07776
        assert!((pass_pow_k(5, 3, 5) - 0.07776).abs() < 1e-9);
        assert_eq!(pass_pow_k(0, 0, 3), 0.0);
        assert_eq!(pass_pow_k(4, 4, 10), 1.0);
    }

    #[test]
    fn test_aggregate_five_trials_three_successes() {
        let metrics = AggregateMetrics::compute(&[1.0, 1.0, 0.5, 0.0, 0.2], None);
        assert_eq!(metrics.successes, 3);
        assert_eq!(metrics.k, 5);
        assert_eq!(metrics.pass_at_k, 1.0);
        assert!((metrics.pass_pow_k - 0.0778).abs() < 1e-4);
        assert!((metrics.pass_rate - 0.54).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_clamps_k() {
        assert_eq!(AggregateMetrics::compute(&[1.0, 0.0], Some(10)).k, 2);
        assert_eq!(AggregateMetrics::compute(&[], None).k, 1);
    }

    #[test]
    fn test_monotonic_in_successes() {
        for c in 0..5 {
            assert!(pass_at_k(5, c, 3) <= pass_at_k(5, c + 1, 3));
            assert!(pass_pow_k(5, c, 3) <= pass_pow_k(5, c + 1, 3));
        }
    }
}
