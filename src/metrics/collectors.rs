//! Recording helpers over the raw Prometheus metrics.

use super::prometheus::{ACTIVE_TRIALS, GRADER_SCORE, TRIALS_TOTAL, TRIAL_DURATION, TRIAL_REWARD};

/// Metrics collector for trial execution.
///
/// Every method is a no-op until `init_metrics()` has been called.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Marks a trial as started.
    pub fn trial_started(&self) {
        if let Some(active) = ACTIVE_TRIALS.get() {
            active.inc();
        }
    }

    /// Records a finished trial.
    ///
    /// `outcome` is `completed` or the failure classification
    /// (`setup_failure`, `agent_timeout`, `agent_error`, `grading_error`).
    pub fn record_trial(
        &self,
        task: &str,
        provider: &str,
        outcome: &str,
        reward: f64,
        duration_secs: f64,
    ) {
        if let Some(active) = ACTIVE_TRIALS.get() {
            active.dec();
        }
        if let Some(total) = TRIALS_TOTAL.get() {
            total.with_label_values(&[task, provider, outcome]).inc();
        }
        if let Some(duration) = TRIAL_DURATION.get() {
            duration.with_label_values(&[provider]).observe(duration_secs);
        }
        if let Some(rewards) = TRIAL_REWARD.get() {
            rewards.with_label_values(&[task]).observe(reward);
        }

        tracing::trace!(task, provider, outcome, reward, duration_secs, "Recorded trial metric");
    }

    /// Records one grader score.
    pub fn record_grader(&self, kind: &str, score: f64) {
        if let Some(scores) = GRADER_SCORE.get() {
            scores.with_label_values(&[kind]).observe(score);
        }
    }
}
