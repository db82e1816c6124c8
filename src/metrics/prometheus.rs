//! Prometheus metrics registration and export.
//!
//! Metrics live in `OnceLock` statics and stay unset until [`init_metrics`]
//! runs, so recording through [`super::MetricsCollector`] is a no-op in
//! library use and in tests.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all skill-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total trials finished, labeled by task, provider and outcome.
pub static TRIALS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Trial wall-clock duration in seconds, labeled by provider.
pub static TRIAL_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Trial reward distribution, labeled by task.
pub static TRIAL_REWARD: OnceLock<HistogramVec> = OnceLock::new();

/// Grader score distribution, labeled by grader kind.
pub static GRADER_SCORE: OnceLock<HistogramVec> = OnceLock::new();

/// Trials currently in flight.
pub static ACTIVE_TRIALS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it more than once keeps the first set of metrics.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();
    let unit_buckets = vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

    let trials_total = CounterVec::new(
        Opts::new("skill_forge_trials_total", "Total number of trials finished"),
        &["task", "provider", "outcome"],
    )?;

    let trial_duration = HistogramVec::new(
        HistogramOpts::new(
            "skill_forge_trial_duration_seconds",
            "Trial duration from setup to cleanup in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["provider"],
    )?;

    let trial_reward = HistogramVec::new(
        HistogramOpts::new("skill_forge_trial_reward", "Distribution of trial rewards")
            .buckets(unit_buckets.clone()),
        &["task"],
    )?;

    let grader_score = HistogramVec::new(
        HistogramOpts::new("skill_forge_grader_score", "Distribution of grader scores")
            .buckets(unit_buckets),
        &["kind"],
    )?;

    let active_trials = Gauge::new("skill_forge_active_trials", "Number of trials in flight")?;

    registry.register(Box::new(trials_total.clone()))?;
    registry.register(Box::new(trial_duration.clone()))?;
    registry.register(Box::new(trial_reward.clone()))?;
    registry.register(Box::new(grader_score.clone()))?;
    registry.register(Box::new(active_trials.clone()))?;

    // Losing a race with a concurrent init is fine: the winner's metrics stay.
    let _ = REGISTRY.set(registry);
    let _ = TRIALS_TOTAL.set(trials_total);
    let _ = TRIAL_DURATION.set(trial_duration);
    let _ = TRIAL_REWARD.set(trial_reward);
    let _ = GRADER_SCORE.set(grader_score);
    let _ = ACTIVE_TRIALS.set(active_trials);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        if let Some(counter) = TRIALS_TOTAL.get() {
            counter
                .with_label_values(&["demo", "local", "completed"])
                .inc();
        }
        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("skill_forge_trials_total"));
    }
}
