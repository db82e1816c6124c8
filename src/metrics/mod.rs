//! Evaluation statistics and operational metrics.
//!
//! - [`stats`]: pass rate, pass@k and pass^k over trial rewards.
//! - [`analytics`]: Normalized Gain between a skill run and its baseline.
//! - [`prometheus`] / [`collectors`]: Prometheus counters and histograms for
//!   trial execution, recorded only after [`init_metrics`].
//!
//! # Example
//!
//! ```
//! use skill_forge::metrics::{normalized_gain, pass_at_k, pass_pow_k};
//!
//! assert_eq!(pass_at_k(5, 3, 5), 1.0);
//! assert!((pass_pow_k(5, 3, 5) - 0.07776).abs() < 1e-9);
//! assert_eq!(normalized_gain(0.75, 0.5), 0.5);
//! ```

pub mod analytics;
pub mod collectors;
pub mod prometheus;
pub mod stats;

pub use analytics::{compare_reports, normalized_gain, SkillComparison};
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};
pub use stats::{
    is_success, pass_at_k, pass_pow_k, pass_rate, success_count, AggregateMetrics,
    SUCCESS_THRESHOLD,
};
