//! Skill impact analytics.
//!
//! Compares a run with skills against a baseline run without them using
//! Normalized Gain: the share of the baseline's headroom that the skill closed.

use serde::{Deserialize, Serialize};

use crate::runner::EvalReport;

/// Normalized Gain of `p_with` over `p_without`.
///
/// `(p_with - p_without) / (1 - p_without)`. A perfect baseline cannot be
/// improved upon: the gain is 0 if the skill run is also perfect and -1 for
/// any regression from it.
pub fn normalized_gain(p_with: f64, p_without: f64) -> f64 {
    if p_without >= 1.0 {
        return if p_with >= 1.0 { 0.0 } else { -1.0 };
    }
    (p_with - p_without) / (1.0 - p_without)
}

/// Pass rates of a paired run and the resulting gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillComparison {
    pub task: String,
    pub skills: Vec<String>,
    pub pass_rate_with: f64,
    pub pass_rate_without: f64,
    pub normalized_gain: f64,
}

/// Compares a run with skills against a baseline run.
pub fn compare_reports(with_skills: &EvalReport, without_skills: &EvalReport) -> SkillComparison {
    if with_skills.task != without_skills.task {
        tracing::warn!(
            with = %with_skills.task,
            without = %without_skills.task,
            "Comparing reports from different tasks"
        );
    }

    SkillComparison {
        task: with_skills.task.clone(),
        skills: with_skills.skills_used.clone(),
        pass_rate_with: with_skills.pass_rate,
        pass_rate_without: without_skills.pass_rate,
        normalized_gain: normalized_gain(with_skills.pass_rate, without_skills.pass_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_normalized_gain_values() {
        assert!(approx(normalized_gain(1.0, 0.5), 1.0));
        assert!(approx(normalized_gain(0.75, 0.5), 0.5));
        assert!(approx(normalized_gain(0.5, 0.5), 0.0));
        assert!(approx(normalized_gain(0.25, 0.5), -0.5));
    }

    #[test]
    fn test_normalized_gain_perfect_baseline() {
        assert_eq!(normalized_gain(1.0, 1.0), 0.0);
        assert_eq!(normalized_gain(0.5, 1.0), -1.0);
    }

    #[test]
    fn test_zero_baseline() {
        assert!(approx(normalized_gain(0.4, 0.0), 0.4));
    }
}
