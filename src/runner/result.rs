//! Trial results and evaluation reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrialError;
use crate::grader::GraderResult;
use crate::metrics::AggregateMetrics;
use crate::sandbox::ProviderKind;
use crate::session::SessionLogEntry;

/// Terminal state of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Agent finished within budget and every grader ran.
    Completed,
    /// Setup, agent execution or grading failed; reward forced to 0.
    Failed,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStatus::Completed => write!(f, "completed"),
            TrialStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// 1-based scheduling slot.
    pub trial_id: u32,
    pub status: TrialStatus,
    /// Weighted reward in `[0, 1]`.
    pub reward: f64,
    /// Grader results in declared order. Empty when grading never ran.
    pub grader_results: Vec<GraderResult>,
    /// Wall-clock time from setup start to cleanup end.
    pub duration_secs: f64,
    /// Number of commands the agent ran.
    pub command_count: usize,
    pub session_log: Vec<SessionLogEntry>,
    /// First failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrialResult {
    /// True if the reward counts as a success.
    pub fn is_success(&self) -> bool {
        crate::metrics::is_success(self.reward)
    }
}

/// Metric label for a trial outcome.
pub fn outcome_label(error: Option<&TrialError>) -> &'static str {
    match error {
        None => "completed",
        Some(TrialError::SetupFailure(_)) => "setup_failure",
        Some(TrialError::AgentTimeout(_)) => "agent_timeout",
        Some(TrialError::AgentExecution(_)) => "agent_error",
        Some(TrialError::Grading(_)) => "grading_error",
    }
}

/// Aggregated report of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub task: String,
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderKind,
    pub agent: String,
    pub num_trials: usize,
    pub parallel: usize,
    /// Mean reward.
    pub pass_rate: f64,
    pub successes: usize,
    pub k: usize,
    pub pass_at_k: f64,
    pub pass_pow_k: f64,
    /// Trials ordered by `trial_id`.
    pub trials: Vec<TrialResult>,
    /// Skill identifiers injected into every workspace.
    pub skills_used: Vec<String>,
}

/// Run-level fields of a report.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub task: String,
    pub provider: ProviderKind,
    pub agent: String,
    pub parallel: usize,
    pub k: Option<usize>,
    pub skills_used: Vec<String>,
}

impl EvalReport {
    /// Builds a report, sorting trials by id and computing the statistics.
    pub fn assemble(meta: ReportMeta, mut trials: Vec<TrialResult>) -> Self {
        trials.sort_by_key(|t| t.trial_id);
        let rewards: Vec<f64> = trials.iter().map(|t| t.reward).collect();
        let metrics = AggregateMetrics::compute(&rewards, meta.k);

        Self {
            task: meta.task,
            timestamp: Utc::now(),
            provider: meta.provider,
            agent: meta.agent,
            num_trials: trials.len(),
            parallel: meta.parallel,
            pass_rate: metrics.pass_rate,
            successes: metrics.successes,
            k: metrics.k,
            pass_at_k: metrics.pass_at_k,
            pass_pow_k: metrics.pass_pow_k,
            trials,
            skills_used: meta.skills_used,
        }
    }

    /// Number of trials that failed before or during grading.
    pub fn failed_trials(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) fn trial(id: u32, reward: f64) -> TrialResult {
        TrialResult {
            trial_id: id,
            status: TrialStatus::Completed,
            reward,
            grader_results: Vec::new(),
            duration_secs: 0.1,
            command_count: 0,
            session_log: Vec::new(),
            error: None,
        }
    }

    fn meta() -> ReportMeta {
        ReportMeta {
            task: "demo".into(),
            provider: ProviderKind::Local,
            agent: "oracle".into(),
            parallel: 2,
            k: None,
            skills_used: vec!["pdf".into()],
        }
    }

    #[test]
    fn test_assemble_sorts_and_aggregates() {
        let trials = vec![trial(3, 0.0), trial(1, 1.0), trial(2, 1.0)];
        let report = EvalReport::assemble(meta(), trials);

        let ids: Vec<u32> = report.trials.iter().map(|t| t.trial_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(report.num_trials, 3);
        assert_eq!(report.successes, 2);
        assert_eq!(report.k, 3);
        assert!((report.pass_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.pass_at_k, 1.0);
    }

    #[test]
    fn test_outcome_label() {
        assert_eq!(outcome_label(None), "completed");
        assert_eq!(
            outcome_label(Some(&TrialError::AgentTimeout(Duration::from_secs(1)))),
            "agent_timeout"
        );
    }

    #[test]
    fn test_report_json_shape() {
        let report = EvalReport::assemble(meta(), vec![trial(1, 1.0)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["provider"], "local");
        assert_eq!(json["trials"][0]["trial_id"], 1);
        assert_eq!(json["trials"][0]["status"], "completed");
        assert!(json["trials"][0].get("error").is_none());
    }
}
