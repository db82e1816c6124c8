//! Report statistics and skill comparison over persisted reports.

use tempfile::TempDir;

use skill_forge::metrics::{compare_reports, normalized_gain, pass_at_k, pass_pow_k};
use skill_forge::report::{load_report, persist_report};
use skill_forge::runner::{EvalReport, ReportMeta, TrialResult, TrialStatus};
use skill_forge::sandbox::ProviderKind;

fn trial(trial_id: u32, reward: f64) -> TrialResult {
    TrialResult {
        trial_id,
        status: TrialStatus::Completed,
        reward,
        grader_results: vec![],
        duration_secs: 1.0,
        command_count: 0,
        session_log: vec![],
        error: None,
    }
}

fn report(rewards: &[f64], skills: &[&str]) -> EvalReport {
    let meta = ReportMeta {
        task: "csv-cleanup".to_string(),
        provider: ProviderKind::Local,
        agent: "command".to_string(),
        parallel: 2,
        k: None,
        skills_used: skills.iter().map(|s| s.to_string()).collect(),
    };
    // Out of order on purpose.
    let trials = rewards
        .iter()
        .enumerate()
        .rev()
        .map(|(i, r)| trial(i as u32 + 1, *r))
        .collect();
    EvalReport::assemble(meta, trials)
}

#[test]
fn test_report_statistics() {
    let report = report(&[1.0, 0.0, 1.0, 0.4, 1.0], &["csv"]);

    assert_eq!(
        report.trials.iter().map(|t| t.trial_id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(report.successes, 3);
    assert_eq!(report.k, 5);
    assert!((report.pass_rate - 0.68).abs() < 1e-12);
    assert_eq!(report.pass_at_k, 1.0);
    assert!((report.pass_pow_k - 0.6f64.powi(5)).abs() < 1e-12);
}

#[test]
fn test_pass_at_k_reference_values() {
    // 1 - C(3,2)/C(5,2) = 1 - 3/10
    assert!((pass_at_k(5, 2, 2) - 0.7).abs() < 1e-12);
    assert_eq!(pass_at_k(5, 0, 5), 0.0);
    assert_eq!(pass_at_k(5, 5, 5), 1.0);
    assert!((pass_pow_k(5, 4, 5) - 0.8f64.powi(5)).abs() < 1e-12);
}

#[test]
fn test_normalized_gain_edges() {
    assert!((normalized_gain(0.8, 0.6) - 0.5).abs() < 1e-12);
    assert!((normalized_gain(0.3, 0.6) + 0.75).abs() < 1e-12);
    assert_eq!(normalized_gain(1.0, 1.0), 0.0);
    assert_eq!(normalized_gain(0.9, 1.0), -1.0);
}

#[tokio::test]
async fn test_compare_persisted_reports() {
    let temp = TempDir::new().unwrap();
    let with_path = persist_report(&report(&[1.0, 1.0, 1.0, 0.0], &["csv"]), &temp.path().join("with"))
        .await
        .unwrap();
    let without_path = persist_report(&report(&[1.0, 0.0, 0.0, 0.0], &[]), &temp.path().join("without"))
        .await
        .unwrap();

    let with_skills = load_report(&with_path).await.unwrap();
    let without_skills = load_report(&without_path).await.unwrap();
    let comparison = compare_reports(&with_skills, &without_skills);

    assert_eq!(comparison.task, "csv-cleanup");
    assert_eq!(comparison.skills, vec!["csv".to_string()]);
    assert!((comparison.pass_rate_with - 0.75).abs() < 1e-12);
    assert!((comparison.pass_rate_without - 0.25).abs() < 1e-12);
    assert!((comparison.normalized_gain - 2.0 / 3.0).abs() < 1e-12);
}
