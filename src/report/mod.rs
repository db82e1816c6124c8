//! Report persistence.
//!
//! Reports are written as pretty-printed JSON to
//! `<output_dir>/<task>_<timestamp>.json`, where the timestamp is the report's
//! RFC 3339 time with `:` and `.` replaced by `-` so the name is valid on
//! every filesystem.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ReportError;
use crate::runner::EvalReport;
use crate::sandbox::local::slug;

/// File name for a report.
pub fn report_file_name(report: &EvalReport) -> String {
    let timestamp = report.timestamp.to_rfc3339().replace([':', '.'], "-");
    format!("{}_{}.json", slug(&report.task), timestamp)
}

/// Writes `report` into `output_dir`, creating the directory if needed.
pub async fn persist_report(report: &EvalReport, output_dir: &Path) -> Result<PathBuf, ReportError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| ReportError::CreateDir {
            path: output_dir.display().to_string(),
            source,
        })?;

    let path = output_dir.join(report_file_name(report));
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, json).await?;

    info!(path = %path.display(), trials = report.num_trials, "Report written");
    Ok(path)
}

/// Reads a report written by [`persist_report`].
pub async fn load_report(path: &Path) -> Result<EvalReport, ReportError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ReportMeta;
    use crate::sandbox::ProviderKind;
    use tempfile::TempDir;

    fn empty_report() -> EvalReport {
        EvalReport::assemble(
            ReportMeta {
                task: "pdf-extract".to_string(),
                provider: ProviderKind::Local,
                agent: "oracle".to_string(),
                parallel: 1,
                k: None,
                skills_used: vec!["pdf".to_string()],
            },
            vec![],
        )
    }

    #[test]
    fn test_report_file_name() {
        let name = report_file_name(&empty_report());
        assert!(name.starts_with("pdf-extract_"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains(':'));
        assert_eq!(name.matches('.').count(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("results");
        let report = empty_report();

        let path = persist_report(&report, &dir).await.unwrap();
        assert!(path.starts_with(&dir));

        let loaded = load_report(&path).await.unwrap();
        assert_eq!(loaded, report);
    }

    #[tokio::test]
    async fn test_persist_into_file_path_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let err = persist_report(&empty_report(), &blocker).await.unwrap_err();
        assert!(matches!(err, ReportError::CreateDir { .. }));
    }
}
