//! Secret redaction for reports.
//!
//! Every value of the secret environment longer than the configured minimum
//! is replaced by [`SENTINEL`] in all free text of a report: session log
//! entries, grader details and trial errors. Redaction works on a copy; the
//! input report is left untouched.

use crate::runner::EvalReport;

/// Replacement text for redacted secrets.
pub const SENTINEL: &str = "[REDACTED]";

/// Replaces known secret values in text.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// Longest first, so a secret containing another is replaced whole.
    secrets: Vec<String>,
}

impl Redactor {
    /// Creates a redactor for secrets strictly longer than `min_length`.
    ///
    /// Short values are skipped: redacting `"1"` or `"true"` would shred
    /// unrelated output.
    pub fn new<I, S>(secrets: I, min_length: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| s.chars().count() > min_length)
            .collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();
        Self { secrets }
    }

    /// True if nothing would be redacted.
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Redacts one string.
    pub fn redact_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), SENTINEL);
            }
        }
        out
    }

    /// Returns a redacted copy of `report`.
    pub fn redact_report(&self, report: &EvalReport) -> EvalReport {
        let mut redacted = report.clone();
        if self.is_empty() {
            return redacted;
        }

        for trial in &mut redacted.trials {
            for entry in &mut trial.session_log {
                entry.map_text(|text| self.redact_text(text));
            }
            for result in &mut trial.grader_results {
                result.detail = self.redact_text(&result.detail);
            }
            if let Some(error) = &trial.error {
                trial.error = Some(self.redact_text(error));
            }
        }
        redacted
    }
}
