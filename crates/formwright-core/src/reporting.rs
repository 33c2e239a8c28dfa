//! Run report artifact.
//!
//! `<dir>/<run_id>/report.json` holds the pretty-printed [`RunReport`];
//! `<dir>/<run_id>/report.digest` holds the SHA-256 of those exact bytes.
//! Reading verifies the digest before parsing.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::domain::{ReportError, RunReport};

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist the report and its digest. Returns the report path.
pub fn write_run_report(report: &RunReport, dir: &Path) -> Result<PathBuf, ReportError> {
    let run_dir = dir.join(report.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let report_path = run_dir.join("report.json");
    let digest_path = run_dir.join("report.digest");
    let json = serde_json::to_vec_pretty(report)?;

    std::fs::write(&report_path, &json)?;
    std::fs::write(&digest_path, digest_hex(&json).as_bytes())?;

    Ok(report_path)
}

/// Read `<dir>/<run_id>/report.json` and check it against its digest.
pub fn read_run_report(run_id: &str, dir: &Path) -> Result<RunReport, ReportError> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("report.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("report.digest"))?;

    let actual = digest_hex(&json);
    if expected.trim() != actual {
        return Err(ReportError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// Short human summary, one line per activity.
pub fn render_run_summary(report: &RunReport) -> String {
    let mut out = format!("run {}\n", report.run_id);
    for a in &report.activities {
        let reason = a.reason.map(|r| format!(" ({r})")).unwrap_or_default();
        out.push_str(&format!(
            "  {:<16} {}{}  failures={} elapsed_ms={}\n",
            a.code,
            a.status,
            reason,
            a.failures.len(),
            a.elapsed_ms
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivityStatus, ActivitySummary, BuildContext, SkipReason};
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn report() -> RunReport {
        let run_id = Uuid::new_v4();
        let mut skipped = BuildContext::new("CPC-02");
        skipped.finish(ActivityStatus::Skipped, Some(SkipReason::AlreadyExists));
        RunReport {
            run_id,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            activities: vec![
                ActivitySummary::from_context(run_id, BuildContext::new("CPC-01"), "d1".into()),
                ActivitySummary::from_context(run_id, skipped, "d2".into()),
            ],
        }
    }

    #[test]
    fn test_report_written_and_verified() {
        let dir = tempdir().unwrap();
        let report = report();
        let path = write_run_report(&report, dir.path()).unwrap();
        assert!(path.ends_with("report.json"));

        let back = read_run_report(&report.run_id.to_string(), dir.path()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_tampered_report_rejected() {
        let dir = tempdir().unwrap();
        let report = report();
        let path = write_run_report(&report, dir.path()).unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("CPC-02", "CPC-99");
        std::fs::write(&path, tampered).unwrap();

        let err = read_run_report(&report.run_id.to_string(), dir.path()).unwrap_err();
        assert!(matches!(err, ReportError::DigestMismatch { .. }));
    }

    #[test]
    fn test_render_run_summary() {
        let text = render_run_summary(&report());
        assert!(text.contains("CPC-01"));
        assert!(text.contains("ok"));
        assert!(text.contains("skipped (already_exists)"));
    }
}
