//! The finalized, auditable result of a completed session.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::SessionStatus;
use crate::session::Session;

/// The immutable payload produced on `complete()` and forwarded to the
/// training-record store for official sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub session_id: Uuid,
    pub template_id: Uuid,
    pub template_version: u32,
    pub candidate_id: String,
    pub examiner_id: String,
    pub total_points_scored: f64,
    pub total_possible_points: f64,
    pub percentage_score: f64,
    pub passed: bool,
    pub critical_fail: bool,
    pub time_elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl FinalResult {
    /// Build the result from a completed session.
    pub fn from_session(session: &Session) -> Result<Self, SessionError> {
        if session.status != SessionStatus::Completed {
            return Err(SessionError::NotCompleted(session.session_id));
        }
        Ok(FinalResult {
            session_id: session.session_id,
            template_id: session.template_id,
            template_version: session.template_version,
            candidate_id: session.candidate_id.clone(),
            examiner_id: session.examiner_id.clone(),
            total_points_scored: session.summary.total_points_scored,
            total_possible_points: session.summary.total_possible_points,
            percentage_score: session.summary.percentage_score,
            passed: session.summary.passed,
            critical_fail: session.summary.critical_fail,
            time_elapsed_ms: session.time_elapsed_ms(),
            // Set by the completed-status guard above.
            completed_at: session.completed_at.unwrap_or_else(Utc::now),
        })
    }

    /// Save the result as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize result")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write result to {}", path.display()))?;
        Ok(())
    }

    /// Load a result from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read result from {}", path.display()))?;
        let result: FinalResult =
            serde_json::from_str(&content).context("failed to parse result JSON")?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FinalResult {
        FinalResult {
            session_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            template_version: 4,
            candidate_id: "cand-9".into(),
            examiner_id: "exam-2".into(),
            total_points_scored: 8.0,
            total_possible_points: 10.0,
            percentage_score: 80.0,
            passed: true,
            critical_fail: false,
            time_elapsed_ms: 412_000,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn json_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("final.json");

        let result = sample();
        result.save_json(&path).unwrap();
        let loaded = FinalResult::load_json(&path).unwrap();

        assert_eq!(loaded.session_id, result.session_id);
        assert_eq!(loaded.percentage_score, 80.0);
        assert!(loaded.passed);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = FinalResult::load_json(Path::new("/nonexistent/final.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/final.json"));
    }
}
