//! Pure scoring computation.
//!
//! Deterministic given `(snapshot, step_results, critical_results)` and free
//! of side effects. Recomputation is always full, never incremental, so the
//! derived totals are a function of current state rather than of mutation
//! order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::model::{
    CriticalResult, ScoreValue, ScoringType, Step, StepResult, TemplateSnapshot,
};

/// Derived score totals. Never hand-set; always produced by [`compute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_points_scored: f64,
    pub total_possible_points: f64,
    /// `total_points_scored / total_possible_points * 100`, 0 when the
    /// denominator is 0.
    pub percentage_score: f64,
    /// True iff at least one critical criterion is triggered.
    pub critical_fail: bool,
    /// False whenever `critical_fail` is true, regardless of score.
    pub passed: bool,
}

/// Validate a submitted value against the step's scoring type and turn it
/// into a step result. Rejects shape, range, and rubric-level mismatches
/// before any state is touched.
pub fn validate_score_value(step: &Step, value: &ScoreValue) -> Result<StepResult, SessionError> {
    let invalid = |reason: String| SessionError::InvalidScoreValue {
        step_id: step.id.clone(),
        reason,
    };

    let (points_awarded, statement) = match (step.scoring, value) {
        (ScoringType::Binary, ScoreValue::Binary { passed }) => {
            (if *passed { step.point_value } else { 0.0 }, None)
        }
        (ScoringType::Partial, ScoreValue::Partial { points }) => {
            if !points.is_finite() {
                return Err(invalid(format!("points must be finite, got {points}")));
            }
            if *points < 0.0 || *points > step.point_value {
                return Err(invalid(format!(
                    "points {points} outside 0..={}",
                    step.point_value
                )));
            }
            (*points, None)
        }
        (ScoringType::Scaled, ScoreValue::Scaled { level }) => {
            // Levels match by identity, never by position.
            let rubric_level = step
                .rubric
                .iter()
                .find(|l| l.level == *level)
                .ok_or_else(|| invalid(format!("no rubric level named '{level}'")))?;
            (rubric_level.points.clamp(0.0, step.point_value), None)
        }
        (ScoringType::Statement, ScoreValue::Statement { text, scored }) => (
            if *scored { step.point_value } else { 0.0 },
            Some(text.clone()),
        ),
        (expected, got) => {
            return Err(invalid(format!(
                "step is {expected}, got a {} value",
                score_value_kind(got)
            )));
        }
    };

    Ok(StepResult {
        points_awarded,
        scored: true,
        flagged: false,
        flag_reason: None,
        notes: None,
        statement,
    })
}

fn score_value_kind(value: &ScoreValue) -> &'static str {
    match value {
        ScoreValue::Binary { .. } => "binary",
        ScoreValue::Partial { .. } => "partial",
        ScoreValue::Scaled { .. } => "scaled",
        ScoreValue::Statement { .. } => "statement",
    }
}

/// Full recompute of the derived totals.
///
/// Steps without an entry contribute 0. A triggered critical criterion
/// overrides the score-based determination unconditionally. When both an
/// absolute and a percentage threshold are configured, both must be met.
pub fn compute(
    snapshot: &TemplateSnapshot,
    step_results: &BTreeMap<String, StepResult>,
    critical_results: &BTreeMap<String, CriticalResult>,
) -> ScoreSummary {
    let total_possible_points = snapshot.total_possible_points();

    let total_points_scored: f64 = snapshot
        .steps()
        .filter_map(|step| step_results.get(&step.id))
        .map(|r| r.points_awarded)
        .sum();

    // Division-by-zero guard. An empty snapshot is rejected at bind time,
    // but the totals must stay well-defined regardless.
    let percentage_score = if total_possible_points > 0.0 {
        total_points_scored / total_possible_points * 100.0
    } else {
        0.0
    };

    let critical_fail = critical_results.values().any(|r| r.triggered);

    let threshold_met = match (snapshot.passing_score, snapshot.passing_percentage) {
        (None, None) => false,
        (score, percentage) => {
            score.map_or(true, |s| total_points_scored >= s)
                && percentage.map_or(true, |p| percentage_score >= p)
        }
    };

    ScoreSummary {
        total_points_scored,
        total_possible_points,
        percentage_score,
        critical_fail,
        passed: !critical_fail && threshold_met,
    }
}
