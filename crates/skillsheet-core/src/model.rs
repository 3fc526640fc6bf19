//! Core data model types for skillsheet.
//!
//! These are the fundamental types the entire skillsheet system uses to
//! represent exam templates, sessions, and submitted scores.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable, version-pinned copy of an exam template.
///
/// A snapshot is bound to a session at creation and never changes afterward,
/// so later template edits cannot affect sessions already in progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    /// Template identifier.
    pub template_id: Uuid,
    /// Monotonic template version, pinned for the life of a session.
    pub template_version: u32,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Optional time limit in seconds.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
    /// Absolute point threshold required to pass.
    #[serde(default)]
    pub passing_score: Option<f64>,
    /// Percentage threshold (0-100) required to pass.
    #[serde(default)]
    pub passing_percentage: Option<f64>,
    /// Ordered sections of scored steps.
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Independent boolean auto-fail conditions, unordered, no point value.
    #[serde(default)]
    pub critical_criteria: Vec<CriticalCriterion>,
}

impl TemplateSnapshot {
    /// Iterate all steps across sections in order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.sections.iter().flat_map(|s| s.steps.iter())
    }

    /// Look up a step by id.
    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps().find(|s| s.id == step_id)
    }

    /// Look up a section by id.
    pub fn find_section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    /// Look up a critical criterion by id.
    pub fn find_criterion(&self, criterion_id: &str) -> Option<&CriticalCriterion> {
        self.critical_criteria.iter().find(|c| c.id == criterion_id)
    }

    /// Sum of point values across all steps. Fixed once the snapshot exists.
    pub fn total_possible_points(&self) -> f64 {
        self.steps().map(|s| s.point_value).sum()
    }

    /// The criterion auto-triggered when the time limit is exceeded, if the
    /// template defines one.
    pub fn time_limit_criterion(&self) -> Option<&CriticalCriterion> {
        self.critical_criteria.iter().find(|c| c.time_limit_violation)
    }

    /// The time limit as a duration, if configured.
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    /// True when at least one pass threshold is configured.
    pub fn has_passing_config(&self) -> bool {
        self.passing_score.is_some() || self.passing_percentage.is_some()
    }

    /// True when there is nothing to score: zero steps and zero criteria.
    pub fn is_empty(&self) -> bool {
        self.steps().next().is_none() && self.critical_criteria.is_empty()
    }
}

/// An ordered group of scored steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Section identifier, unique within the template.
    pub id: String,
    /// Section title.
    pub title: String,
    /// Ordered steps in this section.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A single scored step within a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier, unique within the template.
    pub id: String,
    /// What the candidate is expected to do.
    pub title: String,
    /// Maximum points for this step. Non-negative.
    pub point_value: f64,
    /// How the examiner's input is interpreted.
    pub scoring: ScoringType,
    /// Ordered rubric levels for `scaled` steps. Empty for other types.
    #[serde(default)]
    pub rubric: Vec<RubricLevel>,
    /// Whether this step must be performed.
    #[serde(default)]
    pub required: bool,
}

/// One level of a scaled step's rubric.
///
/// Submitted levels are validated by identity (the `level` id), never by
/// position, so rubric edits between template versions cannot corrupt
/// sessions pinned to an older version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricLevel {
    /// Level identifier (e.g. "proficient").
    pub level: String,
    /// What performance at this level looks like.
    #[serde(default)]
    pub description: String,
    /// Points awarded at this level.
    pub points: f64,
}

/// An independent boolean auto-fail condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalCriterion {
    /// Criterion identifier, unique within the template.
    pub id: String,
    /// What triggers the criterion.
    pub description: String,
    /// Marks the criterion the session auto-triggers on time-limit expiry.
    #[serde(default)]
    pub time_limit_violation: bool,
}

/// Per-step evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringType {
    /// Full points or zero.
    Binary,
    /// Any value in `0..=point_value`.
    Partial,
    /// Points taken from a rubric level.
    Scaled,
    /// Free text; contributes points only when explicitly marked scored.
    Statement,
}

impl fmt::Display for ScoringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringType::Binary => write!(f, "binary"),
            ScoringType::Partial => write!(f, "partial"),
            ScoringType::Scaled => write!(f, "scaled"),
            ScoringType::Statement => write!(f, "statement"),
        }
    }
}

impl FromStr for ScoringType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(ScoringType::Binary),
            "partial" => Ok(ScoringType::Partial),
            "scaled" => Ok(ScoringType::Scaled),
            "statement" => Ok(ScoringType::Statement),
            other => Err(format!("unknown scoring type: {other}")),
        }
    }
}

/// Whether a session counts toward the permanent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Graded; the finalized result is forwarded to the training-record store.
    Official,
    /// Non-graded; the result never reaches the permanent record store.
    Practice,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Official => write!(f, "official"),
            SessionMode::Practice => write!(f, "practice"),
        }
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Cancelled,
    Draft,
}

impl SessionStatus {
    /// Terminal statuses are immutable except for authorized deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotStarted => write!(f, "not_started"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::Draft => write!(f, "draft"),
        }
    }
}

/// The recorded outcome for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Points awarded, always in `[0, step.point_value]`.
    pub points_awarded: f64,
    /// Whether the examiner has scored this step.
    pub scored: bool,
    /// Flagged for follow-up. Metadata only, never affects scoring.
    pub flagged: bool,
    /// Why the step was flagged.
    pub flag_reason: Option<String>,
    /// Examiner notes for this step.
    pub notes: Option<String>,
    /// Recorded text for statement-type steps.
    pub statement: Option<String>,
}

/// The recorded outcome for one critical criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalResult {
    /// Whether the auto-fail condition was observed.
    pub triggered: bool,
    /// Examiner notes for this criterion.
    pub notes: Option<String>,
}

/// One pause interval, recorded with wall-clock timestamps for audit display.
///
/// Interval math for `time_elapsed` uses the monotonic timer, not these
/// timestamps, so system clock adjustments cannot corrupt elapsed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseEntry {
    pub paused_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// A value submitted for a step. The shape must match the step's
/// [`ScoringType`]; the scoring engine validates and interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScoreValue {
    /// Pass/fail for a binary step.
    Binary { passed: bool },
    /// Points for a partial-credit step, `0..=point_value`.
    Partial { points: f64 },
    /// Rubric level id for a scaled step.
    Scaled { level: String },
    /// Free text for a statement step. Contributes the step's point value
    /// only when explicitly marked scored.
    Statement {
        text: String,
        #[serde(default)]
        scored: bool,
    },
}
