//! TOML template parser.
//!
//! Loads assessment templates from TOML files and directories, and validates
//! them for authoring mistakes before they are published.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::model::{CriticalCriterion, RubricLevel, ScoringType, Section, Step, TemplateSnapshot};

/// Intermediate TOML structure for parsing template files.
#[derive(Debug, Deserialize)]
struct TomlTemplateFile {
    template: TomlTemplateHeader,
    #[serde(default)]
    sections: Vec<TomlSection>,
    #[serde(default)]
    critical_criteria: Vec<TomlCriticalCriterion>,
}

#[derive(Debug, Deserialize)]
struct TomlTemplateHeader {
    id: Uuid,
    #[serde(default = "default_version")]
    version: u32,
    name: String,
    #[serde(default)]
    time_limit_secs: Option<u64>,
    #[serde(default)]
    passing_score: Option<f64>,
    #[serde(default)]
    passing_percentage: Option<f64>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TomlSection {
    id: String,
    name: String,
    #[serde(default)]
    steps: Vec<TomlStep>,
}

#[derive(Debug, Deserialize)]
struct TomlStep {
    id: String,
    title: String,
    point_value: f64,
    #[serde(default = "default_scoring")]
    scoring: String,
    #[serde(default)]
    rubric: Vec<TomlRubricLevel>,
    #[serde(default = "default_true")]
    required: bool,
}

fn default_scoring() -> String {
    "binary".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TomlRubricLevel {
    level: String,
    #[serde(default)]
    description: String,
    points: f64,
}

#[derive(Debug, Deserialize)]
struct TomlCriticalCriterion {
    id: String,
    description: String,
    #[serde(default)]
    time_limit_violation: bool,
}

/// Parse a single TOML file into a `TemplateSnapshot`.
pub fn parse_template(path: &Path) -> Result<TemplateSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template file: {}", path.display()))?;

    parse_template_str(&content, path)
}

/// Parse a TOML string into a `TemplateSnapshot` (useful for testing).
pub fn parse_template_str(content: &str, source_path: &Path) -> Result<TemplateSnapshot> {
    let parsed: TomlTemplateFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let sections = parsed
        .sections
        .into_iter()
        .map(|s| {
            let steps = s
                .steps
                .into_iter()
                .map(|st| {
                    if !st.point_value.is_finite() || st.point_value < 0.0 {
                        anyhow::bail!(
                            "step '{}': point_value must be a non-negative number",
                            st.id
                        );
                    }
                    let scoring: ScoringType = st
                        .scoring
                        .parse()
                        .map_err(|e: String| anyhow::anyhow!("step '{}': {}", st.id, e))?;
                    Ok(Step {
                        id: st.id,
                        title: st.title,
                        point_value: st.point_value,
                        scoring,
                        rubric: st
                            .rubric
                            .into_iter()
                            .map(|r| RubricLevel {
                                level: r.level,
                                description: r.description,
                                points: r.points,
                            })
                            .collect(),
                        required: st.required,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(Section {
                id: s.id,
                title: s.name,
                steps,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let critical_criteria = parsed
        .critical_criteria
        .into_iter()
        .map(|c| CriticalCriterion {
            id: c.id,
            description: c.description,
            time_limit_violation: c.time_limit_violation,
        })
        .collect();

    Ok(TemplateSnapshot {
        template_id: parsed.template.id,
        template_version: parsed.template.version,
        name: parsed.template.name,
        time_limit_secs: parsed.template.time_limit_secs,
        passing_score: parsed.template.passing_score,
        passing_percentage: parsed.template.passing_percentage,
        sections,
        critical_criteria,
    })
}

/// Recursively load all `.toml` template files from a directory.
pub fn load_template_directory(dir: &Path) -> Result<Vec<TemplateSnapshot>> {
    let mut templates = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            templates.extend(load_template_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_template(&path) {
                Ok(template) => templates.push(template),
                Err(e) => {
                    tracing::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(templates)
}

/// A warning from template validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The step ID (if applicable).
    pub step_id: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a template for common authoring issues. None of these block a
/// session from binding the template; they exist so authors fix templates
/// before candidates sit them.
pub fn validate_template(template: &TemplateSnapshot) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if template.is_empty() {
        warnings.push(ValidationWarning {
            step_id: None,
            message: "template has no steps and no critical criteria, nothing to score".into(),
        });
    }

    if !template.has_passing_config() {
        warnings.push(ValidationWarning {
            step_id: None,
            message: "no passing_score or passing_percentage set, sessions can never pass".into(),
        });
    }

    // Check for duplicate identifiers across sections and criteria
    let mut seen_sections = std::collections::HashSet::new();
    for section in &template.sections {
        if !seen_sections.insert(&section.id) {
            warnings.push(ValidationWarning {
                step_id: None,
                message: format!("duplicate section ID: {}", section.id),
            });
        }
    }
    let mut seen_steps = std::collections::HashSet::new();
    for step in template.steps() {
        if !seen_steps.insert(&step.id) {
            warnings.push(ValidationWarning {
                step_id: Some(step.id.clone()),
                message: format!("duplicate step ID: {}", step.id),
            });
        }
    }
    let mut seen_criteria = std::collections::HashSet::new();
    for criterion in &template.critical_criteria {
        if !seen_criteria.insert(&criterion.id) {
            warnings.push(ValidationWarning {
                step_id: None,
                message: format!("duplicate critical criterion ID: {}", criterion.id),
            });
        }
    }

    for step in template.steps() {
        match step.scoring {
            ScoringType::Scaled if step.rubric.is_empty() => {
                warnings.push(ValidationWarning {
                    step_id: Some(step.id.clone()),
                    message: "scaled step has no rubric levels".into(),
                });
            }
            _ => {}
        }
        for level in &step.rubric {
            if level.points > step.point_value {
                warnings.push(ValidationWarning {
                    step_id: Some(step.id.clone()),
                    message: format!(
                        "rubric level '{}' awards {} points, above the step's point_value {}",
                        level.level, level.points, step.point_value
                    ),
                });
            }
        }
    }

    let limit_criteria = template
        .critical_criteria
        .iter()
        .filter(|c| c.time_limit_violation)
        .count();
    if limit_criteria > 1 {
        warnings.push(ValidationWarning {
            step_id: None,
            message: "more than one critical criterion is marked time_limit_violation".into(),
        });
    }
    if template.time_limit_secs.is_some() && limit_criteria == 0 {
        warnings.push(ValidationWarning {
            step_id: None,
            message: "time limit set but no criterion marked time_limit_violation, expiry will not affect the outcome".into(),
        });
    }

    warnings
}
