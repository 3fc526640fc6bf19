//! The `skillsheet result` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use skillsheet_core::result::FinalResult;

pub fn execute(result_path: PathBuf) -> Result<()> {
    let result = FinalResult::load_json(&result_path)?;

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec![Cell::new("Session"), Cell::new(result.session_id)]);
    table.add_row(vec![
        Cell::new("Template"),
        Cell::new(format!("{} v{}", result.template_id, result.template_version)),
    ]);
    table.add_row(vec![Cell::new("Candidate"), Cell::new(&result.candidate_id)]);
    table.add_row(vec![Cell::new("Examiner"), Cell::new(&result.examiner_id)]);
    table.add_row(vec![
        Cell::new("Score"),
        Cell::new(format!(
            "{:.1}/{:.1} ({:.1}%)",
            result.total_points_scored, result.total_possible_points, result.percentage_score
        )),
    ]);
    table.add_row(vec![
        Cell::new("Outcome"),
        Cell::new(if result.critical_fail {
            "FAIL (critical criterion)"
        } else if result.passed {
            "PASS"
        } else {
            "FAIL"
        }),
    ]);
    table.add_row(vec![
        Cell::new("Time"),
        Cell::new(format!("{:.1}s", result.time_elapsed_ms as f64 / 1000.0)),
    ]);
    table.add_row(vec![
        Cell::new("Completed"),
        Cell::new(result.completed_at.to_rfc3339()),
    ]);
    println!("{table}");

    Ok(())
}
