//! The `skillsheet replay` command.
//!
//! Rebuilds a session from its durable operation log, which is both the
//! crash-recovery path and the audit tool for disputed results.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use skillsheet_core::session::{Operation, Session};
use skillsheet_sync::LogEntry;

pub fn execute(template_path: PathBuf, log_path: PathBuf) -> Result<()> {
    let template = skillsheet_core::parser::parse_template(&template_path)?;

    let content = std::fs::read_to_string(&log_path)
        .with_context(|| format!("failed to read log: {}", log_path.display()))?;
    let mut entries: Vec<LogEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("malformed log entry"))
        .collect::<Result<_>>()?;
    entries.sort_by_key(|e| e.seq);

    let ops: Vec<Operation> = entries.iter().map(|e| e.op.clone()).collect();
    let session = Session::replay(Arc::new(template), &ops)?;

    println!(
        "Session {} — candidate {}, examiner {}, attempt {}",
        session.session_id, session.candidate_id, session.examiner_id, session.attempt_number
    );
    println!(
        "Status: {} ({} operations, {:.1}s elapsed)",
        session.status,
        ops.len(),
        session.time_elapsed_ms() as f64 / 1000.0
    );

    let mut table = Table::new();
    table.set_header(vec!["Step", "Points", "Max", "Flagged"]);
    for step in session.snapshot().steps() {
        let result = session.step_results.get(&step.id);
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(
                result
                    .filter(|r| r.scored)
                    .map(|r| format!("{:.1}", r.points_awarded))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(format!("{:.1}", step.point_value)),
            Cell::new(if result.is_some_and(|r| r.flagged) {
                "yes"
            } else {
                ""
            }),
        ]);
    }
    println!("{table}");

    for (id, result) in &session.critical_results {
        if result.triggered {
            println!("CRITICAL: {id} triggered");
        }
    }

    println!(
        "Score: {:.1}/{:.1} ({:.1}%) — {}",
        session.summary.total_points_scored,
        session.summary.total_possible_points,
        session.summary.percentage_score,
        if session.summary.passed { "PASS" } else { "FAIL" }
    );

    Ok(())
}
