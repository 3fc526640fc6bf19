//! The `skillsheet validate` command.

use std::path::PathBuf;

use anyhow::Result;

pub fn execute(template_path: PathBuf) -> Result<()> {
    let templates = if template_path.is_dir() {
        skillsheet_core::parser::load_template_directory(&template_path)?
    } else {
        vec![skillsheet_core::parser::parse_template(&template_path)?]
    };

    let mut total_warnings = 0;

    for template in &templates {
        println!(
            "Template: {} v{} ({} steps, {} critical criteria)",
            template.name,
            template.template_version,
            template.steps().count(),
            template.critical_criteria.len()
        );

        let warnings = skillsheet_core::parser::validate_template(template);
        for w in &warnings {
            let prefix = w
                .step_id
                .as_ref()
                .map(|id| format!("  [{id}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All templates valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
