//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;
use tempfile::TempDir;
use uuid::Uuid;

use skillsheet_core::model::{ScoreValue, SessionMode};
use skillsheet_core::session::Operation;
use skillsheet_core::traits::MutationLog;
use skillsheet_sync::{FileOpLog, OpLog};

fn skillsheet() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("skillsheet").unwrap()
}

#[test]
fn validate_valid_template() {
    skillsheet()
        .arg("validate")
        .arg("--template")
        .arg("../../templates/adult-cpr.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("Adult CPR"))
        .stdout(predicate::str::contains("5 steps"))
        .stdout(predicate::str::contains("All templates valid"));
}

#[test]
fn validate_directory() {
    skillsheet()
        .arg("validate")
        .arg("--template")
        .arg("../../templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("Adult CPR"));
}

#[test]
fn validate_nonexistent_file() {
    skillsheet()
        .arg("validate")
        .arg("--template")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn validate_warns_on_missing_passing_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("no-pass.toml");
    std::fs::write(
        &path,
        r#"
[template]
id = "6f0a2d5b-8c7e-4a90-8a1f-6d3e42b74c4e"
name = "No Thresholds"

[[sections]]
id = "s"
name = "S"

[[sections.steps]]
id = "step1"
title = "Does the thing"
point_value = 1.0
"#,
    )
    .unwrap();

    skillsheet()
        .arg("validate")
        .arg("--template")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("never pass"));
}

fn write_log(dir: &TempDir, session_id: Uuid) -> std::path::PathBuf {
    let template_id: Uuid = "8a1f6d3e-42b7-4c4e-9f0a-2d5b8c7e1a90".parse().unwrap();
    let log = FileOpLog::new(dir.path()).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let now = Utc::now();
        log.append(
            session_id,
            &Operation::Create {
                at: now,
                session_id,
                template_id,
                template_version: 3,
                candidate_id: "cand-1".into(),
                examiner_id: "exam-1".into(),
                attempt_number: 1,
                mode: SessionMode::Official,
            },
        )
        .await
        .unwrap();
        log.append(session_id, &Operation::Start { at: now })
            .await
            .unwrap();
        log.append(
            session_id,
            &Operation::ScoreStep {
                at: now,
                step_id: "scene-safety".into(),
                value: ScoreValue::Binary { passed: true },
            },
        )
        .await
        .unwrap();
        log.append(
            session_id,
            &Operation::Complete {
                at: now,
                signature: "A. Chen".into(),
                time_elapsed_ms: 90_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(log.entries(session_id).await.unwrap().len(), 4);
    });
    dir.path().join(format!("{session_id}.jsonl"))
}

#[test]
fn replay_rebuilds_a_session_from_its_log() {
    let dir = TempDir::new().unwrap();
    let session_id = Uuid::new_v4();
    let log_path = write_log(&dir, session_id);

    skillsheet()
        .arg("replay")
        .arg("--template")
        .arg("../../templates/adult-cpr.toml")
        .arg("--log")
        .arg(&log_path)
        .assert()
        .success()
        .stdout(predicate::str::contains(session_id.to_string()))
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("scene-safety"))
        .stdout(predicate::str::contains("FAIL"));
}

#[test]
fn replay_rejects_a_log_without_a_genesis_entry() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("broken.jsonl");
    std::fs::write(&log_path, "").unwrap();

    skillsheet()
        .arg("replay")
        .arg("--template")
        .arg("../../templates/adult-cpr.toml")
        .arg("--log")
        .arg(&log_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn result_prints_a_saved_final_result() {
    use skillsheet_core::result::FinalResult;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("result.json");
    let result = FinalResult {
        session_id: Uuid::new_v4(),
        template_id: Uuid::new_v4(),
        template_version: 3,
        candidate_id: "cand-1".into(),
        examiner_id: "exam-1".into(),
        total_points_scored: 22.0,
        total_possible_points: 25.0,
        percentage_score: 88.0,
        passed: true,
        critical_fail: false,
        time_elapsed_ms: 480_000,
        completed_at: Utc::now(),
    };
    result.save_json(&path).unwrap();

    skillsheet()
        .arg("result")
        .arg("--result")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("cand-1"))
        .stdout(predicate::str::contains("88.0%"))
        .stdout(predicate::str::contains("PASS"));
}
