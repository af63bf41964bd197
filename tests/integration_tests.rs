//! Integration tests for the deal-engine CLI
//!
//! These drive the binary end to end against a temporary project using the
//! starter engine.toml, whose agents are shell one-liners.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a deal-engine Command
fn engine() -> Command {
    cargo_bin_cmd!("deal-engine")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a project in a temp directory
fn init_project(dir: &TempDir) {
    engine()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn run_subject(dir: &TempDir, subject: &str) -> assert_cmd::assert::Assert {
    engine()
        .current_dir(dir.path())
        .args(["run", subject, "--ui", "minimal"])
        .assert()
}

fn write_config(dir: &TempDir, content: &str) {
    fs::create_dir_all(dir.path().join(".deal-engine")).unwrap();
    fs::write(dir.path().join(".deal-engine/engine.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        engine()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("resume"));
    }

    #[test]
    fn test_version() {
        engine().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        engine()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized deal-engine"));

        assert!(dir.path().join(".deal-engine/engine.toml").exists());
        assert!(dir.path().join(".deal-engine/logs").exists());
    }

    #[test]
    fn test_init_twice_keeps_existing_config() {
        let dir = create_temp_project();
        init_project(&dir);
        write_config(&dir, "[run]\nmode = \"express\"\n");

        engine()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));

        let content = fs::read_to_string(dir.path().join(".deal-engine/engine.toml")).unwrap();
        assert!(content.contains("express"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        engine()
            .args(["--project-dir", dir.path().to_str().unwrap(), "init"])
            .assert()
            .success();
        assert!(dir.path().join(".deal-engine/engine.toml").exists());
    }
}

// =============================================================================
// Run / Resume
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_requires_init() {
        let dir = create_temp_project();
        run_subject(&dir, "deal-1")
            .failure()
            .stderr(predicate::str::contains("deal-engine init"));
    }

    #[test]
    fn test_run_completes_with_starter_agents() {
        let dir = create_temp_project();
        init_project(&dir);

        run_subject(&dir, "deal-1")
            .success()
            .stdout(predicate::str::contains("Batch"))
            .stdout(predicate::str::contains("finished: completed"));

        assert!(dir.path().join(".deal-engine/engine.db").exists());
    }

    #[test]
    fn test_second_run_served_from_cache() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        run_subject(&dir, "deal-1")
            .success()
            .stdout(predicate::str::contains("Served from cache"));

        engine()
            .current_dir(dir.path())
            .args(["run", "deal-1", "--ui", "minimal", "--force-refresh"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Served from cache").not());
    }

    #[test]
    fn test_json_ui_emits_report() {
        let dir = create_temp_project();
        init_project(&dir);

        let output = engine()
            .current_dir(dir.path())
            .args(["run", "deal-1", "--ui", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let stdout = String::from_utf8(output.stdout).unwrap();
        let last = stdout.lines().last().unwrap();
        let report: serde_json::Value = serde_json::from_str(last).unwrap();
        assert_eq!(report["success"], true);
        assert_eq!(report["final_state"], "COMPLETED");
        assert!(stdout.contains("\"type\":\"batch_started\""));
    }

    #[test]
    fn test_failed_required_agent_exits_non_zero() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[agents]]
name = "extractor"
phase = "extraction"
command = "echo boom >&2; exit 3"
required = true
"#,
        );

        run_subject(&dir, "deal-1")
            .failure()
            .stdout(predicate::str::contains("extractor"))
            .stderr(predicate::str::contains("required agents failed"));
    }

    #[test]
    fn test_fail_fast_flag_halts_on_critical_warning() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[agents]]
name = "financials"
phase = "analysis"
command = """echo '{"data":{"runway_months":2}}'"""

[[agents]]
name = "memo"
phase = "synthesis"
command = """echo '{"data":{}}'"""

[[warnings.rules]]
agent = "financials"
field = "runway_months"
condition = "below"
threshold = 6
severity = "critical"
"#,
        );

        run_subject(&dir, "deal-1").success().stdout(predicate::str::contains(
            "finished: completed",
        ));

        engine()
            .current_dir(dir.path())
            .args(["run", "deal-2", "--ui", "minimal", "--fail-fast"])
            .assert()
            .success()
            .stdout(predicate::str::contains("halted on 1 critical warning"))
            .stdout(predicate::str::contains("memo").not());
    }

    #[test]
    fn test_resume_with_nothing_interrupted() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        engine()
            .current_dir(dir.path())
            .args(["resume", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No interrupted sessions"));
    }

    #[test]
    fn test_resume_unknown_session_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        engine()
            .current_dir(dir.path())
            .args(["resume", "00000000-0000-0000-0000-000000000000"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to resume session"));
    }
}

// =============================================================================
// Sessions / Checkpoints
// =============================================================================

mod sessions {
    use super::*;

    fn first_session_id(dir: &TempDir) -> String {
        let output = engine()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .output()
            .unwrap();
        let stdout = String::from_utf8(output.stdout).unwrap();
        stdout
            .split_whitespace()
            .next()
            .expect("a session line")
            .to_string()
    }

    #[test]
    fn test_sessions_list_and_show() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        engine()
            .current_dir(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("deal-1"));

        let id = first_session_id(&dir);
        engine()
            .current_dir(dir.path())
            .args(["sessions", "show", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Transitions:"))
            .stdout(predicate::str::contains("SYNTHESIS -> COMPLETED"));
    }

    #[test]
    fn test_active_filter_hides_finished_sessions() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        engine()
            .current_dir(dir.path())
            .args(["sessions", "list", "--active"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sessions recorded"));
    }

    #[test]
    fn test_checkpoints_listed_for_session() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();
        let id = first_session_id(&dir);

        engine()
            .current_dir(dir.path())
            .args(["checkpoints", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("checkpoints for"))
            .stdout(predicate::str::contains("retention 10"));
    }
}

// =============================================================================
// Facts
// =============================================================================

mod facts {
    use super::*;

    #[test]
    fn test_agent_facts_are_recorded() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        engine()
            .current_dir(dir.path())
            .args(["facts", "list", "deal-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("financial.runway_months"))
            .stdout(predicate::str::contains("document_derived"));
    }

    #[test]
    fn test_conflicting_claim_is_disputed_then_resolved() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        engine()
            .current_dir(dir.path())
            .args([
                "facts",
                "submit",
                "deal-1",
                "financial.runway_months",
                "3",
                "--source",
                "inferred",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Disputed"));

        engine()
            .current_dir(dir.path())
            .args(["facts", "list", "deal-1", "--disputed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("DISPUTED"));

        engine()
            .current_dir(dir.path())
            .args(["resolve", "deal-1", "financial.runway_months", "12"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resolved financial.runway_months"));

        engine()
            .current_dir(dir.path())
            .args(["facts", "list", "deal-1", "--disputed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No facts"));

        engine()
            .current_dir(dir.path())
            .args(["facts", "history", "deal-1", "financial.runway_months"])
            .assert()
            .success()
            .stdout(predicate::str::contains("DISPUTED"))
            .stdout(predicate::str::contains("RESOLVED"));
    }

    #[test]
    fn test_resolve_unknown_key_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        engine()
            .current_dir(dir.path())
            .args(["resolve", "deal-1", "financial.arr", "100"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to resolve"));
    }

    #[test]
    fn test_json_listing() {
        let dir = create_temp_project();
        init_project(&dir);
        run_subject(&dir, "deal-1").success();

        let output = engine()
            .current_dir(dir.path())
            .args(["facts", "list", "deal-1", "--json"])
            .output()
            .unwrap();
        let facts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(facts[0]["fact_key"], "financial.runway_months");
        assert_eq!(facts[0]["current_value"], 18);
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        engine()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No engine.toml found"))
            .stdout(predicate::str::contains("dispute_threshold = 0.3"));
    }

    #[test]
    fn test_config_show_applies_env_override() {
        let dir = create_temp_project();
        init_project(&dir);
        engine()
            .current_dir(dir.path())
            .env("DEAL_ENGINE_MODE", "express")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("mode = \"express\""));
    }

    #[test]
    fn test_config_validate_reports_unknown_dependency() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[agents]]
name = "memo"
phase = "synthesis"
command = "true"
depends_on = ["ghost"]
"#,
        );
        engine()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("unknown agent 'ghost'"));
    }

    #[test]
    fn test_config_validate_starter_is_clean() {
        let dir = create_temp_project();
        init_project(&dir);
        engine()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = create_temp_project();
        engine()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created engine.toml"));
        assert!(dir.path().join(".deal-engine/engine.toml").exists());
    }
}
