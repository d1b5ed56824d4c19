use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn colloquy_binary() -> &'static str {
    env!("CARGO_BIN_EXE_colloquy")
}

/// Config file pointing state at `dir` and the provider at the local echo.
fn write_config(dir: &Path, extra: &str) -> String {
    let path = dir.join("colloquy.toml");
    let storage = dir.join("state");
    let contents = format!(
        "provider = \"mock\"\nmodel = \"echo\"\n{}\n\n[history]\nstorage_dir = \"{}\"\n",
        extra,
        storage.display().to_string().replace('\\', "/")
    );
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}

fn run_colloquy(dir: &TempDir, args: &[&str]) -> Output {
    run_colloquy_with_config(dir, &write_config(dir.path(), ""), args)
}

fn run_colloquy_with_config(dir: &TempDir, config: &str, args: &[&str]) -> Output {
    Command::new(colloquy_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute colloquy command")
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

mod version_command_tests {
    use super::*;

    #[test]
    fn test_version_command_basic() {
        let output = Command::new(colloquy_binary())
            .arg("version")
            .output()
            .unwrap();
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "version command should succeed");
        assert!(stdout.contains("colloquy"));
        assert!(stdout.contains("0.1.0"));
    }

    #[test]
    fn test_version_command_detailed() {
        let output = Command::new(colloquy_binary())
            .args(["version", "--detailed"])
            .output()
            .unwrap();
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("Version"));
        assert!(stdout.contains("Apache-2.0"));
        assert!(stdout.contains("mock"));
    }

    #[test]
    fn test_help_lists_commands() {
        let output = Command::new(colloquy_binary())
            .arg("--help")
            .output()
            .unwrap();
        let stdout = output_to_string(&output);

        for command in ["ask", "chat", "history", "metrics", "traces", "config"] {
            assert!(stdout.contains(command), "help should mention {command}");
        }
    }
}

mod config_command_tests {
    use super::*;

    #[test]
    fn test_config_show_json_hides_api_key() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "api_key = \"sk-secret\"");
        let output = run_colloquy_with_config(&dir, &config, &["config", "show", "--format", "json"]);

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        let value: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        assert_eq!(value["provider"], "mock");
        assert!(value.get("api_key").is_none());
        assert!(!output_to_string(&output).contains("sk-secret"));
    }

    #[test]
    fn test_config_validate_two_stage() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            dir.path(),
            "mode = \"two_stage\"\n\n[plan]\nmodel = \"planner\"",
        );
        let output = run_colloquy_with_config(&dir, &config, &["config", "validate"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        assert!(stdout.contains("valid"));
        assert!(stdout.contains("planner"));
        assert!(stdout.contains("echo"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "max_turns = 0");
        let output = run_colloquy_with_config(&dir, &config, &["config", "show"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("max_turns"));
    }

    #[test]
    fn test_missing_config_file_fails() {
        let dir = TempDir::new().unwrap();
        let output = run_colloquy_with_config(&dir, "does-not-exist.toml", &["config", "show"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("E2003"));
    }
}

mod ask_command_tests {
    use super::*;

    #[test]
    fn test_ask_with_mock_provider() {
        let dir = TempDir::new().unwrap();
        let output = run_colloquy(&dir, &["ask", "hello there"]);

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        assert!(output_to_string(&output).contains("[mock/echo] Echo: hello there"));
    }

    #[test]
    fn test_ask_json_output() {
        let dir = TempDir::new().unwrap();
        let output = run_colloquy(&dir, &["ask", "ping", "--format", "json"]);

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        let value: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        assert_eq!(value["output"], "[mock/echo] Echo: ping");
        assert!(value["conversation_id"].as_str().is_some());
    }

    #[test]
    fn test_ask_orchestrated_reports_states() {
        let dir = TempDir::new().unwrap();
        let output = run_colloquy(
            &dir,
            &["ask", "plan this", "--orchestrate", "--mode", "two_stage", "--format", "json"],
        );

        assert!(output.status.success(), "{}", stderr_to_string(&output));
        let value: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        let result = &value["result"];
        assert_eq!(result["fallback"], false);
        assert_eq!(result["final_state"], "complete");
        assert_eq!(result["decomposition"]["execution_order"][0], "plan");
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir = TempDir::new().unwrap();
        let output = run_colloquy(&dir, &["ask", "hi", "--mode", "three_stage"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("Unknown mode"));
    }
}
