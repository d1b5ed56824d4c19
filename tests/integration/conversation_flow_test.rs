use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

/// A scratch workspace whose state directory starts empty.
struct Workspace {
    dir: TempDir,
    config: String,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("colloquy.toml");
        let storage = dir.path().join("state");
        std::fs::write(
            &config_path,
            format!(
                "provider = \"mock\"\nmodel = \"echo\"\n\n[history]\nstorage_dir = \"{}\"\n",
                storage.display().to_string().replace('\\', "/")
            ),
        )
        .unwrap();

        Self {
            config: config_path.display().to_string(),
            dir,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_colloquy"));
        cmd.arg("--config")
            .arg(&self.config)
            .args(args)
            .current_dir(self.dir.path())
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        let output = self.command(args).output().expect("Failed to run colloquy");
        assert!(
            output.status.success(),
            "colloquy {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        serde_json::from_slice(&output.stdout).expect("command should print JSON")
    }

    fn state_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("state")
    }

    fn ask(&self, prompt: &str) -> String {
        let value = self.json(&["ask", prompt, "--format", "json"]);
        value["conversation_id"].as_str().unwrap().to_string()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

mod history_flow_tests {
    use super::*;

    #[test]
    fn test_asked_questions_land_in_history() {
        let ws = Workspace::new();
        let first = ws.ask("how do lifetimes work");
        let second = ws.ask("explain pinning");

        let entries = ws.json(&["history", "list", "--format", "json"]);
        let ids: Vec<&str> = entries
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.as_str()));
        assert!(ids.contains(&second.as_str()));

        assert!(Path::new(&ws.state_dir().join("history").join("index.json")).exists());
    }

    #[test]
    fn test_search_show_and_delete() {
        let ws = Workspace::new();
        let id = ws.ask("what is a pinned future");
        ws.ask("unrelated question");

        let found = ws.json(&["history", "search", "PINNED", "--format", "json"]);
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["id"], id.as_str());

        let record = ws.json(&["history", "show", &id, "--format", "json"]);
        assert_eq!(record["messages"].as_array().unwrap().len(), 2);
        assert_eq!(record["messages"][0]["content"], "what is a pinned future");

        let output = ws.run(&["history", "delete", &id]);
        assert!(stdout(&output).contains("Deleted"));

        let missing = ws.command(&["history", "show", &id]).output().unwrap();
        assert!(!missing.status.success());
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let ws = Workspace::new();
        ws.ask("keep me");

        ws.run(&["history", "clear"]);
        let stats = ws.run(&["history", "stats"]);
        assert!(stdout(&stats).contains("1"));

        ws.run(&["history", "clear", "--yes"]);
        let entries = ws.json(&["history", "list", "--format", "json"]);
        assert!(entries.as_array().unwrap().is_empty());
    }
}

mod telemetry_flow_tests {
    use super::*;

    #[test]
    fn test_metrics_accumulate_across_runs() {
        let ws = Workspace::new();
        ws.ask("first");
        ws.ask("second");
        ws.ask("third");

        let summary = ws.json(&["metrics", "summary", "--format", "json"]);
        assert_eq!(summary["total_conversations"], 3);
        assert_eq!(summary["total_messages"], 3);
        assert_eq!(summary["top_provider"], "mock");
        assert_eq!(summary["total_cost"], 0.0);
    }

    #[test]
    fn test_metrics_export_csv_to_file() {
        let ws = Workspace::new();
        let id = ws.ask("export me");

        let target = ws.dir.path().join("metrics.csv");
        ws.run(&[
            "metrics",
            "export",
            "--format",
            "csv",
            "--output",
            target.to_str().unwrap(),
        ]);

        let csv = std::fs::read_to_string(&target).unwrap();
        let lines: Vec<&str> = csv.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("conversation_id,provider,model,prompt_tokens"));
        assert!(lines[1].starts_with(&format!("{},mock,echo,", id)));
    }

    #[test]
    fn test_metrics_export_rejects_bad_date_format() {
        let ws = Workspace::new();
        ws.ask("dated");

        let output = ws
            .command(&["metrics", "export", "--format", "csv", "--date-format", "%Q"])
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid date format"));
    }

    #[test]
    fn test_trace_filter_and_summary() {
        let ws = Workspace::new();
        let id = ws.ask("trace me");

        let acts = ws.json(&[
            "traces", "filter", "--conversation", &id, "--stage", "act", "--format", "json",
        ]);
        let acts = acts.as_array().unwrap();
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0]["stage"], "Act");
        assert_eq!(acts[0]["output"], "[mock/echo] Echo: trace me");

        let summary = ws.json(&["traces", "summary", "--format", "json"]);
        assert_eq!(summary["total_traces"], 1);
        assert_eq!(summary["total_entries"], 4);
        assert_eq!(summary["error_count"], 0);

        let errors = ws.json(&["traces", "filter", "--errors", "--format", "json"]);
        assert!(errors.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_trace_export_json() {
        let ws = Workspace::new();
        ws.ask("one");

        let output = ws.run(&["traces", "export", "--format", "json", "--stage", "verify"]);
        let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["metadata"]["non_empty"], true);
    }
}

mod chat_flow_tests {
    use super::*;

    #[test]
    fn test_chat_session_from_stdin() {
        let ws = Workspace::new();
        let mut child = ws
            .command(&["chat"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"first message\nsecond message\n/exit\n")
            .unwrap();
        let output = child.wait_with_output().unwrap();
        let text = stdout(&output);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert!(text.contains("[mock/echo] Echo: first message"));
        assert!(text.contains("Saved conversation"));

        let entries = ws.json(&["history", "list", "--format", "json"]);
        assert_eq!(entries[0]["message_count"], 4);
    }

    #[test]
    fn test_chat_resume_continues_conversation() {
        let ws = Workspace::new();
        let id = ws.ask("remember the number 42");

        let mut child = ws
            .command(&["chat", "--resume", &id])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(b"what was the number?\n")
            .unwrap();
        let output = child.wait_with_output().unwrap();

        assert!(output.status.success());
        assert!(stdout(&output).contains("2 earlier messages"));
        assert!(stdout(&output).contains("[mock/echo] Echo: what was the number?"));

        let record = ws.json(&["history", "show", &id, "--format", "json"]);
        let messages = record["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["content"], "remember the number 42");
    }
}
