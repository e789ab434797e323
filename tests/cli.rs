use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn focus_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_focus"))
}

fn write_config(content: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("focus.toml");
    fs::write(&config_path, content).unwrap();
    (tmp, config_path)
}

fn run_focus(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = focus_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run focus binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const CUSTOM_MODE_CONFIG: &str = r#"
[llm]
provider = "ollama"
model = "llama3.1"

[search]
url = "http://127.0.0.1:9"

[focus_modes.rust-docs]
description = "Search the Rust documentation"

[focus_modes.rust-docs.retrieval]
engines = ["docs.rs"]

[focus_modes.rust-docs.retrieval.rerank]
threshold = 0.4
limit = 5
"#;

#[test]
fn test_modes_lists_builtins() {
    let (_tmp, config) = write_config("");
    let (stdout, stderr, ok) = run_focus(&config, &["modes"]);
    assert!(ok, "stderr: {}", stderr);

    for name in ["web", "academic", "reddit", "youtube", "wolfram-alpha", "writing"] {
        assert!(
            stdout.lines().any(|l| l.starts_with(name)),
            "missing {} in:\n{}",
            name,
            stdout
        );
    }
    let writing = stdout.lines().find(|l| l.starts_with("writing")).unwrap();
    assert!(writing.contains("generation only"));
}

#[test]
fn test_modes_includes_configured_mode() {
    let (_tmp, config) = write_config(CUSTOM_MODE_CONFIG);
    let (stdout, stderr, ok) = run_focus(&config, &["modes"]);
    assert!(ok, "stderr: {}", stderr);

    let line = stdout
        .lines()
        .find(|l| l.starts_with("rust-docs"))
        .unwrap_or_else(|| panic!("rust-docs missing in:\n{}", stdout));
    assert!(line.contains("search + rerank"));
    assert!(line.contains("Search the Rust documentation"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config) = write_config("[llm]\nprovider = \"carrier-pigeon\"\n");
    let (_, stderr, ok) = run_focus(&config, &["modes"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown llm provider"), "stderr: {}", stderr);
}

#[test]
fn test_missing_explicit_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_focus(&tmp.path().join("nope.toml"), &["modes"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_ask_unknown_mode() {
    let (_tmp, config) = write_config(CUSTOM_MODE_CONFIG);
    let (_, stderr, ok) = run_focus(&config, &["ask", "hello", "--mode", "poetry"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown focus mode: 'poetry'"), "stderr: {}", stderr);
    assert!(stderr.contains("rust-docs"));
}

#[test]
fn test_ask_empty_query() {
    let (_tmp, config) = write_config(CUSTOM_MODE_CONFIG);
    let (_, stderr, ok) = run_focus(&config, &["ask", "   "]);
    assert!(!ok);
    assert!(stderr.contains("query must not be empty"), "stderr: {}", stderr);
}

#[test]
fn test_ask_bad_history() {
    let (_tmp, config) = write_config(CUSTOM_MODE_CONFIG);
    let (_, stderr, ok) = run_focus(&config, &["ask", "hello", "--history", "not json"]);
    assert!(!ok);
    assert!(stderr.contains("--history must be a JSON array"), "stderr: {}", stderr);
}
