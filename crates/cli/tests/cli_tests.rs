// Integration tests for the abacus binary: stdout contract and exit codes.
//
// Run with: cargo test -p abacus-cli --test cli_tests

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A command isolated from the user's settings: no $ABACUS_CONFIG and an
/// empty config dir.
fn abacus(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_abacus"));
    cmd.env_remove("ABACUS_CONFIG")
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", home.path())
        .current_dir(home.path());
    cmd
}

fn run(home: &TempDir, args: &[&str]) -> Output {
    abacus(home).args(args).output().expect("failed to run abacus")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_str(stdout(output).trim())
        .unwrap_or_else(|e| panic!("stdout is not one JSON value: {}\n{}", e, stdout(output)))
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ===========================================================================
// calc
// ===========================================================================

#[test]
fn test_calc_prints_answer() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["calc", "(25+75)*2"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "200");
}

#[test]
fn test_calc_json_is_single_result() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["calc", "15% of $8,500", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let value = json(&output);
    assert_eq!(value["success"], true);
    assert_eq!(value["result"], 1275.0);
    assert_eq!(value["method"], "evaluator");
    assert!(value["executionTimeMs"].is_number());
}

#[test]
fn test_calc_not_a_calculation_exit_code() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["calc", "Create a report summarizing Q3 revenue"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("not a calculation"));
}

#[test]
fn test_calc_failure_exit_code() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["calc", "10/0", "--no-fallback"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("domain_error"), "stderr: {}", stderr(&output));
}

#[test]
fn test_calc_against_document() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "sales.csv", "100\n250\n=A1+A2\n");
    let output = run(&home, &["calc", "=A3*2", "--document", arg(&csv), "--sheet", "Sales", "--json"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let value = json(&output);
    assert_eq!(value["method"], "spreadsheet");
    assert_eq!(value["result"], 700.0);
}

#[test]
fn test_calc_with_inline_data() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "data.csv", "1\n2\n3\n");
    let output = run(&home, &["calc", "=SUM(A1:A3)", "--data", arg(&csv)]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), "6");
}

#[test]
fn test_calc_sheet_requires_document() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["calc", "=A1", "--sheet", "Sales"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_calc_rejected_code() {
    let home = TempDir::new().unwrap();
    let code = write(&home, "bad.py", "import subprocess\nprint(1)\n");
    let output = run(&home, &["calc", "Convert 10 km to miles", "--code", arg(&code), "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json(&output)["errorKind"], "sandbox_rejected");
}

// ===========================================================================
// detect / eval
// ===========================================================================

#[test]
fn test_detect_json() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["detect", "average of 10, 20, 30", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let value = json(&output);
    assert_eq!(value["type"], "Statistical");
    assert!(value["confidence"].as_f64().unwrap() > 0.5);

    let output = run(&home, &["detect", "hello there"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stdout(&output).contains("type:"));
}

#[test]
fn test_eval() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["eval", "(1+2)*3"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), "9");

    let output = run(&home, &["eval", "1/0"]);
    assert_eq!(output.status.code(), Some(1));
}

// ===========================================================================
// validate / run
// ===========================================================================

#[test]
fn test_validate() {
    let home = TempDir::new().unwrap();
    let good = write(&home, "good.py", "print(sum([1, 2, 3]))\n");
    let output = run(&home, &["validate", arg(&good)]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output).trim(), "ok");

    let bad = write(&home, "bad.py", "import os\nprint(os.listdir('.'))\n");
    let output = run(&home, &["validate", arg(&bad), "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let value = json(&output);
    assert_eq!(value["valid"], false);
    assert!(value["reason"].as_str().unwrap().contains("os"));
}

#[test]
fn test_validate_missing_file() {
    let home = TempDir::new().unwrap();
    let output = run(&home, &["validate", "does-not-exist.py"]);
    assert_eq!(output.status.code(), Some(4));
}

#[cfg(unix)]
#[test]
fn test_run_with_configured_interpreter() {
    let home = TempDir::new().unwrap();
    let settings = write(&home, "settings.toml", "[sandbox]\ninterpreter = [\"sh\"]\n");
    let script = write(&home, "answer.sh", "echo 42\n");

    let output = run(&home, &["--config", arg(&settings), "run", arg(&script)]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "42\n");

    let failing = write(&home, "fail.sh", "echo oops >&2\nexit 3\n");
    let output = run(&home, &["--config", arg(&settings), "run", arg(&failing), "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let value = json(&output);
    assert_eq!(value["exitCode"], 3);
    assert_eq!(value["stderr"], "oops\n");
}

#[cfg(unix)]
#[test]
fn test_run_timeout() {
    let home = TempDir::new().unwrap();
    let settings = write(&home, "settings.toml", "[sandbox]\ninterpreter = [\"sh\"]\n");
    let script = write(&home, "slow.sh", "echo started\nexec sleep 30\n");

    let output = run(&home, &["--config", arg(&settings), "run", arg(&script), "--timeout", "200", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let value = json(&output);
    assert_eq!(value["timedOut"], true);
    assert_eq!(value["stdout"], "started\n");
}

// ===========================================================================
// sheet
// ===========================================================================

#[test]
fn test_sheet_formula_and_what_if() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "model.csv", "10\n20\n=A1+A2\n");

    let output = run(&home, &["sheet", arg(&csv), "=A3*2"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "60");

    let output = run(&home, &["sheet", arg(&csv), "=A3*2", "--what-if", "A1=100", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let value = json(&output);
    assert_eq!(value["value"], 240.0);
    assert_eq!(value["whatIf"]["cellsChanged"], 1);
}

#[test]
fn test_sheet_array_result_as_csv() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "grid.csv", "1,2\n3,4\n");
    let output = run(&home, &["sheet", arg(&csv), "=A1:B2"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "1,2\n3,4\n");
}

#[test]
fn test_sheet_error_value() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "zero.csv", "0\n");
    let output = run(&home, &["sheet", arg(&csv), "=1/A1"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output).trim(), "#DIV/0!");
    assert!(stderr(&output).contains("formula returned #DIV/0!"));
}

#[test]
fn test_sheet_bad_what_if() {
    let home = TempDir::new().unwrap();
    let csv = write(&home, "model.csv", "1\n");
    let output = run(&home, &["sheet", arg(&csv), "=A1", "--what-if", "A1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("hint:"));
}

// ===========================================================================
// config
// ===========================================================================

#[test]
fn test_config_init_show_roundtrip() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("abacus.toml");

    let output = run(&home, &["--config", arg(&path), "config", "init"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(path.exists());

    let output = run(&home, &["--config", arg(&path), "config", "show"]);
    assert_eq!(output.status.code(), Some(0));
    let shown = stdout(&output);
    assert!(shown.contains("[sandbox]"));
    assert!(shown.contains("timeout_ms = 10000"));

    // A second init refuses to clobber the file
    let output = run(&home, &["--config", arg(&path), "config", "init"]);
    assert_eq!(output.status.code(), Some(2));
    let output = run(&home, &["--config", arg(&path), "config", "init", "--force"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_config_from_env_var() {
    let home = TempDir::new().unwrap();
    let path = write(&home, "env.toml", "[detector]\nmin_confidence = 0.3\n");
    let output = abacus(&home)
        .env("ABACUS_CONFIG", &path)
        .args(["config", "path"])
        .output()
        .unwrap();
    assert_eq!(stdout(&output).trim(), arg(&path));
}

#[test]
fn test_invalid_config_is_io_error() {
    let home = TempDir::new().unwrap();
    let path = write(&home, "bad.toml", "[detector]\nmin_confidence = 7.0\n");
    let output = run(&home, &["--config", arg(&path), "calc", "1+1"]);
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("detector.min_confidence"));
}

#[test]
fn test_fallback_disabled_by_config() {
    let home = TempDir::new().unwrap();
    let path = write(&home, "nofallback.toml", "[router]\nenable_fallback = false\n");
    let output = run(&home, &["--config", arg(&path), "calc", "Convert 10 km to miles", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json(&output)["errorKind"], "parameter_missing");
}
