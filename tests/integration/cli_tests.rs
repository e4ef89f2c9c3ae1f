//! End-to-end tests for the peakmem binary
//!
//! These run the real binary against small shell commands and check that the
//! child's streams and exit status pass through untouched.

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn peakmem() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_peakmem"));
    cmd.env_remove("PEAKMEM_LOG");
    cmd
}

/// A backend that does not depend on `ps` being installed
fn backend() -> &'static str {
    if cfg!(target_os = "linux") {
        "procfs"
    } else {
        "sysinfo"
    }
}

fn run(args: &[&str]) -> Output {
    peakmem()
        .args(["--backend", backend(), "--interval", "50"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run peakmem")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_stdout_is_forwarded_verbatim() {
    let output = run(&["printf", "line one\nline two"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"line one\nline two");
    assert!(stderr(&output).contains("Max memory use:"));
}

#[test]
fn test_child_stderr_precedes_report() {
    let output = run(&["sh", "-c", "echo oops >&2"]);

    let text = stderr(&output);
    let child_line = text.find("oops").expect("child stderr missing");
    let report_line = text.find("Max memory use:").expect("report missing");
    assert!(child_line < report_line);
    assert!(output.stdout.is_empty());
}

#[test]
fn test_stdin_is_forwarded_byte_for_byte() {
    let payload: Vec<u8> = (0u8..=255).cycle().take(64 * 1024).collect();
    let mut input = tempfile::tempfile().unwrap();
    input.write_all(&payload).unwrap();
    std::io::Seek::rewind(&mut input).unwrap();

    let output = peakmem()
        .args(["--backend", backend(), "cat"])
        .stdin(Stdio::from(input))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, payload);
}

#[test]
fn test_exit_code_passthrough() {
    let output = run(&["sh", "-c", "exit 7"]);
    assert_eq!(output.status.code(), Some(7));
    assert!(stderr(&output).contains("Child exited with status: 7"));
}

#[cfg(unix)]
#[test]
fn test_signal_exit_code() {
    let output = run(&["sh", "-c", "kill -TERM $$"]);
    assert_eq!(output.status.code(), Some(128 + 15));
    assert!(stderr(&output).contains("Child terminated by signal: 15"));
}

#[test]
fn test_missing_command() {
    let output = run(&["peakmem-definitely-not-a-command", "--flag"]);

    assert_eq!(output.status.code(), Some(127));
    let text = stderr(&output);
    assert!(text.contains("failed to run 'peakmem-definitely-not-a-command'"));
    assert!(!text.contains("Max memory use"));
}

#[test]
fn test_missing_command_with_report_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.txt");

    let output = run(&[
        "--output",
        path.to_str().unwrap(),
        "peakmem-definitely-not-a-command",
    ]);

    assert_eq!(output.status.code(), Some(127));
    let text = stderr(&output);
    assert_eq!(text.matches("failed to run").count(), 1);
    assert!(std::fs::read_to_string(&path).unwrap().is_empty());
}

#[test]
fn test_zero_interval_is_rejected() {
    let output = peakmem()
        .args(["--interval", "0", "true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(125));
}

#[test]
fn test_arguments_are_not_shell_expanded() {
    let output = run(&["echo", "$HOME", "*", "-n"]);
    assert_eq!(output.stdout, b"$HOME * -n\n");
}

#[test]
fn test_json_report_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");

    let output = run(&[
        "--json",
        "--output",
        path.to_str().unwrap(),
        "sh",
        "-c",
        "sleep 0.3; exit 2",
    ]);

    assert_eq!(output.status.code(), Some(2));
    assert!(!stderr(&output).contains("Max memory use"));

    let text = std::fs::read_to_string(&path).unwrap();
    let report: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(report["exit_code"], 2);
    assert_eq!(report["outcome"]["exited"]["code"], 2);
    assert!(report["peak_rss_kb"].as_u64().unwrap() > 0);
    assert!(report["peak"]["ticks"]["attempted"].as_u64().unwrap() >= 2);
    assert_eq!(report["peak"]["ticks"]["parse_failures"], 0);
}

#[test]
fn test_megabyte_unit() {
    let output = run(&["--unit", "mb", "true"]);
    let text = stderr(&output);
    assert!(text.contains(" MB"), "unexpected report: {}", text);
}

#[test]
fn test_ps_backend() {
    let has_ps = Command::new("ps")
        .args(["-o", "pid="])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !has_ps {
        return;
    }

    let output = peakmem()
        .args(["--backend", "ps", "--interval", "50", "sleep", "0.3"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let text = stderr(&output);
    assert!(text.contains("Max memory use:"));
    assert!(!text.contains("n/a"));
}
