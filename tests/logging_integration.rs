mod support;

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use support::{CannedReply, FakeUpstream, free_local_addr};

fn parley_command(base_url: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_parley"));
    cmd.arg("hi")
        .env("VLLM_API_BASE_URL", base_url)
        .env("MODEL_TIMEOUT_SECS", "5")
        .env("RUST_LOG", "parley=info")
        .env_remove("STREAM_RESPONSE")
        .env_remove("LOG_OUTPUT")
        .env_remove("LOG_FORMAT")
        .env_remove("LOG_FILE_PATH");
    cmd
}

fn run_with_logging_env(
    log_output: &str,
    log_format: &str,
    log_file_path: Option<&Path>,
) -> Output {
    let unreachable = format!("http://{}/v1", free_local_addr());
    let mut cmd = parley_command(&unreachable);
    cmd.env("LOG_OUTPUT", log_output)
        .env("LOG_FORMAT", log_format);

    if let Some(path) = log_file_path {
        cmd.env("LOG_FILE_PATH", path);
    }

    cmd.output().expect("failed to run parley binary")
}

fn unique_temp_dir(suffix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "parley-logging-{suffix}-{stamp}-{}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("failed to create temp directory");
    dir
}

fn find_rotated_log_file(dir: &Path, base_file_name: &str) -> PathBuf {
    let expected_prefix = format!("{base_file_name}.");
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .expect("failed to read temp directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&expected_prefix))
        })
        .collect();

    matches.sort();
    matches
        .pop()
        .expect("expected a rotated log file to be created")
}

#[test]
fn json_format_emits_json_log_lines_on_stderr() {
    let output = run_with_logging_env("stderr", "json", None);
    assert!(
        !output.status.success(),
        "unreachable endpoint should fail command"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    let parsed: Vec<Value> = stderr
        .lines()
        .filter(|line| line.trim_start().starts_with('{'))
        .map(|line| serde_json::from_str::<Value>(line).expect("line should be valid JSON"))
        .collect();
    assert!(
        parsed.iter().any(|entry| {
            entry
                .get("fields")
                .and_then(|fields| fields.get("message"))
                .and_then(Value::as_str)
                == Some("loaded runtime configuration")
        }),
        "expected startup log message in JSON output, got stderr:\n{stderr}"
    );
}

#[test]
fn file_output_writes_logs_to_rotated_file() {
    let dir = unique_temp_dir("file");
    let log_path = dir.join("parley.log");
    let output = run_with_logging_env("file", "pretty", Some(&log_path));
    assert!(
        !output.status.success(),
        "unreachable endpoint should fail command"
    );

    let rotated = find_rotated_log_file(&dir, "parley.log");
    let file_contents = fs::read_to_string(&rotated).expect("failed to read rotated log file");
    assert!(
        file_contents.contains("loaded runtime configuration"),
        "expected startup log message in file, got:\n{file_contents}"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("loaded runtime configuration"),
        "did not expect normal logs on stderr for file-only mode:\n{stderr}"
    );
    assert!(
        stderr.contains("could not connect to model API"),
        "expected command error output on stderr:\n{stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn both_output_writes_logs_to_stderr_and_file() {
    let dir = unique_temp_dir("both");
    let log_path = dir.join("parley.log");
    let output = run_with_logging_env("both", "pretty", Some(&log_path));
    assert!(
        !output.status.success(),
        "unreachable endpoint should fail command"
    );

    let rotated = find_rotated_log_file(&dir, "parley.log");
    let file_contents = fs::read_to_string(&rotated).expect("failed to read rotated log file");
    assert!(
        file_contents.contains("loaded runtime configuration"),
        "expected startup log message in file, got:\n{file_contents}"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("loaded runtime configuration"),
        "expected startup log message on stderr, got:\n{stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_file_path_falls_back_to_stderr_logging() {
    let dir = unique_temp_dir("fallback");
    let blocking_file = dir.join("not-a-directory");
    fs::write(&blocking_file, "block").expect("failed to create blocking file");
    let log_path = blocking_file.join("parley.log");

    let output = run_with_logging_env("file", "pretty", Some(&log_path));
    assert!(
        !output.status.success(),
        "unreachable endpoint should fail command"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to initialize LOG_OUTPUT=file"),
        "expected fallback warning, got:\n{stderr}"
    );
    assert!(
        stderr.contains("using stderr instead"),
        "expected stderr fallback message, got:\n{stderr}"
    );
    assert!(
        stderr.contains("loaded runtime configuration"),
        "expected logs to continue on stderr after fallback, got:\n{stderr}"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn one_shot_prompt_prints_streamed_reply() {
    let upstream = FakeUpstream::start(vec![CannedReply::stream(&["Hel", "lo", " there"])]);

    let output = parley_command(&upstream.base_url())
        .env("STREAM_RESPONSE", "true")
        .output()
        .expect("failed to run parley binary");

    assert!(output.status.success(), "one-shot prompt should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "Hello there");

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["stream"], true);
    assert_eq!(requests[0]["messages"][1]["role"], "user");
    assert_eq!(requests[0]["messages"][1]["content"], "hi");
    upstream.join();
}

#[test]
fn one_shot_prompt_reports_upstream_status_failure() {
    let upstream = FakeUpstream::start(vec![CannedReply::status(
        "503 Service Unavailable",
        "model is loading",
    )]);

    let output = parley_command(&upstream.base_url())
        .env("STREAM_RESPONSE", "false")
        .output()
        .expect("failed to run parley binary");

    assert!(!output.status.success(), "503 should fail command");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("status 503") && stderr.contains("model is loading"),
        "expected status and body in error output, got:\n{stderr}"
    );
    upstream.join();
}
