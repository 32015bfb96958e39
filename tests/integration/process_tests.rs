//! Integration tests for the process lifecycle against scripted engines.
//!
//! Each engine is a small shell script that prints tag lines with `printf`
//! and reads commands byte-counted with `dd`. Tests run serially: writing
//! an executable while another test forks can fail with `ETXTBSY`.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;
use tokio::time::timeout;

use magma_proc::proc::{Process, ResponseKind, Tag, Tagged};
use magma_proc::{AppError, ProcessConfig};

use super::test_helpers::{collect, line_data, next_response, STEP_TIMEOUT};

/// Banner line then the first `RDY`.
const GREETING: &str = r"printf '\201OUT 0\201Fake engine\n\201RDY 0 0 0 0 0\n'";

/// Consume `quit;^D` and acknowledge it.
const QUIT_REPLY: &str = r"dd bs=1 count=6 >/dev/null 2>&1
printf '\201IR\n\201QUIT\n'";

fn write_engine(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-magma");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write engine script");
    let mut permissions = std::fs::metadata(&path)
        .expect("script metadata")
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("make script executable");
    path
}

fn config_for(path: &Path) -> ProcessConfig {
    ProcessConfig {
        command: Some(path.to_string_lossy().into_owned()),
        ..ProcessConfig::default()
    }
}

async fn startup_lines(process: &mut Process) -> Vec<String> {
    let mut startup = timeout(STEP_TIMEOUT, process.start())
        .await
        .expect("start within timeout")
        .expect("start engine");
    let response = next_response(&mut startup).await.expect("startup response");
    assert_eq!(response.kind(), ResponseKind::Startup);
    line_data(&collect(response).await)
        .into_iter()
        .map(str::to_owned)
        .collect()
}

// ── Launch ───────────────────────────────────────────────────────────────────

/// Execute, quit and wait against a well-behaved engine.
#[tokio::test]
#[serial]
async fn full_lifecycle_with_quit() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r"{GREETING}
dd bs=1 count=9 >/dev/null 2>&1
printf '\201IR\n\201RUN 0 0 0 0 0 8\n\201OUT 0\2011\n\201RDY 0 0 0 0 0\n'
{QUIT_REPLY}"
    );
    let mut process = Process::new(config_for(&write_engine(&dir, &script)));
    let mut status = process.status_tags().expect("status tags");

    assert_eq!(startup_lines(&mut process).await, vec!["Fake engine"]);
    assert!(process.pid().expect("pid") > 0);

    let mut output = process.execute("print 1;").await.expect("execute");
    let response = next_response(&mut output).await.expect("run response");
    assert_eq!(response.command(), "print 1;");
    assert_eq!(line_data(&collect(response).await), vec!["1"]);

    let acknowledged = process.quit().await.expect("quit");
    timeout(STEP_TIMEOUT, acknowledged)
        .await
        .expect("ack within timeout")
        .expect("quit acknowledged");
    timeout(STEP_TIMEOUT, process.wait())
        .await
        .expect("wait within timeout")
        .expect("engine exits cleanly");

    let mut tags = Vec::new();
    while let Ok(Some(event)) = timeout(STEP_TIMEOUT, status.recv()).await {
        tags.push(event.tag());
    }
    assert_eq!(
        tags,
        vec![
            Tag::Ready,
            Tag::InputReceived,
            Tag::Run,
            Tag::Ready,
            Tag::InputReceived,
            Tag::Quit
        ]
    );
}

/// Default arguments come first; a configured environment replaces the
/// inherited one.
#[tokio::test]
#[serial]
async fn arguments_and_environment_reach_the_engine() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"printf '\201OUT 0\201%s\n' "$*" "${{FAKE_ENGINE_VALUE:-unset}}" "${{HOME:-no home}}"
printf '\201RDY 0 0 0 0 0\n'
{QUIT_REPLY}"#
    );
    let path = write_engine(&dir, &script);

    let mut env = BTreeMap::new();
    env.insert("FAKE_ENGINE_VALUE".to_owned(), "configured".to_owned());
    env.insert("PATH".to_owned(), std::env::var("PATH").unwrap_or_default());
    let config = ProcessConfig {
        args: vec!["-S".into(), "42".into()],
        env: Some(env),
        ..config_for(&path)
    };
    let mut process = Process::new(config);

    assert_eq!(
        startup_lines(&mut process).await,
        vec!["-x -n -b -S 42", "configured", "no home"]
    );

    let acknowledged = process.quit().await.expect("quit");
    timeout(STEP_TIMEOUT, acknowledged)
        .await
        .expect("ack within timeout")
        .expect("quit acknowledged");
    process.wait().await.expect("clean exit");
}

/// A program that cannot be launched is a launch error, and the process
/// cannot be used afterwards.
#[tokio::test]
#[serial]
async fn launch_failure_is_terminal() {
    let mut process = Process::new(config_for(Path::new("/nonexistent/fake-magma")));

    let err = process.start().await.expect_err("launch fails");
    assert!(matches!(err, AppError::Launch(_)), "got {err}");

    assert!(matches!(process.start().await, Err(AppError::Contract(_))));
    assert!(matches!(process.execute("1;").await, Err(AppError::Contract(_))));
    assert!(matches!(process.pid(), Err(AppError::Contract(_))));
    assert!(matches!(process.wait().await, Err(AppError::Contract(_))));
}

// ── Contracts ────────────────────────────────────────────────────────────────

/// Status tags may be requested once, and only before start.
#[tokio::test]
#[serial]
async fn status_tags_contract() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_engine(&dir, &format!("{GREETING}\nexec sleep 30"));
    let mut process = Process::new(config_for(&path));

    let _status = process.status_tags().expect("first request");
    assert!(matches!(process.status_tags(), Err(AppError::Contract(_))));

    startup_lines(&mut process).await;
    assert!(matches!(process.status_tags(), Err(AppError::Contract(_))));
    assert!(matches!(process.start().await, Err(AppError::Contract(_))));

    process.kill().expect("kill");
    let _ = timeout(STEP_TIMEOUT, process.wait())
        .await
        .expect("wait within timeout");
}

/// Operations on a process that was never started are contract errors.
#[tokio::test]
async fn operations_before_start_are_rejected() {
    let process = Process::new(ProcessConfig::default());
    assert!(matches!(process.pid(), Err(AppError::Contract(_))));
    assert!(matches!(process.kill(), Err(AppError::Contract(_))));
    assert!(matches!(
        process.interrupt_execution(),
        Err(AppError::Contract(_))
    ));
    assert!(matches!(process.quit().await, Err(AppError::Contract(_))));
    assert!(matches!(process.wait().await, Err(AppError::Contract(_))));
}

// ── Signals ──────────────────────────────────────────────────────────────────

/// Kill ends the engine; the session reports the stream ending without
/// `QUIT`.
#[tokio::test]
#[serial]
async fn kill_terminates_the_engine() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_engine(&dir, &format!("{GREETING}\nexec sleep 30"));
    let mut process = Process::new(config_for(&path));
    startup_lines(&mut process).await;

    process.kill().expect("kill");
    let err = timeout(STEP_TIMEOUT, process.wait())
        .await
        .expect("wait within timeout")
        .expect_err("killed engine");
    assert!(matches!(err, AppError::Protocol(_)), "got {err}");
}

/// The interrupt signal reaches the engine and `INT` acknowledges it.
#[tokio::test]
#[serial]
async fn interrupt_is_acknowledged_by_the_engine() {
    let dir = TempDir::new().expect("temp dir");
    let script = format!(
        r#"trap 'printf "\201INT\n"' INT
{GREETING}
while :; do sleep 0.1; done"#
    );
    let mut process = Process::new(config_for(&write_engine(&dir, &script)));
    let mut status = process.status_tags().expect("status tags");
    startup_lines(&mut process).await;

    let acknowledged = process.interrupt_execution().expect("interrupt");
    timeout(STEP_TIMEOUT, acknowledged)
        .await
        .expect("ack within timeout")
        .expect("interrupt acknowledged");

    let mut saw_interrupt = false;
    while let Ok(Some(event)) = timeout(STEP_TIMEOUT, status.recv()).await {
        if matches!(event, Tagged::Status(ref s) if s.tag == Tag::Interrupt) {
            saw_interrupt = true;
            break;
        }
    }
    assert!(saw_interrupt);

    process.kill().expect("kill");
    let _ = timeout(STEP_TIMEOUT, process.wait())
        .await
        .expect("wait within timeout");
}
