//! Engine process launcher and OS signal delivery.

use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::config::ProcessConfig;
use crate::{AppError, Result};

/// A freshly launched engine with its stdio pipes taken.
#[derive(Debug)]
pub struct EngineChild {
    /// Child process handle; dropping it kills the engine.
    pub child: Child,
    /// OS process id.
    pub pid: u32,
    /// Engine's stdin.
    pub stdin: ChildStdin,
    /// Engine's stdout.
    pub stdout: ChildStdout,
}

/// Signals the driver delivers to a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSignal {
    /// Ask the engine to abandon the running statement (`SIGINT`).
    Interrupt,
    /// Terminate the engine immediately (`SIGKILL`).
    Kill,
}

/// Launch the engine described by `config`.
///
/// The default arguments come first, followed by `config.args`. When
/// `config.env` is set it replaces the inherited environment entirely.
/// stderr is discarded. On unix the engine runs in its own process group.
///
/// # Errors
///
/// Returns `AppError::Launch` if the OS refuses to start the program or a
/// pipe cannot be captured.
pub fn spawn_engine(config: &ProcessConfig) -> Result<EngineChild> {
    let program = config.executable();
    let args = config.arguments();

    let mut cmd = Command::new(program);
    cmd.args(&args);

    if let Some(env) = &config.env {
        cmd.env_clear();
        cmd.envs(env);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    // Terminal signals reach the engine only through `send_signal`.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("starting {program}: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Launch(format!("{program} exited during launch")))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture engine stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture engine stdout".into()))?;

    info!(pid, program, ?args, "engine process started");

    Ok(EngineChild {
        child,
        pid,
        stdin,
        stdout,
    })
}

/// Deliver `signal` to the process `pid`.
///
/// # Errors
///
/// Returns `AppError::Process` if delivery fails, or on platforms without
/// POSIX signals.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: EngineSignal) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
    let sig = match signal {
        EngineSignal::Interrupt => Signal::SIGINT,
        EngineSignal::Kill => Signal::SIGKILL,
    };
    kill(Pid::from_raw(raw), sig)
        .map_err(|err| AppError::Process(format!("sending {sig} to {pid}: {err}")))
}

/// Deliver `signal` to the process `pid`.
///
/// # Errors
///
/// Always returns `AppError::Process`: signals are unsupported here.
#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: EngineSignal) -> Result<()> {
    Err(AppError::Process(format!(
        "cannot deliver {signal:?} to {pid}: signals are unsupported on this platform"
    )))
}
