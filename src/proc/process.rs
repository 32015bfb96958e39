//! Public lifecycle of an engine process.
//!
//! ```text
//! Process::new ─▶ status_tags (optional) ─▶ start ─▶ execute* ─▶ quit | kill ─▶ wait
//! ```
//!
//! A [`Process`] launches the engine, attaches a [`Session`] to its pipes,
//! and maps the remaining operations onto the session or onto OS signals.

use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::proc::response::Output;
use crate::proc::session::Session;
use crate::proc::spawner::{send_signal, spawn_engine, EngineSignal};
use crate::proc::tag::Tagged;
use crate::{AppError, Result};

enum State {
    Idle,
    Running(Running),
    Failed,
}

struct Running {
    pid: u32,
    session: Session,
    child: Arc<Mutex<Child>>,
    watchdog: JoinHandle<()>,
}

/// Handle on one engine process.
pub struct Process {
    config: ProcessConfig,
    status: Option<mpsc::Sender<Tagged>>,
    status_requested: bool,
    state: State,
}

impl Process {
    /// Describe a process. Nothing is launched until [`start`](Self::start).
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: None,
            status_requested: false,
            state: State::Idle,
        }
    }

    /// Launch configuration of this process.
    #[must_use]
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Channel of session-wide status events.
    ///
    /// Must be called before [`start`](Self::start). When never called,
    /// status events are drained and dropped.
    ///
    /// # Errors
    ///
    /// `AppError::Contract` if called twice or after `start`.
    pub fn status_tags(&mut self) -> Result<mpsc::Receiver<Tagged>> {
        if !matches!(self.state, State::Idle) {
            return Err(AppError::Contract(
                "status tags must be requested before start".into(),
            ));
        }
        if self.status_requested {
            return Err(AppError::Contract(
                "status tags have already been requested".into(),
            ));
        }
        let (tx, rx) = mpsc::channel(self.config.status_buffer);
        self.status = Some(tx);
        self.status_requested = true;
        Ok(rx)
    }

    /// Launch the engine and return the Output of its startup.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the process was already started, or a
    ///   previous start failed.
    /// - `AppError::Launch` if the engine cannot be launched. The status
    ///   channel is closed and the process cannot be started again.
    /// - Any decoder error raised before the startup Output is published.
    pub async fn start(&mut self) -> Result<Output> {
        match self.state {
            State::Idle => {}
            State::Running(_) => {
                return Err(AppError::Contract("process already started".into()))
            }
            State::Failed => {
                return Err(AppError::Contract("process failed to start".into()))
            }
        }

        let status = self.status.take().unwrap_or_else(|| {
            let (tx, rx) = mpsc::channel(self.config.status_buffer);
            tokio::spawn(drain_status(rx));
            tx
        });

        let engine = match spawn_engine(&self.config) {
            Ok(engine) => engine,
            Err(err) => {
                warn!(error = %err, "engine launch failed");
                self.state = State::Failed;
                return Err(err);
            }
        };

        let pid = engine.pid;
        let (session, startup) =
            match Session::attach(engine.stdout, engine.stdin, status, self.config.event_buffer)
                .await
            {
                Ok(attached) => attached,
                Err(err) => {
                    // Dropping the child kills the engine.
                    self.state = State::Failed;
                    return Err(err);
                }
            };

        let child = Arc::new(Mutex::new(engine.child));
        let watchdog = {
            let fatal = session.fatal_token();
            let child = Arc::clone(&child);
            tokio::spawn(async move {
                fatal.cancelled().await;
                warn!(pid, "fatal protocol error, killing engine");
                if let Err(err) = child.lock().await.start_kill() {
                    debug!(pid, error = %err, "engine already gone");
                }
            })
        };

        self.state = State::Running(Running {
            pid,
            session,
            child,
            watchdog,
        });
        info!(pid, "engine process running");
        Ok(startup)
    }

    /// Submit `command` to the engine. See [`Session::execute`].
    ///
    /// # Errors
    ///
    /// `AppError::Contract` if the process is not running, plus any error
    /// from the session.
    pub async fn execute(&self, command: &str) -> Result<Output> {
        self.running()?.session.execute(command).await
    }

    /// Ask the engine to quit. See [`Session::quit`].
    ///
    /// # Errors
    ///
    /// `AppError::Contract` if the process is not running or quit was
    /// already called.
    pub async fn quit(&self) -> Result<oneshot::Receiver<()>> {
        self.running()?.session.quit().await
    }

    /// Interrupt the running statement with the platform interrupt signal.
    ///
    /// The returned receiver resolves when the engine acknowledges with
    /// `INT`.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the process is not running or an interrupt
    ///   is already awaiting acknowledgement.
    /// - `AppError::Process` if the signal cannot be delivered.
    pub fn interrupt_execution(&self) -> Result<oneshot::Receiver<()>> {
        let running = self.running()?;
        let acknowledged = running.session.register_interrupt()?;
        send_signal(running.pid, EngineSignal::Interrupt)?;
        debug!(pid = running.pid, "interrupt delivered");
        Ok(acknowledged)
    }

    /// Terminate the engine forcefully.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the process is not running.
    /// - `AppError::Process` if the signal cannot be delivered.
    pub fn kill(&self) -> Result<()> {
        let running = self.running()?;
        send_signal(running.pid, EngineSignal::Kill)?;
        info!(pid = running.pid, "engine killed");
        Ok(())
    }

    /// Wait for the session to end and the engine to exit.
    ///
    /// Intended to be called exactly once, after `quit` or `kill`.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the process was never started or `wait`
    ///   was already called.
    /// - The decoder's fatal error, if any, else the reader's.
    /// - `AppError::Process` if the engine exits unsuccessfully.
    pub async fn wait(&self) -> Result<()> {
        let running = self.running()?;
        let session = running.session.wait().await;

        let status = {
            let mut child = running.child.lock().await;
            if session.is_err() {
                // The engine may still be alive after a fatal error.
                if let Err(err) = child.start_kill() {
                    debug!(pid = running.pid, error = %err, "engine already gone");
                }
            }
            child.wait().await
        };
        running.watchdog.abort();

        session?;
        let status = status?;
        if status.success() {
            info!(pid = running.pid, "engine exited");
            Ok(())
        } else {
            Err(AppError::Process(format!("engine exited with {status}")))
        }
    }

    /// OS process id of the engine.
    ///
    /// # Errors
    ///
    /// `AppError::Contract` if the process is not running.
    pub fn pid(&self) -> Result<u32> {
        Ok(self.running()?.pid)
    }

    fn running(&self) -> Result<&Running> {
        match &self.state {
            State::Running(running) => Ok(running),
            State::Idle => Err(AppError::Contract("process not started".into())),
            State::Failed => Err(AppError::Contract("process failed to start".into())),
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Idle => "idle",
            State::Running(_) => "running",
            State::Failed => "failed",
        };
        f.debug_struct("Process")
            .field("config", &self.config)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

async fn drain_status(mut status: mpsc::Receiver<Tagged>) {
    while let Some(event) = status.recv().await {
        debug!(tag = %event.tag(), "status event dropped");
    }
}
