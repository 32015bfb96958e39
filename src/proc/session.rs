//! A running protocol session over a pair of engine streams.
//!
//! [`Session`] owns the two background tasks of a session (the stdout
//! reader and the decoder) and implements the caller's half of the
//! execution handshake. It is independent of how the engine was launched:
//! [`Process`](crate::proc::Process) attaches one to a child's pipes, and
//! tests attach one to in-memory streams.
//!
//! The status channel passed to [`Session::attach`] must be drained, or
//! decoding stalls once it fills up.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::proc::codec::EngineInput;
use crate::proc::decoder::{Acknowledger, Decoder, HandshakeSlot, PendingOutput};
use crate::proc::reader::run_reader;
use crate::proc::response::{new_output, Output, ResponseHandler};
use crate::proc::tag::Tagged;
use crate::proc::writer::InputWriter;
use crate::{AppError, Result};

/// Capacity of the channel between the reader and the decoder.
const LINE_BUFFER: usize = 64;

/// Command text that asks the engine to end the session.
const QUIT_COMMAND: &str = "quit;";

struct SessionTasks {
    reader: JoinHandle<Result<()>>,
    decoder: JoinHandle<Result<()>>,
}

/// Handle on a live engine session.
pub struct Session {
    input: InputWriter,
    // Handshake slots offered on `RDY`; the lock serializes `execute`.
    ready: Mutex<mpsc::Receiver<HandshakeSlot>>,
    interrupts: mpsc::Sender<Acknowledger>,
    quits: mpsc::Sender<Acknowledger>,
    quit_called: AtomicBool,
    fatal: CancellationToken,
    tasks: Mutex<Option<SessionTasks>>,
}

impl Session {
    /// Start the reader and decoder on the engine's `stdout` and `stdin`.
    ///
    /// Status events are delivered to `status`; `event_buffer` bounds each
    /// Response's event channel. Returns the session together with the
    /// Output collecting everything the engine prints before its first
    /// `RDY`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error if the session ends before the startup
    /// Output is published.
    pub async fn attach<R, W>(
        stdout: R,
        stdin: W,
        status: mpsc::Sender<Tagged>,
        event_buffer: usize,
    ) -> Result<(Self, Output)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let input = InputWriter::new(stdin);
        let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER);
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (startup_tx, startup_rx) = oneshot::channel();
        let (interrupts_tx, interrupts_rx) = mpsc::channel(1);
        let (quits_tx, quits_rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        let fatal = CancellationToken::new();

        let reader = tokio::spawn(run_reader(stdout, lines_tx, stop.clone()));

        let decoder = Decoder {
            handler: ResponseHandler::new(event_buffer),
            status,
            ready: ready_tx,
            startup: Some(startup_tx),
            interrupts: interrupts_rx,
            quits: quits_rx,
            input: input.clone(),
            pending: None,
        };
        let decoder = {
            let fatal = fatal.clone();
            tokio::spawn(async move {
                let result = decoder.run(lines_rx).await;
                if result.is_err() {
                    fatal.cancel();
                }
                // Nothing downstream is listening any more.
                stop.cancel();
                result
            })
        };

        let session = Self {
            input,
            ready: Mutex::new(ready_rx),
            interrupts: interrupts_tx,
            quits: quits_tx,
            quit_called: AtomicBool::new(false),
            fatal,
            tasks: Mutex::new(Some(SessionTasks { reader, decoder })),
        };

        match startup_rx.await {
            Ok(output) => {
                info!("engine session attached");
                Ok((session, output))
            }
            Err(_) => {
                session.wait().await?;
                Err(AppError::Protocol(
                    "session ended before the startup output".into(),
                ))
            }
        }
    }

    /// Submit `command` and return its [`Output`] once the engine has
    /// acknowledged it.
    ///
    /// Waits for the engine to become ready first. Calls are serialized.
    ///
    /// Dropping the returned future before it completes is safe for later
    /// calls: an Output acknowledged after its caller has gone is discarded
    /// and never returned to another call. If the command was already
    /// written, the engine still runs it.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the session has completed.
    /// - `AppError::Io` if the command cannot be written.
    /// - `AppError::Protocol` if the session ends before acknowledging it.
    pub async fn execute(&self, command: &str) -> Result<Output> {
        let mut ready = self.ready.lock().await;
        let completed =
            || AppError::Contract("execute called after the session has completed".into());

        let slot = ready.recv().await.ok_or_else(completed)?;
        let (sink, output) = new_output(command);
        let (reply, published) = oneshot::channel();
        slot.send(PendingOutput {
            sink,
            output,
            reply,
        })
        .map_err(|_| completed())?;

        self.input
            .send(EngineInput::Command(command.to_owned()))
            .await?;

        let output = published.await.map_err(|_| {
            AppError::Protocol("output not returned before the session completed".into())
        })?;
        debug!(command, "session: command acknowledged");
        Ok(output)
    }

    /// Ask the engine to end the session with `quit;`.
    ///
    /// Output following the command is discarded. The returned receiver
    /// resolves once the engine acknowledges with `QUIT`.
    ///
    /// Quit is attempted once per session. If it fails, for instance because
    /// `quit;` could not be written, later calls still return
    /// `AppError::Contract`; end the session with [`wait`](Self::wait) after
    /// stopping the engine some other way.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if quit was already called or the session has
    ///   completed.
    /// - Any error from [`execute`](Self::execute).
    pub async fn quit(&self) -> Result<oneshot::Receiver<()>> {
        if self.quit_called.swap(true, Ordering::SeqCst) {
            return Err(AppError::Contract("quit has already been called".into()));
        }
        let acknowledged = register(&self.quits, "quit")?;
        self.execute(QUIT_COMMAND).await?.discard();
        info!("engine session quitting");
        Ok(acknowledged)
    }

    /// Register for the acknowledgement of an interrupt about to be
    /// delivered to the engine.
    ///
    /// The returned receiver resolves when the engine reports `INT`.
    ///
    /// # Errors
    ///
    /// `AppError::Contract` if an interrupt is already awaiting its
    /// acknowledgement or the session has completed.
    pub fn register_interrupt(&self) -> Result<oneshot::Receiver<()>> {
        register(&self.interrupts, "interrupt")
    }

    /// Token cancelled when the decoder ends with a fatal error.
    #[must_use]
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Wait for both background tasks to end and release the session.
    ///
    /// A decoder error takes precedence over a reader error.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` on a second call.
    /// - The first error reported by the decoder or the reader.
    pub async fn wait(&self) -> Result<()> {
        let tasks = self
            .tasks
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Contract("wait has already been called".into()))?;

        let decoder = join("decoder", tasks.decoder).await;
        let reader = join("reader", tasks.reader).await;

        self.input.close().await;
        self.ready.lock().await.close();

        if let Err(err) = &reader {
            if decoder.is_err() {
                debug!(error = %err, "session: reader error superseded by decoder error");
            }
        }
        decoder.and(reader)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("quit_called", &self.quit_called)
            .finish_non_exhaustive()
    }
}

fn register(
    queue: &mpsc::Sender<Acknowledger>,
    what: &str,
) -> Result<oneshot::Receiver<()>> {
    let (ack, acknowledged) = oneshot::channel();
    queue.try_send(ack).map_err(|err| match err {
        TrySendError::Full(_) => {
            AppError::Contract(format!("{what} is already awaiting acknowledgement"))
        }
        TrySendError::Closed(_) => {
            AppError::Contract(format!("{what} called after the session has completed"))
        }
    })?;
    Ok(acknowledged)
}

async fn join(name: &str, handle: JoinHandle<Result<()>>) -> Result<()> {
    handle.await.unwrap_or_else(|err| {
        warn!(task = name, error = %err, "session task did not complete");
        Err(AppError::Process(format!("{name} task failed: {err}")))
    })
}
