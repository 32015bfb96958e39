//! Execution handles and the per-execution response multiplexer.
//!
//! One call to [`Session::execute`](crate::proc::Session::execute) yields an
//! [`Output`]. The engine may run several top-level statements for a single
//! submission; each becomes one [`Response`] on the Output's channel, and each
//! Response carries the [`Tagged`] events that statement produced.
//!
//! The decoder side of these channels is owned by [`ResponseHandler`], which
//! guarantees that at most one Response accepts events at a time and that
//! every Response is closed exactly once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::proc::tag::{Position, Tagged};
use crate::{AppError, Result};

/// Capacity of the channel carrying an Output's Responses.
const RESPONSE_BUFFER: usize = 8;

/// Random seed snapshot reported when a statement starts running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Seed {
    /// Seed value.
    pub seed: u64,
    /// Number of steps taken from the seed.
    pub step: u64,
}

/// Half-open span of the submitted text, from `start` up to `end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chunk {
    /// First position covered.
    pub start: Position,
    /// Position just past the span.
    pub end: Position,
}

impl Chunk {
    /// Resolve the span against the text it indexes.
    ///
    /// Returns `None` if either position lies outside `input`.
    #[must_use]
    pub fn resolve<'a>(&self, input: &'a str) -> Option<&'a str> {
        let start = byte_offset(input, self.start)?;
        let end = byte_offset(input, self.end)?;
        if end < start {
            return None;
        }
        input.get(start..end)
    }
}

/// Byte offset of `pos` in `input`, where columns count bytes within a row.
fn byte_offset(input: &str, pos: Position) -> Option<usize> {
    let mut offset = 0;
    for (row, line) in input.split('\n').enumerate() {
        if row == pos.row {
            return (pos.column <= line.len()).then_some(offset + pos.column);
        }
        offset += line.len() + 1;
    }
    None
}

/// Variant of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Output produced while the engine was starting up.
    Startup,
    /// A statement ran.
    Run(Seed),
    /// A statement failed to parse.
    ParseError,
    /// The engine failed internally before any statement ran.
    InternalError,
}

/// Output of one top-level statement.
#[derive(Debug)]
pub struct Response {
    kind: ResponseKind,
    chunk: Option<Chunk>,
    source: Arc<str>,
    events: mpsc::Receiver<Tagged>,
}

impl Response {
    /// Which kind of response this is.
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Span of the submitted text that produced this response, if known.
    #[must_use]
    pub fn chunk(&self) -> Option<Chunk> {
        self.chunk
    }

    /// The part of the submitted command that produced this response.
    ///
    /// Empty for startup and internal-error responses, and for chunks that
    /// do not fit the submitted text.
    #[must_use]
    pub fn command(&self) -> &str {
        self.chunk
            .and_then(|chunk| chunk.resolve(&self.source))
            .unwrap_or_default()
    }

    /// Receive the next event, or `None` once the response is complete.
    pub async fn next_event(&mut self) -> Option<Tagged> {
        self.events.recv().await
    }

    /// Collect every remaining event until the response is complete.
    pub async fn collect(mut self) -> Vec<Tagged> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    /// Give up the typed wrapper and take the raw event channel.
    #[must_use]
    pub fn into_events(self) -> mpsc::Receiver<Tagged> {
        self.events
    }
}

/// Everything the engine produced in reaction to one submitted command.
#[derive(Debug)]
pub struct Output {
    command: Arc<str>,
    responses: mpsc::Receiver<Response>,
}

impl Output {
    /// The submitted command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Receive the next response, or `None` once the command is fully
    /// processed.
    pub async fn next_response(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Give up the typed wrapper and take the raw response channel.
    #[must_use]
    pub fn into_responses(self) -> mpsc::Receiver<Response> {
        self.responses
    }

    /// Flatten every response into one ordered event stream.
    ///
    /// Spawns a forwarding task on the current tokio runtime.
    #[must_use]
    pub fn combine(self) -> mpsc::Receiver<Tagged> {
        combine(self.responses)
    }

    /// Drain and drop all output in the background.
    pub fn discard(self) {
        discard(self.combine());
    }
}

/// Flatten a stream of responses into one ordered event stream.
#[must_use]
pub fn combine(mut responses: mpsc::Receiver<Response>) -> mpsc::Receiver<Tagged> {
    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
    tokio::spawn(async move {
        while let Some(mut response) = responses.recv().await {
            while let Some(event) = response.next_event().await {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });
    rx
}

/// Drain `events` in the background, dropping everything received.
pub fn discard(mut events: mpsc::Receiver<Tagged>) {
    tokio::spawn(async move { while events.recv().await.is_some() {} });
}

/// Decoder-side half of an [`Output`].
#[derive(Debug)]
pub(crate) struct OutputSink {
    command: Arc<str>,
    responses: mpsc::Sender<Response>,
}

/// Create a connected [`OutputSink`] / [`Output`] pair for `command`.
pub(crate) fn new_output(command: &str) -> (OutputSink, Output) {
    let command: Arc<str> = Arc::from(command);
    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
    (
        OutputSink {
            command: Arc::clone(&command),
            responses: tx,
        },
        Output {
            command,
            responses: rx,
        },
    )
}

/// Owns the current Output and current Response of one execution cycle.
///
/// Only the decoder task touches a handler. Dropping a sender closes the
/// matching channel, so "close" is always `take()` followed by a drop.
#[derive(Debug)]
pub(crate) struct ResponseHandler {
    output: Option<OutputSink>,
    current: Option<mpsc::Sender<Tagged>>,
    event_buffer: usize,
}

impl ResponseHandler {
    pub(crate) fn new(event_buffer: usize) -> Self {
        Self {
            output: None,
            current: None,
            event_buffer: event_buffer.max(1),
        }
    }

    /// Bind a new Output.
    pub(crate) fn init(&mut self, output: OutputSink) -> Result<()> {
        if self.output.is_some() {
            return Err(AppError::Protocol(
                "an output is already bound to the current execution".into(),
            ));
        }
        self.output = Some(output);
        Ok(())
    }

    /// True while an Output is bound.
    pub(crate) fn is_bound(&self) -> bool {
        self.output.is_some()
    }

    /// Finalize the current Response and Output.
    ///
    /// Returns whether an Output was bound, i.e. whether the engine is now
    /// free to accept the next command.
    pub(crate) fn ready(&mut self) -> bool {
        self.current = None;
        self.output.take().is_some()
    }

    /// Force-close anything still open.
    pub(crate) fn close(&mut self) {
        self.current = None;
        self.output = None;
    }

    pub(crate) async fn start(&mut self) -> Result<()> {
        self.open(ResponseKind::Startup, None).await
    }

    pub(crate) async fn run(&mut self, chunk: Chunk, seed: Seed) -> Result<()> {
        self.open(ResponseKind::Run(seed), Some(chunk)).await
    }

    pub(crate) async fn parse_error(&mut self, chunk: Chunk) -> Result<()> {
        self.open(ResponseKind::ParseError, Some(chunk)).await
    }

    /// Open an internal-error Response unless one is already open; an open
    /// Response gives a better context for the error.
    pub(crate) async fn internal_error(&mut self) -> Result<()> {
        if self.current.is_none() {
            self.open(ResponseKind::InternalError, None).await?;
        }
        Ok(())
    }

    /// Forward an event to the current Response.
    pub(crate) async fn send(&mut self, event: Tagged) -> Result<()> {
        let current = self.current.as_ref().ok_or_else(|| {
            AppError::Protocol(format!("{} output received with no open response", event.tag()))
        })?;
        if current.send(event).await.is_err() {
            debug!("response receiver dropped, discarding event");
        }
        Ok(())
    }

    async fn open(&mut self, kind: ResponseKind, chunk: Option<Chunk>) -> Result<()> {
        // A new response always supersedes an unfinished one.
        self.current = None;

        let output = self.output.as_ref().ok_or_else(|| {
            AppError::Protocol("response opened with no output bound".into())
        })?;

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let response = Response {
            kind,
            chunk,
            source: Arc::clone(&output.command),
            events: rx,
        };
        if output.responses.send(response).await.is_err() {
            debug!(?kind, "output receiver dropped, discarding response");
        }
        self.current = Some(tx);
        Ok(())
    }
}
