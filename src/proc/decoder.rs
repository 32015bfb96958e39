//! Protocol state machine.
//!
//! A single long-lived task reads framed lines in order and classifies each
//! tag as a status signal or output. Status signals go to the session-wide
//! status channel and drive the execution handshake; output is routed to the
//! current [`Response`](crate::proc::Response) through the
//! [`ResponseHandler`].
//!
//! # Handshake
//!
//! | Tag    | Effect                                                        |
//! |--------|---------------------------------------------------------------|
//! | `RDY`  | finalize the current Output; offer a slot for the next command |
//! | `IR`   | bind the Output waiting in the slot and publish it            |
//! | `RUN`  | open a `Run` response                                         |
//! | `ERP`  | open a `ParseError` response                                  |
//! | `INT`  | acknowledge a pending interrupt, if any                       |
//! | `QUIT` | acknowledge a pending quit, if any, and stop decoding         |
//!
//! Any malformed field ends the task with `AppError::Protocol`.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::proc::codec::{parse_tag_line, EngineInput, TagLine};
use crate::proc::response::{new_output, Chunk, Output, OutputSink, ResponseHandler, Seed};
use crate::proc::tag::{Line, Position, ReadRequest, Ready, Status, Tag, Tagged};
use crate::proc::writer::InputWriter;
use crate::{AppError, Result};

/// Command text attributed to output produced before the first `RDY`.
pub const STARTUP_COMMAND: &str = "<startup>";

/// Auxiliary field marking a line as the continuation of the previous one.
const CONTINUATION_FIELD: &str = "C";

/// An Output created by `execute`, waiting for the engine's `IR`.
///
/// `reply` belongs to the one call that created it; if that call has gone
/// away, the Output is discarded rather than handed to the next caller.
#[derive(Debug)]
pub(crate) struct PendingOutput {
    pub(crate) sink: OutputSink,
    pub(crate) output: Output,
    pub(crate) reply: oneshot::Sender<Output>,
}

/// Single-use slot through which `execute` hands over its Output.
pub(crate) type HandshakeSlot = oneshot::Sender<PendingOutput>;

/// Closed-by-send acknowledgement of an interrupt or quit.
pub(crate) type Acknowledger = oneshot::Sender<()>;

enum Flow {
    Continue,
    Finished,
}

/// Decoder task state. Built by the session, consumed by [`Decoder::run`].
pub(crate) struct Decoder {
    pub(crate) handler: ResponseHandler,
    pub(crate) status: mpsc::Sender<Tagged>,
    pub(crate) ready: mpsc::Sender<HandshakeSlot>,
    pub(crate) startup: Option<oneshot::Sender<Output>>,
    pub(crate) interrupts: mpsc::Receiver<Acknowledger>,
    pub(crate) quits: mpsc::Receiver<Acknowledger>,
    pub(crate) input: InputWriter,
    pub(crate) pending: Option<oneshot::Receiver<PendingOutput>>,
}

impl Decoder {
    /// Decode `lines` until `QUIT` or a fatal error.
    ///
    /// Whatever the outcome, every open Response and Output is closed before
    /// returning, and dropping `self` closes the status channel.
    pub(crate) async fn run(mut self, mut lines: mpsc::Receiver<Bytes>) -> Result<()> {
        let result = self.decode(&mut lines).await;
        self.handler.close();
        match &result {
            Ok(()) => debug!("decoder: session finished"),
            Err(err) => warn!(error = %err, "decoder: fatal protocol error"),
        }
        result
    }

    async fn decode(&mut self, lines: &mut mpsc::Receiver<Bytes>) -> Result<()> {
        // Everything before the first RDY belongs to the startup output.
        let (sink, output) = new_output(STARTUP_COMMAND);
        self.handler.init(sink)?;
        if let Some(reply) = self.startup.take() {
            publish(reply, output);
        }
        self.handler.start().await?;

        loop {
            let raw = lines
                .recv()
                .await
                .ok_or_else(|| AppError::Protocol("stream ended awaiting a tag line".into()))?;

            let Some(line) = parse_tag_line(&raw) else {
                continue;
            };
            let Some(tag) = Tag::from_name(&line.name) else {
                debug!(tag = %line.name, "decoder: ignoring unknown tag");
                continue;
            };

            if let Flow::Finished = self.dispatch(tag, &line, lines).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(
        &mut self,
        tag: Tag,
        line: &TagLine,
        lines: &mut mpsc::Receiver<Bytes>,
    ) -> Result<Flow> {
        match tag {
            Tag::Ready => {
                let ready = parse_ready(&line.fields)?;
                self.emit_status(Tagged::Ready(ready)).await;
                if self.handler.ready() {
                    self.offer_handshake().await;
                }
            }

            Tag::InputReceived => {
                self.emit_status(Tagged::Status(Status { tag })).await;
                self.complete_handshake().await?;
            }

            Tag::Reset => {
                self.emit_status(Tagged::Status(Status { tag })).await;
            }

            Tag::Quit => {
                self.emit_status(Tagged::Status(Status { tag })).await;
                match self.quits.try_recv() {
                    Ok(ack) => {
                        let _ = ack.send(());
                    }
                    // Two interrupts delivered straight to the engine make
                    // it quit on its own.
                    Err(_) => debug!("decoder: unsolicited QUIT"),
                }
                return Ok(Flow::Finished);
            }

            Tag::Interrupt => {
                self.emit_status(Tagged::Status(Status { tag })).await;
                match self.interrupts.try_recv() {
                    Ok(ack) => {
                        let _ = ack.send(());
                    }
                    Err(_) => debug!("decoder: unsolicited INT"),
                }
            }

            Tag::Run => {
                self.emit_status(Tagged::Status(Status { tag })).await;
                let (chunk, seed) = parse_run(&line.fields)?;
                self.handler.run(chunk, seed).await?;
            }

            Tag::ErrorParse => {
                self.emit_status(Tagged::Status(Status { tag })).await;
                let chunk = parse_chunk(&line.fields)
                    .map_err(|err| AppError::Protocol(format!("ERP chunk: {err}")))?;
                self.handler.parse_error(chunk).await?;
            }

            Tag::ErrorHistoryPosition => {
                let position = parse_position(&line.fields)?;
                self.handler.send(Tagged::Position(position)).await?;
            }

            Tag::Output
            | Tag::List
            | Tag::ErrorUser
            | Tag::ErrorRuntime
            | Tag::ErrorInternal
            | Tag::ErrorPosition
            | Tag::Traceback
            | Tag::Signature => {
                let output = parse_output_line(tag, line)?;
                if tag == Tag::ErrorInternal {
                    self.handler.internal_error().await?;
                }
                self.handler.send(Tagged::Line(output)).await?;
            }

            Tag::ErrorSyntax => {
                let empty = Line {
                    tag,
                    continuation: false,
                    indent: 0,
                    data: String::new(),
                };
                self.handler.send(Tagged::Line(empty)).await?;
            }

            Tag::ReadPrompt | Tag::ReadIntPrompt => {
                self.read_prompt(tag, line, lines).await?;
            }

            Tag::ReadInput | Tag::ReadIntInput | Tag::ReadIntError | Tag::DebugReady => {
                debug!(%tag, "decoder: ignoring tag outside its sub-protocol");
            }
        }
        Ok(Flow::Continue)
    }

    /// Offer a slot for the next `execute` call.
    async fn offer_handshake(&mut self) {
        let (slot, pending) = oneshot::channel();
        if self.ready.send(slot).await.is_err() {
            debug!("decoder: no session listening for the handshake");
        }
        self.pending = Some(pending);
        debug!("decoder: handshake offered");
    }

    /// Bind the Output handed over by `execute` and publish it.
    async fn complete_handshake(&mut self) -> Result<()> {
        let mut pending = self.pending.take().ok_or_else(|| {
            AppError::Protocol("input received with no execution handshake pending".into())
        })?;
        let PendingOutput {
            sink,
            output,
            reply,
        } = pending
            .try_recv()
            .map_err(|_| AppError::Protocol("expected an output to be waiting".into()))?;

        self.handler.init(sink)?;
        publish(reply, output);
        debug!("decoder: handshake completed");
        Ok(())
    }

    /// Read sub-protocol: gather the prompt, hand out a [`ReadRequest`], and
    /// block decoding until it is answered.
    async fn read_prompt(
        &mut self,
        tag: Tag,
        first: &TagLine,
        lines: &mut mpsc::Receiver<Bytes>,
    ) -> Result<()> {
        let mut prompt = first.data().to_owned();

        loop {
            let raw = lines.recv().await.ok_or_else(|| {
                AppError::Protocol("stream ended awaiting a read prompt or input tag".into())
            })?;
            let line = parse_tag_line(&raw).ok_or_else(|| {
                AppError::Protocol("expected a read prompt or input tag line".into())
            })?;

            match Tag::from_name(&line.name) {
                Some(Tag::ReadPrompt | Tag::ReadIntPrompt) => {
                    if line.fields.first().map(String::as_str) != Some(CONTINUATION_FIELD) {
                        prompt.push('\n');
                    }
                    prompt.push_str(line.data());
                }
                Some(Tag::ReadInput | Tag::ReadIntInput) => break,
                _ => {
                    return Err(AppError::Protocol(format!(
                        "expected RD_PR or RD_IN tag, got {}",
                        line.name
                    )))
                }
            }
        }

        let (request, reply) = ReadRequest::new(tag, prompt);
        self.handler.send(Tagged::ReadRequest(request)).await?;
        debug!(%tag, "decoder: waiting for read reply");

        match reply.await {
            Ok(Ok(input)) => self.input.send(EngineInput::Reply(input)).await,
            Ok(Err(reason)) => Err(AppError::Read(reason)),
            Err(_) => Err(AppError::Read("read request dropped without a reply".into())),
        }
    }

    async fn emit_status(&self, event: Tagged) {
        if self.status.send(event).await.is_err() {
            debug!("decoder: status receiver dropped");
        }
    }
}

/// Hand `output` to the call waiting for it.
fn publish(reply: oneshot::Sender<Output>, output: Output) {
    if reply.send(output).is_err() {
        debug!("decoder: caller stopped waiting, discarding its output");
    }
}

fn parse_int<T: std::str::FromStr>(what: &str, field: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| AppError::Protocol(format!("{what}: invalid number {field:?}")))
}

/// `RDY ident frame verbose set types`
fn parse_ready(fields: &[String]) -> Result<Ready> {
    let [ident, frame, verbose, set, types] = fields else {
        return Err(AppError::Protocol("parsing RDY: require 5 parameters".into()));
    };
    Ok(Ready {
        ident: ident == "1",
        frame: frame == "1",
        verbose: verbose == "1",
        set: set == "1",
        types: parse_int("RDY number of types", types)?,
    })
}

/// `RUN seed step start_row start_col end_row end_col`
fn parse_run(fields: &[String]) -> Result<(Chunk, Seed)> {
    let [seed, step, chunk @ ..] = fields else {
        return Err(AppError::Protocol("parsing RUN: require 6 parameters".into()));
    };
    if chunk.len() != 4 {
        return Err(AppError::Protocol("parsing RUN: require 6 parameters".into()));
    }
    let seed = Seed {
        seed: parse_int("RUN seed", seed)?,
        step: parse_int("RUN step", step)?,
    };
    Ok((parse_chunk(chunk)?, seed))
}

fn parse_chunk(fields: &[String]) -> Result<Chunk> {
    if fields.len() != 4 {
        return Err(AppError::Protocol("chunk not of required form".into()));
    }
    Ok(Chunk {
        start: parse_position(&fields[..2])?,
        end: parse_position(&fields[2..])?,
    })
}

/// `POS row column`
fn parse_position(fields: &[String]) -> Result<Position> {
    let [row, column] = fields else {
        return Err(AppError::Protocol("position not of required form".into()));
    };
    Ok(Position {
        row: parse_int("position row", row)?,
        column: parse_int("position column", column)?,
    })
}

/// `<TAG> C|indent` followed by data.
fn parse_output_line(tag: Tag, line: &TagLine) -> Result<Line> {
    let [param] = line.fields.as_slice() else {
        return Err(AppError::Protocol(format!("{tag} tag not of required form")));
    };
    let (continuation, indent) = if param == CONTINUATION_FIELD {
        (true, 0)
    } else {
        (false, parse_int("output indent", param)?)
    };
    Ok(Line {
        tag,
        continuation,
        indent,
        data: line.data().trim_end().to_owned(),
    })
}
