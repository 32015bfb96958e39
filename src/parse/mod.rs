//! Structured parsers for engine output.
//!
//! Some output tags carry multi-line structured text: tracebacks (`TB`),
//! nested error positions (`EPO`) and intrinsic signatures (`SIG`). Each
//! gets a state-machine parser built on [`LineConsumer`]. [`parse_tagged`]
//! routes contiguous runs of matching events to the right parser and passes
//! everything else through untouched.
//!
//! Submodules:
//! - `line_consumer`: one-line lookahead over a string stream.
//! - `error_position`: `EPO` chains of enclosing eval/file positions.
//! - `traceback`: `TB` stack frames.
//! - `signature`: `SIG` intrinsic signature listings.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::proc::{Tag, Tagged};
use crate::{AppError, Result};

pub mod error_position;
pub mod line_consumer;
pub mod signature;
pub mod traceback;

pub use error_position::{ErrorOrigin, ErrorPosition, ErrorPositionParser};
pub use line_consumer::LineConsumer;
pub use signature::{Param, Signature, SignatureParser};
pub use traceback::{ParamValue, Traceback, TracebackParser};

/// Capacity of the channels between the dispatcher, parsers and caller.
pub(crate) const PARSED_BUFFER: usize = 16;

/// One item of parsed output.
#[derive(Debug)]
pub enum Parsed {
    /// An event no parser accepted, passed through unchanged.
    Tagged(Tagged),
    /// A traceback frame.
    Traceback(Traceback),
    /// A chained error position.
    ErrorPosition(ErrorPosition),
    /// An intrinsic signature.
    Signature(Signature),
    /// The parser could not match its input; it produces nothing further.
    Error(AppError),
}

/// Source location of a traceback frame or signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Location {
    /// No location was reported.
    #[default]
    Unknown,
    /// A position in a package source file.
    File {
        /// Path of the file.
        path: String,
        /// Line number.
        row: usize,
        /// Column, when reported.
        column: Option<usize>,
    },
    /// A function built into the engine's C layer.
    Glue(String),
}

/// A state-machine parser for one structured output tag.
pub trait TaggedParser: Send + Sync {
    /// The output tag this parser reads.
    fn tag(&self) -> Tag;

    /// Whether `event` belongs to this parser's input.
    fn accepts(&self, event: &Tagged) -> bool {
        event.tag() == self.tag()
    }

    /// Run the parser over `consumer`, returning its records.
    ///
    /// The parser runs on a spawned task; the returned channel closes when
    /// the input is exhausted or after a single [`Parsed::Error`].
    fn start(&self, consumer: LineConsumer) -> mpsc::Receiver<Parsed>;

    /// Run the parser over the line data of the matching events in `source`.
    ///
    /// Events of other tags are discarded.
    fn run(&self, source: mpsc::Receiver<Tagged>) -> mpsc::Receiver<Parsed> {
        self.start(LineConsumer::new(line_source(source, self.tag())))
    }
}

/// Extract the data of `tag` lines from `source` as a string stream.
fn line_source(mut source: mpsc::Receiver<Tagged>, tag: Tag) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(PARSED_BUFFER);
    tokio::spawn(async move {
        while let Some(event) = source.recv().await {
            if let Tagged::Line(line) = event {
                if line.tag == tag && tx.send(line.data).await.is_err() {
                    break;
                }
            }
        }
    });
    rx
}

struct ActiveParser {
    index: usize,
    source: mpsc::Sender<Tagged>,
    forward: JoinHandle<()>,
}

impl ActiveParser {
    /// Close the parser's input and wait until all its output is forwarded.
    async fn finish(self) {
        drop(self.source);
        if let Err(err) = self.forward.await {
            debug!(error = %err, "parser forwarding task failed");
        }
    }
}

/// Route `input` through `parsers`.
///
/// At most one parser is active at a time. Consecutive events accepted by
/// the active parser are fed to it; the first event it rejects closes its
/// input and, once its output is drained, the first parser (in list order)
/// accepting the event takes over. Events no parser accepts are passed
/// through as [`Parsed::Tagged`]. Output preserves source order.
#[must_use]
pub fn parse_tagged(
    mut input: mpsc::Receiver<Tagged>,
    parsers: Vec<Box<dyn TaggedParser>>,
) -> mpsc::Receiver<Parsed> {
    let (out, rx) = mpsc::channel(PARSED_BUFFER);

    tokio::spawn(async move {
        let mut active: Option<ActiveParser> = None;

        while let Some(event) = input.recv().await {
            if let Some(current) = &active {
                if parsers[current.index].accepts(&event) {
                    // A parser that stopped early drops its input.
                    let _ = current.source.send(event).await;
                    continue;
                }
                if let Some(finished) = active.take() {
                    finished.finish().await;
                }
            }

            match parsers.iter().position(|parser| parser.accepts(&event)) {
                Some(index) => {
                    debug!(tag = %parsers[index].tag(), "dispatching run to parser");
                    let (source, sub_stream) = mpsc::channel(PARSED_BUFFER);
                    let results = parsers[index].run(sub_stream);
                    let forward = tokio::spawn(forward(results, out.clone()));
                    let _ = source.send(event).await;
                    active = Some(ActiveParser {
                        index,
                        source,
                        forward,
                    });
                }
                None => {
                    if out.send(Parsed::Tagged(event)).await.is_err() {
                        return;
                    }
                }
            }
        }

        if let Some(finished) = active.take() {
            finished.finish().await;
        }
    });

    rx
}

async fn forward(mut results: mpsc::Receiver<Parsed>, out: mpsc::Sender<Parsed>) {
    while let Some(item) = results.recv().await {
        if out.send(item).await.is_err() {
            return;
        }
    }
}

// ── Location helpers ─────────────────────────────────────────────────────────

fn comma_fields(input: &str) -> Vec<&str> {
    input.split(',').filter(|field| !field.is_empty()).collect()
}

fn parse_number(what: &str, token: Option<&str>) -> Result<usize> {
    let token = token.ok_or_else(|| AppError::Parse(format!("missing {what} number")))?;
    token
        .parse()
        .map_err(|_| AppError::Parse(format!("invalid {what} number {token:?}")))
}

/// Row and column from the pair `[at] line <row>` / `column <column>`.
pub(crate) fn split_row_column(fields: &[&str]) -> Result<(usize, usize)> {
    let [line, column] = fields else {
        return Err(AppError::Parse(
            "expected 2 elements in line/column location data".into(),
        ));
    };
    let row = parse_number("line", line.split_whitespace().last())?;
    let column = parse_number("column", column.split_whitespace().nth(1))?;
    Ok((row, column))
}

/// Row and column from `[at] line <row>, column <column>`.
pub(crate) fn extract_row_column(input: &str) -> Result<(usize, usize)> {
    split_row_column(&comma_fields(input))
}

/// File, row and column from `<file>, [at] line <row>, column <column>`.
///
/// The file name may itself contain commas.
pub(crate) fn extract_file_row_column(input: &str) -> Result<(String, usize, usize)> {
    let fields = comma_fields(input);
    if fields.len() < 3 {
        return Err(AppError::Parse(format!(
            "expected file, line and column in {input:?}"
        )));
    }
    let split = fields.len() - 2;
    let (row, column) = split_row_column(&fields[split..])?;
    Ok((fields[..split].join(","), row, column))
}
