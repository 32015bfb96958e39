//! Parser for traceback output (`TB`).
//!
//! ```text
//! #0 *FixSubgroup(
//!     A: A group of automorphisms of GrpPC,
//!     H: GrpPC : H
//! ) at /magma/package/Group/GrpPC/aut/fix-subgroup.m:363
//! ```
//!
//! Each frame becomes one [`Traceback`]. The `#<index>` prefix, the `*`
//! current-frame marker and the ` at <file>:<line>` suffix are optional.

use std::fmt::{Display, Formatter};

use tokio::sync::mpsc;

use crate::parse::{LineConsumer, Location, Parsed, TaggedParser, PARSED_BUFFER};
use crate::proc::Tag;
use crate::{AppError, Result};

/// A parameter of a traceback frame and the value it was called with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamValue {
    /// Parameter name.
    pub name: String,
    /// Printed value.
    pub value: String,
}

/// One frame of a traceback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
    /// Position in the traceback, when numbered.
    pub index: Option<usize>,
    /// The frame the debugger is currently in.
    pub current: bool,
    /// Function name.
    pub name: String,
    /// Parameters with their values.
    pub params: Vec<ParamValue>,
    /// Where the function is defined.
    pub location: Location,
}

impl Display for Traceback {
    /// Render the frame the way the engine prints it.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(index) = self.index {
            write!(f, "{index}")?;
        }
        f.write_str(" ")?;
        if self.current {
            f.write_str("*")?;
        }
        write!(f, "{}(", self.name)?;
        for param in &self.params {
            write!(f, "\n    {} : {}", param.name, param.value)?;
        }
        f.write_str("\n), ")?;
        match &self.location {
            Location::Glue(glue) => write!(f, "defined in glue: {glue}")?,
            Location::File { path, row, .. } => write!(f, "defined in file: {path}, line {row}")?,
            Location::Unknown => {}
        }
        f.write_str("\n")
    }
}

/// [`TaggedParser`] for `TB` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracebackParser;

impl TaggedParser for TracebackParser {
    fn tag(&self) -> Tag {
        Tag::Traceback
    }

    fn start(&self, consumer: LineConsumer) -> mpsc::Receiver<Parsed> {
        let (output, rx) = mpsc::channel(PARSED_BUFFER);
        tokio::spawn(
            Machine {
                consumer,
                output,
                current: Traceback::default(),
            }
            .run(),
        );
        rx
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Frame,
    Params,
    Location,
}

struct Machine {
    consumer: LineConsumer,
    output: mpsc::Sender<Parsed>,
    current: Traceback,
}

impl Machine {
    async fn run(mut self) {
        let mut state = Some(State::Frame);
        while let Some(current) = state {
            let step = match current {
                State::Frame => self.frame().await,
                State::Params => self.params().await,
                State::Location => self.location().await,
            };
            state = match step {
                Ok(next) => next,
                Err(err) => {
                    let _ = self.output.send(Parsed::Error(err)).await;
                    return;
                }
            };
        }
    }

    /// Skip ahead to the next frame header and parse it.
    async fn frame(&mut self) -> Result<Option<State>> {
        while self.consumer.fetch_next_line().await {
            if let Some(header) = self.consumer.line().strip_suffix('(') {
                self.current = parse_header(header)?;
                self.consumer.consume_line();
                return Ok(Some(State::Params));
            }
            self.consumer.consume_line();
        }
        Ok(None)
    }

    async fn params(&mut self) -> Result<Option<State>> {
        while self.consumer.fetch_next_line().await {
            let line = self.consumer.line();
            if line.starts_with(')') {
                return Ok(Some(State::Location));
            }
            let (name, value) = line.split_once(": ").ok_or_else(|| {
                AppError::Parse(format!("expected `name: value` parameter, got {line:?}"))
            })?;
            self.current.params.push(ParamValue {
                name: name.to_owned(),
                value: value.strip_suffix(',').unwrap_or(value).to_owned(),
            });
            self.consumer.consume_line();
        }
        Err(AppError::Parse(format!(
            "traceback ended inside the parameters of {}",
            self.current.name
        )))
    }

    /// Parse the closing `)` line and emit the frame.
    async fn location(&mut self) -> Result<Option<State>> {
        let line = self.consumer.line();
        if let Some((_, at)) = line.split_once(" at ") {
            let (path, row) = at.rsplit_once(':').ok_or_else(|| {
                AppError::Parse(format!("expected ':' in traceback location {at:?}"))
            })?;
            let row = row
                .parse()
                .map_err(|_| AppError::Parse(format!("invalid traceback line number {row:?}")))?;
            self.current.location = Location::File {
                path: path.to_owned(),
                row,
                column: None,
            };
        }
        self.consumer.consume_line();

        let frame = std::mem::take(&mut self.current);
        if self.output.send(Parsed::Traceback(frame)).await.is_err() {
            return Ok(None);
        }
        Ok(Some(State::Frame))
    }
}

/// `[#<index> [*]]<name>`
fn parse_header(header: &str) -> Result<Traceback> {
    let Some(numbered) = header.strip_prefix('#') else {
        return Ok(Traceback {
            name: header.to_owned(),
            ..Traceback::default()
        });
    };

    let fields: Vec<&str> = numbered.split_whitespace().collect();
    let [index, name] = fields.as_slice() else {
        return Err(AppError::Parse(format!(
            "expected `#<index> <name>` frame header, got {header:?}"
        )));
    };
    let index = index
        .parse()
        .map_err(|_| AppError::Parse(format!("invalid frame index {index:?}")))?;
    let (current, name) = match name.strip_prefix('*') {
        Some(name) => (true, name),
        None => (false, *name),
    };

    Ok(Traceback {
        index: Some(index),
        current,
        name: name.to_owned(),
        ..Traceback::default()
    })
}
