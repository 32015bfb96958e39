//! Tag vocabulary and the decoded events the engine produces.
//!
//! Every protocol line carries a short tag naming its semantic kind. Tags
//! fall into two classes: *status* tags announce a change in the engine's
//! life-cycle (ready, input received, quit, ...) and *output* tags carry the
//! data produced by running a statement.

use std::fmt::{Display, Formatter};

use tokio::sync::oneshot;

use crate::{AppError, Result};

/// Semantic kind of a protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    // ── Output tags ──────────────────────────────────
    /// Normal output (`OUT`).
    Output,
    /// List output (`LST`).
    List,
    /// Signature output (`SIG`).
    Signature,
    /// Input finished before a statement was complete (`ENE`).
    ErrorSyntax,
    /// Internal error (`EI`).
    ErrorInternal,
    /// User error (`EU`).
    ErrorUser,
    /// Runtime error (`ER`).
    ErrorRuntime,
    /// Traceback output (`TB`).
    Traceback,
    /// Error position as row/column into the submitted text (`POS`).
    ErrorHistoryPosition,
    /// Error position in a file or eval expression (`EPO`).
    ErrorPosition,
    /// Read prompt (`RD_PR`).
    ReadPrompt,
    /// Waiting for a line of input (`RD_IN`).
    ReadInput,
    /// Integer read prompt (`RDI_PR`).
    ReadIntPrompt,
    /// Waiting for an integer line of input (`RDI_IN`).
    ReadIntInput,
    /// Error in an interactive integer read (`RDI_ER`).
    ReadIntError,

    // ── Status tags ──────────────────────────────────
    /// Ready for input, with change flags (`RDY`).
    Ready,
    /// Input received (`IR`).
    InputReceived,
    /// Running a statement (`RUN`).
    Run,
    /// A statement failed to parse (`ERP`).
    ErrorParse,
    /// Execution interrupted (`INT`).
    Interrupt,
    /// Session ended (`QUIT`).
    Quit,
    /// Frame variables reset (`RES`).
    Reset,
    /// Debugger ready (`DRDY`).
    DebugReady,
}

impl Tag {
    /// Look up a tag by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let tag = match name {
            "OUT" => Self::Output,
            "LST" => Self::List,
            "SIG" => Self::Signature,
            "ENE" => Self::ErrorSyntax,
            "EI" => Self::ErrorInternal,
            "EU" => Self::ErrorUser,
            "ER" => Self::ErrorRuntime,
            "TB" => Self::Traceback,
            "POS" => Self::ErrorHistoryPosition,
            "EPO" => Self::ErrorPosition,
            "RD_PR" => Self::ReadPrompt,
            "RD_IN" => Self::ReadInput,
            "RDI_PR" => Self::ReadIntPrompt,
            "RDI_IN" => Self::ReadIntInput,
            "RDI_ER" => Self::ReadIntError,
            "RDY" => Self::Ready,
            "IR" => Self::InputReceived,
            "RUN" => Self::Run,
            "ERP" => Self::ErrorParse,
            "INT" => Self::Interrupt,
            "QUIT" => Self::Quit,
            "RES" => Self::Reset,
            "DRDY" => Self::DebugReady,
            _ => return None,
        };
        Some(tag)
    }

    /// Wire name of the tag.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Output => "OUT",
            Self::List => "LST",
            Self::Signature => "SIG",
            Self::ErrorSyntax => "ENE",
            Self::ErrorInternal => "EI",
            Self::ErrorUser => "EU",
            Self::ErrorRuntime => "ER",
            Self::Traceback => "TB",
            Self::ErrorHistoryPosition => "POS",
            Self::ErrorPosition => "EPO",
            Self::ReadPrompt => "RD_PR",
            Self::ReadInput => "RD_IN",
            Self::ReadIntPrompt => "RDI_PR",
            Self::ReadIntInput => "RDI_IN",
            Self::ReadIntError => "RDI_ER",
            Self::Ready => "RDY",
            Self::InputReceived => "IR",
            Self::Run => "RUN",
            Self::ErrorParse => "ERP",
            Self::Interrupt => "INT",
            Self::Quit => "QUIT",
            Self::Reset => "RES",
            Self::DebugReady => "DRDY",
        }
    }

    /// True for tags that signal a change of engine status.
    #[must_use]
    pub fn is_status(self) -> bool {
        matches!(
            self,
            Self::Ready
                | Self::InputReceived
                | Self::Run
                | Self::ErrorParse
                | Self::Interrupt
                | Self::Quit
                | Self::Reset
                | Self::DebugReady
        )
    }

    /// True for tags that are part of error output.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrorSyntax
                | Self::Traceback
                | Self::ErrorHistoryPosition
                | Self::ErrorPosition
                | Self::ErrorInternal
                | Self::ErrorRuntime
                | Self::ErrorUser
                | Self::ReadIntError
        )
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A line of text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Output tag the line arrived with.
    pub tag: Tag,
    /// The data continues the previous line rather than starting a new one.
    pub continuation: bool,
    /// Indentation level.
    pub indent: usize,
    /// Captured output, trailing whitespace removed.
    pub data: String,
}

/// Row/column position within the submitted text.
///
/// Commonly precedes error output and traceback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    /// Zero-based row.
    pub row: usize,
    /// Zero-based column.
    pub column: usize,
}

/// A bare change of engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// The status tag received.
    pub tag: Tag,
}

/// Detailed readiness report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// Identifiers changed.
    pub ident: bool,
    /// Frame changed.
    pub frame: bool,
    /// Verbosity changed.
    pub verbose: bool,
    /// Settings changed.
    pub set: bool,
    /// Change in the number of known types.
    pub types: i64,
}

/// Interactive prompt raised by a `read`/`readi` statement.
///
/// The decoder stops consuming engine output until the request is answered
/// with [`respond`](Self::respond) or [`reject`](Self::reject). Both consume
/// the request, so it is answered exactly once.
#[derive(Debug)]
pub struct ReadRequest {
    tag: Tag,
    prompt: String,
    reply: oneshot::Sender<std::result::Result<String, String>>,
}

impl ReadRequest {
    pub(crate) fn new(
        tag: Tag,
        prompt: String,
    ) -> (
        Self,
        oneshot::Receiver<std::result::Result<String, String>>,
    ) {
        let (reply, rx) = oneshot::channel();
        (Self { tag, prompt, reply }, rx)
    }

    /// `RD_PR` for a string read, `RDI_PR` for an integer read.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Prompt text, continuation lines joined.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Deliver `input` to the engine as the read value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Contract` if the session ended before the reply
    /// could be handed over.
    pub fn respond(self, input: impl Into<String>) -> Result<()> {
        self.reply
            .send(Ok(input.into()))
            .map_err(|_| AppError::Contract("read request outlived its session".into()))
    }

    /// Refuse the read. The refusal ends the session with `AppError::Read`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Contract` if the session already ended.
    pub fn reject(self, reason: impl Into<String>) -> Result<()> {
        self.reply
            .send(Err(reason.into()))
            .map_err(|_| AppError::Contract("read request outlived its session".into()))
    }
}

/// A decoded unit of engine output.
#[derive(Debug)]
pub enum Tagged {
    /// Text output.
    Line(Line),
    /// Source position of a following error.
    Position(Position),
    /// Session-level status change.
    Status(Status),
    /// Readiness flags.
    Ready(Ready),
    /// Interactive prompt awaiting a reply.
    ReadRequest(ReadRequest),
}

impl Tagged {
    /// Tag identifying the semantic kind of the event.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Line(line) => line.tag,
            Self::Position(_) => Tag::ErrorHistoryPosition,
            Self::Status(status) => status.tag,
            Self::Ready(_) => Tag::Ready,
            Self::ReadRequest(request) => request.tag,
        }
    }

    /// True if the event is part of error output.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.tag().is_error()
    }

    /// The contained line, if this is a [`Tagged::Line`].
    #[must_use]
    pub fn as_line(&self) -> Option<&Line> {
        match self {
            Self::Line(line) => Some(line),
            _ => None,
        }
    }
}
