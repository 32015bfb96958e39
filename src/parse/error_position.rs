//! Parser for nested error positions (`EPO` output).
//!
//! An error raised inside `eval` is reported at every enclosing level:
//!
//! ```text
//! In eval expression, line 1, column 3:
//! >> 3 mod 0;
//! Located in enclosing eval expression, at line 1, column 1:
//! >> eval "3 mod 0;";
//! Located in:
//! >> eval "eval \"3 mod 0;\";";
//! ```
//!
//! The parser folds the levels into one [`ErrorPosition`] chain.

use tokio::sync::mpsc;

use crate::parse::{
    extract_file_row_column, extract_row_column, LineConsumer, Parsed, TaggedParser,
    PARSED_BUFFER,
};
use crate::proc::Tag;
use crate::{AppError, Result};

/// Where an error position points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Inside an `eval` expression.
    Eval,
    /// Inside a source file.
    File(String),
    /// The outermost level, with no location of its own.
    #[default]
    Unspecified,
}

/// Position of an error, linked to the position of its enclosing context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPosition {
    /// Kind of context the position refers to.
    pub origin: ErrorOrigin,
    /// Line of the error.
    pub row: usize,
    /// Column of the error.
    pub column: usize,
    /// Source text containing the problem.
    pub source_fragment: String,
    /// Enclosing context, if any.
    pub located_in: Option<Box<ErrorPosition>>,
}

impl ErrorPosition {
    /// True if the position lies in an `eval` expression.
    #[must_use]
    pub fn is_eval(&self) -> bool {
        self.origin == ErrorOrigin::Eval
    }

    /// File the position lies in, if any.
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        match &self.origin {
            ErrorOrigin::File(path) => Some(path),
            _ => None,
        }
    }

    /// This position followed by each enclosing one, innermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ErrorPosition> {
        std::iter::successors(Some(self), |position| position.located_in.as_deref())
    }

    /// Number of levels in the chain, including this one.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain().count()
    }
}

/// [`TaggedParser`] for `EPO` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorPositionParser;

impl TaggedParser for ErrorPositionParser {
    fn tag(&self) -> Tag {
        Tag::ErrorPosition
    }

    fn start(&self, consumer: LineConsumer) -> mpsc::Receiver<Parsed> {
        let (output, rx) = mpsc::channel(PARSED_BUFFER);
        tokio::spawn(
            Machine {
                consumer,
                output,
                levels: Vec::new(),
            }
            .run(),
        );
        rx
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    TopLevel,
    SourceFragment,
    LocatedIn,
}

struct Machine {
    consumer: LineConsumer,
    output: mpsc::Sender<Parsed>,
    // Innermost first.
    levels: Vec<ErrorPosition>,
}

impl Machine {
    async fn run(mut self) {
        let mut state = Some(State::TopLevel);
        while let Some(current) = state {
            let step = match current {
                State::TopLevel => self.top_level().await,
                State::SourceFragment => self.source_fragment().await,
                State::LocatedIn => self.located_in().await,
            };
            state = match step {
                Ok(next) => next,
                Err(err) => {
                    let _ = self.output.send(Parsed::Error(err)).await;
                    return;
                }
            };
        }

        if let Some(position) = fold_levels(self.levels) {
            let _ = self.output.send(Parsed::ErrorPosition(position)).await;
        }
    }

    async fn top_level(&mut self) -> Result<Option<State>> {
        if !self.consumer.fetch_next_line().await {
            return Ok(None);
        }
        let line = self.consumer.line();

        let position = if let Some(rest) = line.strip_prefix("In eval expression, ") {
            // In eval expression, line <row>, column <column>:
            let (row, column) = extract_row_column(strip_colon(rest))?;
            ErrorPosition {
                origin: ErrorOrigin::Eval,
                row,
                column,
                ..ErrorPosition::default()
            }
        } else if let Some(rest) = line.strip_prefix("In file ") {
            // In file "<path>", line <row>, column <column>:
            let (file, row, column) = extract_file_row_column(strip_colon(rest))?;
            ErrorPosition {
                origin: ErrorOrigin::File(unquote(&file).to_owned()),
                row,
                column,
                ..ErrorPosition::default()
            }
        } else {
            return Ok(None);
        };

        self.levels.push(position);
        self.consumer.consume_line();
        Ok(Some(State::SourceFragment))
    }

    async fn source_fragment(&mut self) -> Result<Option<State>> {
        if self.consumer.fetch_next_line().await {
            if let Some(fragment) = self.consumer.line().strip_prefix(">>") {
                if let Some(level) = self.levels.last_mut() {
                    level.source_fragment = fragment.trim_start().to_owned();
                }
                self.consumer.consume_line();
                return Ok(Some(State::LocatedIn));
            }
        }
        Err(AppError::Parse(format!(
            "expected source fragment line, got {:?}",
            self.consumer.line()
        )))
    }

    async fn located_in(&mut self) -> Result<Option<State>> {
        if !self.consumer.fetch_next_line().await {
            return Ok(None);
        }
        let Some(rest) = self.consumer.line().strip_prefix("Located in") else {
            return Ok(None);
        };

        let position = if let Some(at) = rest.strip_prefix(" enclosing eval expression, at ") {
            // Located in enclosing eval expression, at line <row>, column <column>:
            let (row, column) = extract_row_column(strip_colon(at))?;
            ErrorPosition {
                origin: ErrorOrigin::Eval,
                row,
                column,
                ..ErrorPosition::default()
            }
        } else if let Some(at) = rest.strip_prefix(" file ") {
            // Located in file "<path>", at line <row>, column <column>:
            let (file, row, column) = extract_file_row_column(strip_colon(at))?;
            ErrorPosition {
                origin: ErrorOrigin::File(unquote(&file).to_owned()),
                row,
                column,
                ..ErrorPosition::default()
            }
        } else if rest == ":" {
            ErrorPosition::default()
        } else {
            return Err(AppError::Parse(format!(
                "`Located in` line with unrecognised suffix: {rest:?}"
            )));
        };

        self.levels.push(position);
        self.consumer.consume_line();
        Ok(Some(State::SourceFragment))
    }
}

/// Link the levels, innermost first, into a single chain.
fn fold_levels(levels: Vec<ErrorPosition>) -> Option<ErrorPosition> {
    levels.into_iter().rev().fold(None, |inner, mut level| {
        level.located_in = inner.map(Box::new);
        Some(level)
    })
}

fn strip_colon(input: &str) -> &str {
    input.strip_suffix(':').unwrap_or(input)
}

fn unquote(input: &str) -> &str {
    input
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(input)
}
