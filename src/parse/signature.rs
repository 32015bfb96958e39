//! Parser for intrinsic signature listings (`SIG` output).
//!
//! Two listing shapes exist. Typing an intrinsic's name prints all of its
//! signatures under an `Intrinsic '<Name>'` header; `ListSignatures` prints
//! signatures of different intrinsics under `Signatures matching ...`, with
//! the name in front of each parameter list:
//!
//! ```text
//! Intrinsic 'AutomorphismGroupSolubleGroup'
//!
//! Signatures:
//!
//!     Defined in file: /magma/package/Group/GrpPC/aut/aut.m, line 722, column 20:
//!     (G::GrpPC) -> GrpAuto
//!     [
//!         p
//!     ]
//!
//!         Computes the automorphism group of the soluble group G, ...
//!
//! ```

use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use regex::Regex;
use tokio::sync::mpsc;

use crate::parse::{
    extract_file_row_column, LineConsumer, Location, Parsed, TaggedParser, PARSED_BUFFER,
};
use crate::proc::Tag;
use crate::{AppError, Result};

/// `[name::]Type[Params]`; the name is absent for anonymous parameters.
const PARAM_PATTERN: &str =
    r"(?:(?P<arg_name>[A-Za-z0-9]+)::)?(?P<arg_type>[A-Za-z0-9]+(?:\[[^\]]+\]+)?)";

static PARAM_REGEX: OnceLock<Regex> = OnceLock::new();

fn param_regex() -> Result<&'static Regex> {
    if let Some(regex) = PARAM_REGEX.get() {
        return Ok(regex);
    }
    let regex = Regex::new(PARAM_PATTERN)
        .map_err(|err| AppError::Parse(format!("invalid parameter pattern: {err}")))?;
    Ok(PARAM_REGEX.get_or_init(|| regex))
}

/// An intrinsic parameter. Optional parameters may have no type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    /// Parameter name; empty for anonymous parameters.
    pub name: String,
    /// Parameter type; empty for untyped optional parameters.
    pub type_name: String,
}

/// One signature of an intrinsic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    /// Where the signature is defined.
    pub location: Location,
    /// Intrinsic name.
    pub intrinsic: String,
    /// Free-text description, lines joined by single spaces.
    pub comment: String,
    /// Required parameters.
    pub params: Vec<Param>,
    /// Return types.
    pub returns: Vec<String>,
    /// Optional (named) parameters.
    pub optional_params: Vec<Param>,
}

impl Display for Signature {
    /// Render the signature in the engine's listing format.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Location::Glue(glue) => writeln!(f, "Defined in glue: {glue}:")?,
            Location::File { path, row, column } => {
                write!(f, "Defined in file: {path}, line {row}")?;
                if let Some(column) = column {
                    write!(f, ", column {column}")?;
                }
                writeln!(f, ":")?;
            }
            Location::Unknown => {}
        }

        write!(f, "{}(", self.intrinsic)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}::{}", param.name, param.type_name)?;
        }
        f.write_str(")")?;
        if !self.returns.is_empty() {
            write!(f, " -> {}", self.returns.join(", "))?;
        }
        f.write_str("\n")?;

        if !self.optional_params.is_empty() {
            f.write_str("[")?;
            for param in &self.optional_params {
                write!(f, "\n    {}", param.name)?;
                if !param.type_name.is_empty() {
                    write!(f, " : {}", param.type_name)?;
                }
            }
            f.write_str("\n]\n")?;
        }

        writeln!(f, "{}", self.comment)
    }
}

/// [`TaggedParser`] for `SIG` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureParser;

impl TaggedParser for SignatureParser {
    fn tag(&self) -> Tag {
        Tag::Signature
    }

    fn start(&self, consumer: LineConsumer) -> mpsc::Receiver<Parsed> {
        let (output, rx) = mpsc::channel(PARSED_BUFFER);
        tokio::spawn(
            Machine {
                consumer,
                output,
                intrinsic: None,
                current: Signature::default(),
            }
            .run(),
        );
        rx
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    ListHeader,
    Signature,
    Params,
    OptionalParams,
    Comment,
}

struct Machine {
    consumer: LineConsumer,
    output: mpsc::Sender<Parsed>,
    // Set for single-intrinsic listings.
    intrinsic: Option<String>,
    current: Signature,
}

impl Machine {
    async fn run(mut self) {
        let mut state = Some(State::ListHeader);
        while let Some(current) = state {
            let step = match current {
                State::ListHeader => self.list_header().await,
                State::Signature => self.signature().await,
                State::Params => self.params().await,
                State::OptionalParams => self.optional_params().await,
                State::Comment => self.comment().await,
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

    async fn list_header(&mut self) -> Result<Option<State>> {
        if !self.consumer.fetch_next_line().await {
            return Err(AppError::Parse(
                "expected signature list header (`Intrinsic 'Name'` or `Signatures matching ...`)"
                    .into(),
            ));
        }
        let line = self.consumer.line();

        if let Some(rest) = line.strip_prefix("Intrinsic '") {
            let name = rest.strip_suffix('\'').ok_or_else(|| {
                AppError::Parse(format!("expected `Intrinsic 'Name'`, got {line:?}"))
            })?;
            self.intrinsic = Some(name.to_owned());
            self.consumer.consume_line();
        } else if line.starts_with("Signatures matching ") {
            self.intrinsic = None;
            self.consumer.consume_line();
        }
        Ok(Some(State::Signature))
    }

    /// Skip to the next parameter list, picking up its location and name.
    async fn signature(&mut self) -> Result<Option<State>> {
        while self.consumer.fetch_next_line().await {
            let line = self.consumer.line();
            if !line.is_empty() && line != "Signatures:" {
                if let Some(rest) = line.strip_prefix("Defined in file: ") {
                    // Defined in file: <path>, line <row>, column <column>:
                    let rest = rest.strip_suffix(':').unwrap_or(rest);
                    let (path, row, column) = extract_file_row_column(rest)?;
                    self.current.location = Location::File {
                        path,
                        row,
                        column: Some(column),
                    };
                } else if let Some(glue) = line.strip_prefix("Defined in glue: ") {
                    // Defined in glue: <function>():
                    let glue = glue.strip_suffix(':').unwrap_or(glue);
                    self.current.location = Location::Glue(glue.to_owned());
                } else if let Some(intrinsic) = &self.intrinsic {
                    if line.starts_with('(') {
                        self.current.intrinsic.clone_from(intrinsic);
                        return Ok(Some(State::Params));
                    }
                } else {
                    return self.intrinsic_name().await;
                }
            }
            self.consumer.consume_line();
        }
        Ok(None)
    }

    /// Read the intrinsic name in front of the parameter list, which may
    /// wrap across lines, leaving the list itself as the current line.
    async fn intrinsic_name(&mut self) -> Result<Option<State>> {
        let mut name = String::new();
        loop {
            let line = self.consumer.line();
            if let Some(index) = line.find('(') {
                name.push_str(&line[..index]);
                let list = line[index..].to_owned();
                self.consumer.set_line(list);
                break;
            }
            name.push_str(line);
            self.consumer.consume_line();
            if !self.consumer.fetch_next_line().await {
                return Ok(None);
            }
        }
        self.current.intrinsic = name;
        Ok(Some(State::Params))
    }

    /// Gather the (possibly wrapped) parameter list and return types.
    async fn params(&mut self) -> Result<Option<State>> {
        let mut text = self.consumer.line().to_owned();
        self.consumer.consume_line();
        loop {
            if !self.consumer.fetch_next_line().await {
                return Ok(None);
            }
            let line = self.consumer.line();
            // A blank line precedes the comment; `[` opens optional params.
            if line.is_empty() || line == "[" {
                break;
            }
            text.push_str(line);
            self.consumer.consume_line();
        }

        let close = text
            .find(')')
            .ok_or_else(|| AppError::Parse(format!("unterminated parameter list {text:?}")))?;
        let list = text.get(1..close).unwrap_or_default();
        let regex = param_regex()?;
        self.current.params = regex
            .captures_iter(list)
            .map(|captures| Param {
                name: captures
                    .name("arg_name")
                    .map_or("", |m| m.as_str())
                    .to_owned(),
                type_name: captures
                    .name("arg_type")
                    .map_or("", |m| m.as_str())
                    .to_owned(),
            })
            .collect();

        if let Some((_, returns)) = text[close..].split_once("->") {
            self.current.returns = returns
                .split(',')
                .map(str::trim)
                .filter(|ret| !ret.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if self.consumer.line().is_empty() {
            self.consumer.consume_line();
            Ok(Some(State::Comment))
        } else {
            Ok(Some(State::OptionalParams))
        }
    }

    /// `[`, one or more lines of `name[: type]` entries, `]`, blank line.
    async fn optional_params(&mut self) -> Result<Option<State>> {
        if !self.consumer.fetch_next_line().await {
            return Ok(None);
        }
        if !self.consumer.line().starts_with('[') {
            return Ok(Some(State::Comment));
        }
        self.consumer.consume_line();

        let mut entries = String::new();
        loop {
            if !self.consumer.fetch_next_line().await {
                return Err(AppError::Parse(
                    "signature ended inside its optional parameters".into(),
                ));
            }
            if self.consumer.line().starts_with(']') {
                self.consumer.consume_line();
                break;
            }
            entries.push_str(self.consumer.line());
            self.consumer.consume_line();
        }

        if self.consumer.fetch_next_line().await {
            if !self.consumer.line().is_empty() {
                return Err(AppError::Parse(format!(
                    "expected an empty line to follow optional params, got {:?}",
                    self.consumer.line()
                )));
            }
            self.consumer.consume_line();
        }

        self.current.optional_params = entries
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(": ") {
                Some((name, type_name)) => Param {
                    name: name.trim().to_owned(),
                    type_name: type_name.trim().to_owned(),
                },
                None => Param {
                    name: entry.to_owned(),
                    type_name: String::new(),
                },
            })
            .collect();
        Ok(Some(State::Comment))
    }

    /// Comment lines up to a blank line, which completes the signature.
    async fn comment(&mut self) -> Result<Option<State>> {
        while self.consumer.fetch_next_line().await {
            let line = self.consumer.line();
            if line.is_empty() {
                self.consumer.consume_line();
                let signature = std::mem::take(&mut self.current);
                if self.output.send(Parsed::Signature(signature)).await.is_err() {
                    return Ok(None);
                }
                return Ok(Some(State::Signature));
            }
            if !self.current.comment.is_empty() {
                self.current.comment.push(' ');
            }
            self.current.comment.push_str(line);
            self.consumer.consume_line();
        }
        Ok(None)
    }
}
