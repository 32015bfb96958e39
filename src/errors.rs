//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Crate error enumeration covering every failure mode of the process core.
///
/// Errors *reported by the engine* (parse errors, runtime errors, internal
/// errors) are not represented here: they are ordinary output delivered as
/// [`Response`](crate::proc::Response) variants and tagged events.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The engine process could not be launched or its pipes attached.
    Launch(String),
    /// Malformed tag line, unexpected tag, or stream ended mid-protocol.
    ///
    /// Always fatal to the session that produced it.
    Protocol(String),
    /// A call was made that the current process state does not allow.
    Contract(String),
    /// A structured parser could not match the expected output shape.
    Parse(String),
    /// An interactive read request was refused by the caller.
    Read(String),
    /// OS-level process wait or signal failure.
    Process(String),
    /// Stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Contract(msg) => write!(f, "contract: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Read(msg) => write!(f, "read: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
