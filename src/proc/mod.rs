//! Engine process driver.
//!
//! The engine speaks a line protocol on its stdio: every meaningful output
//! line starts with a sentinel byte and a tag. This module launches the
//! engine, frames and decodes its output, and multiplexes it into one
//! [`Output`] per submitted command.
//!
//! Submodules:
//! - `codec`: byte-line framing and the tag-line splitter.
//! - `tag`: tag vocabulary and decoded [`Tagged`] events.
//! - `response`: [`Output`]/[`Response`] handles and the response multiplexer.
//! - `reader` / `writer`: the stdout reader task and the shared stdin writer.
//! - `decoder`: the protocol state machine and read sub-protocol.
//! - `session`: reader and decoder tasks plus the execution handshake.
//! - `spawner`: process launch and signal delivery.
//! - `process`: the public [`Process`] lifecycle.

pub mod codec;
pub(crate) mod decoder;
pub mod process;
pub mod reader;
pub mod response;
pub mod session;
pub mod spawner;
pub mod tag;
pub(crate) mod writer;

pub use codec::{parse_tag_line, EngineCodec, EngineInput, TagLine, NEW_TAG_BYTE, RUN_COMMAND_BYTE};
pub use decoder::STARTUP_COMMAND;
pub use process::Process;
pub use response::{combine, discard, Chunk, Output, Response, ResponseKind, Seed};
pub use session::Session;
pub use tag::{Line, Position, ReadRequest, Ready, Status, Tag, Tagged};
