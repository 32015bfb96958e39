//! Line framing for the engine's stdio streams.
//!
//! The engine's output is not UTF-8 text: every protocol line starts with
//! the sentinel byte [`NEW_TAG_BYTE`] (0x81), which is never valid on its
//! own in UTF-8. [`EngineCodec`] therefore frames raw byte lines, and
//! [`parse_tag_line`] splits a single line into a [`TagLine`].
//!
//! A tag line has the shape
//!
//! ```text
//! 0x81 <TAG> [<field> ...] [0x81 <data>]
//! ```
//!
//! Inbound, lines longer than [`MAX_LINE_BYTES`] are rejected with
//! `AppError::Protocol("line too long …")`. Outbound, the codec encodes
//! [`EngineInput`] values: commands are terminated by [`RUN_COMMAND_BYTE`]
//! (`^D`), read replies by a newline.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::{AppError, Result};

/// Prefixes every tag line, and separates the header from the data.
pub const NEW_TAG_BYTE: u8 = 0x81;

/// Terminates a command submission and asks the engine to run it (`^D`).
pub const RUN_COMMAND_BYTE: u8 = 0x04;

/// Maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// A framed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLine {
    /// Tag name, e.g. `OUT` or `RDY`.
    pub name: String,
    /// Whitespace-separated auxiliary fields following the name.
    pub fields: Vec<String>,
    /// Data following the second sentinel, surrounding whitespace removed.
    pub data: Option<String>,
}

impl TagLine {
    /// Wire representation of the line, without the trailing newline.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + 16);
        out.push(NEW_TAG_BYTE);
        out.extend_from_slice(self.name.as_bytes());
        for field in &self.fields {
            out.push(b' ');
            out.extend_from_slice(field.as_bytes());
        }
        if let Some(data) = &self.data {
            out.push(NEW_TAG_BYTE);
            out.extend_from_slice(data.as_bytes());
        }
        out
    }

    /// Data segment, or the empty string when the line carries none.
    #[must_use]
    pub fn data(&self) -> &str {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Split one raw output line into a [`TagLine`].
///
/// Returns `None` for lines that do not start with [`NEW_TAG_BYTE`] or whose
/// header holds no tag name; such lines carry no protocol meaning.
#[must_use]
pub fn parse_tag_line(line: &[u8]) -> Option<TagLine> {
    let rest = match line.split_first() {
        Some((&NEW_TAG_BYTE, rest)) if !rest.is_empty() => rest,
        _ => return None,
    };

    let (header, data) = match rest.iter().position(|&b| b == NEW_TAG_BYTE) {
        Some(index) => (&rest[..index], Some(&rest[index + 1..])),
        None => (rest, None),
    };

    let header = String::from_utf8_lossy(header);
    let mut tokens = header.split_whitespace();
    let name = tokens.next()?.to_owned();
    let fields = tokens.map(str::to_owned).collect();
    let data = data.map(|bytes| String::from_utf8_lossy(bytes).trim().to_owned());

    Some(TagLine { name, fields, data })
}

/// Text written to the engine's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    /// A command submission, followed by [`RUN_COMMAND_BYTE`].
    Command(String),
    /// A reply to an interactive read, followed by a newline.
    Reply(String),
}

/// Codec for the engine's stdio: raw byte lines in, [`EngineInput`] out.
///
/// Inbound framing is delegated to [`AnyDelimiterCodec`] split on `\n` with
/// a [`MAX_LINE_BYTES`] cap. A trailing `\r` is removed from each line.
#[derive(Debug)]
pub struct EngineCodec(AnyDelimiterCodec);

impl EngineCodec {
    /// Create a new `EngineCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            Vec::new(),
            MAX_LINE_BYTES,
        ))
    }
}

impl Default for EngineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_carriage_return(line: Bytes) -> Bytes {
    if line.ends_with(b"\r") {
        line.slice(..line.len() - 1)
    } else {
        line
    }
}

impl Decoder for EngineCodec {
    type Item = Bytes;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let line = self.0.decode(src).map_err(map_codec_error)?;
        Ok(line.map(strip_carriage_return))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let line = self.0.decode_eof(src).map_err(map_codec_error)?;
        Ok(line.map(strip_carriage_return))
    }
}

impl Encoder<EngineInput> for EngineCodec {
    type Error = AppError;

    fn encode(&mut self, item: EngineInput, dst: &mut BytesMut) -> Result<()> {
        match item {
            EngineInput::Command(command) => {
                dst.reserve(command.len() + 1);
                dst.put_slice(command.as_bytes());
                dst.put_u8(RUN_COMMAND_BYTE);
            }
            EngineInput::Reply(reply) => {
                dst.reserve(reply.len() + 1);
                dst.put_slice(reply.as_bytes());
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}

fn map_codec_error(err: AnyDelimiterCodecError) -> AppError {
    match err {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        AnyDelimiterCodecError::Io(err) => AppError::from(err),
    }
}
