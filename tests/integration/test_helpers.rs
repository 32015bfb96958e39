//! Shared helpers for session-level integration tests.
//!
//! [`FakeEngine`] plays the engine's side of the protocol over in-memory
//! duplex streams, so tests can script exact tag sequences without
//! launching a process.

use std::time::Duration;

use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use magma_proc::proc::{Output, Response, Session, TagLine, Tagged, RUN_COMMAND_BYTE};

/// Upper bound for any single await in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

const PIPE_CAPACITY: usize = 64 * 1024;

/// Wire bytes of one tag line, newline included.
pub fn tag_line(name: &str, fields: &[&str], data: Option<&str>) -> Vec<u8> {
    let line = TagLine {
        name: name.to_owned(),
        fields: fields.iter().map(|field| (*field).to_owned()).collect(),
        data: data.map(str::to_owned),
    };
    let mut bytes = line.to_bytes();
    bytes.push(b'\n');
    bytes
}

/// Engine end of a session's stdio.
pub struct FakeEngine {
    pub stdout: DuplexStream,
    pub stdin: BufReader<DuplexStream>,
}

impl FakeEngine {
    /// Write one tag line.
    pub async fn emit(&mut self, name: &str, fields: &[&str], data: Option<&str>) {
        self.write_raw(&tag_line(name, fields, data)).await;
    }

    /// Write arbitrary bytes to the session.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stdout.write_all(bytes).await.expect("write engine stdout");
        self.stdout.flush().await.expect("flush engine stdout");
    }

    /// `RDY` with no changes.
    pub async fn ready(&mut self) {
        self.emit("RDY", &["0", "0", "0", "0", "0"], None).await;
    }

    /// A plain `OUT` line at indent zero.
    pub async fn out(&mut self, data: &str) {
        self.emit("OUT", &["0"], Some(data)).await;
    }

    /// `RUN` with a zero seed over the single-row span `[start, end)`.
    pub async fn run(&mut self, start: usize, end: usize) {
        let (start, end) = (start.to_string(), end.to_string());
        self.emit("RUN", &["0", "0", "0", start.as_str(), "0", end.as_str()], None)
            .await;
    }

    /// Read one submitted command, without its `^D` terminator.
    pub async fn read_command(&mut self) -> String {
        let mut buf = Vec::new();
        tokio::time::timeout(STEP_TIMEOUT, self.stdin.read_until(RUN_COMMAND_BYTE, &mut buf))
            .await
            .expect("command within timeout")
            .expect("read engine stdin");
        assert_eq!(buf.pop(), Some(RUN_COMMAND_BYTE), "command must end in ^D");
        String::from_utf8(buf).expect("utf-8 command")
    }

    /// Read one reply to an interactive read, without its newline.
    pub async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(STEP_TIMEOUT, self.stdin.read_line(&mut line))
            .await
            .expect("reply within timeout")
            .expect("read engine stdin");
        assert_eq!(line.pop(), Some('\n'), "reply must end in a newline");
        line
    }

    /// Read until the session closes the engine's stdin.
    pub async fn read_to_eof(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        loop {
            let buf = self.stdin.fill_buf().await.expect("read engine stdin");
            if buf.is_empty() {
                return rest;
            }
            let len = buf.len();
            rest.extend_from_slice(buf);
            self.stdin.consume(len);
        }
    }
}

/// A session attached to a [`FakeEngine`].
pub struct Harness {
    pub session: Session,
    pub startup: Output,
    pub engine: FakeEngine,
    pub status: mpsc::Receiver<Tagged>,
}

/// Attach a session to a fresh fake engine.
pub async fn attach() -> Harness {
    let (engine_stdout, session_stdout) = duplex(PIPE_CAPACITY);
    let (session_stdin, engine_stdin) = duplex(PIPE_CAPACITY);
    let (status_tx, status) = mpsc::channel(64);

    let (session, startup) = tokio::time::timeout(
        STEP_TIMEOUT,
        Session::attach(session_stdout, session_stdin, status_tx, 8),
    )
    .await
    .expect("attach within timeout")
    .expect("attach session");

    Harness {
        session,
        startup,
        engine: FakeEngine {
            stdout: engine_stdout,
            stdin: BufReader::new(engine_stdin),
        },
        status,
    }
}

/// Next response of `output`, bounded by [`STEP_TIMEOUT`].
pub async fn next_response(output: &mut Output) -> Option<Response> {
    tokio::time::timeout(STEP_TIMEOUT, output.next_response())
        .await
        .expect("response within timeout")
}

/// Every remaining event of `response`, bounded by [`STEP_TIMEOUT`].
pub async fn collect(response: Response) -> Vec<Tagged> {
    tokio::time::timeout(STEP_TIMEOUT, response.collect())
        .await
        .expect("response completes within timeout")
}

/// Data of every line event, in order.
pub fn line_data(events: &[Tagged]) -> Vec<&str> {
    events
        .iter()
        .filter_map(Tagged::as_line)
        .map(|line| line.data.as_str())
        .collect()
}
