//! One-line lookahead over a stream of output lines.

use tokio::sync::mpsc;

/// Pulls lines from a channel, keeping the current one until it is consumed.
///
/// A parser state inspects [`line`](Self::line) after
/// [`fetch_next_line`](Self::fetch_next_line) and calls
/// [`consume_line`](Self::consume_line) only if the line is its own, leaving
/// it for the next state otherwise.
#[derive(Debug)]
pub struct LineConsumer {
    source: mpsc::Receiver<String>,
    line: String,
    processed: bool,
}

impl LineConsumer {
    /// Consume lines from `source`.
    #[must_use]
    pub fn new(source: mpsc::Receiver<String>) -> Self {
        Self {
            source,
            line: String::new(),
            processed: true,
        }
    }

    /// Consume a fixed sequence of lines.
    #[must_use]
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            // Capacity covers every line.
            let _ = tx.try_send(line);
        }
        Self::new(rx)
    }

    /// Make a line current, pulling from the source only if the previous
    /// one was consumed. Surrounding whitespace is trimmed.
    ///
    /// Returns `false` once the source is exhausted.
    pub async fn fetch_next_line(&mut self) -> bool {
        if self.processed {
            let Some(next) = self.source.recv().await else {
                return false;
            };
            self.line = next.trim().to_owned();
            self.processed = false;
        }
        true
    }

    /// Mark the current line as used.
    pub fn consume_line(&mut self) {
        self.processed = true;
    }

    /// The current line.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Replace the text of the current, unconsumed line.
    pub(crate) fn set_line(&mut self, line: String) {
        self.line = line;
    }
}
