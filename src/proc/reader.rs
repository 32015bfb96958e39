//! Engine stdout reader task.
//!
//! Frames the engine's stdout into raw byte lines with [`EngineCodec`] and
//! forwards them, in order, to the decoder over a tokio [`mpsc`] channel.
//! The reader does not interpret lines; classification is the decoder's job.

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::proc::codec::EngineCodec;
use crate::Result;

/// Forward stdout lines to `lines` until EOF.
///
/// Exits cleanly on EOF, when `stop` fires, or when the decoder has dropped
/// its receiver. Dropping `lines` on exit is what tells the decoder the
/// stream has ended.
///
/// # Errors
///
/// Returns the framing or I/O error that ended the stream, e.g.
/// `AppError::Protocol("line too long …")`.
pub async fn run_reader<R>(
    stdout: R,
    lines: mpsc::Sender<Bytes>,
    stop: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, EngineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => {
                debug!("engine reader: stop requested");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("engine reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "engine reader: stream error, stopping");
                        return Err(err);
                    }
                    Some(Ok(line)) => {
                        if lines.send(line).await.is_err() {
                            debug!("engine reader: decoder gone, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
