//! Ownership of the engine's stdin.
//!
//! Two parties write to the engine: [`Session::execute`] submits commands,
//! and the decoder task answers interactive reads. [`InputWriter`] is the
//! single token guarding the stream. A writer holds the lock for the whole
//! of one [`EngineInput`] and releases it unconditionally afterwards, so
//! inputs are never interleaved.
//!
//! [`Session::execute`]: crate::proc::Session::execute

use std::pin::Pin;
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::proc::codec::{EngineCodec, EngineInput};
use crate::{AppError, Result};

type BoxedWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Shared, closable handle on the engine's stdin.
#[derive(Clone)]
pub(crate) struct InputWriter {
    inner: Arc<Mutex<Option<FramedWrite<BoxedWrite, EngineCodec>>>>,
}

impl InputWriter {
    pub(crate) fn new<W>(stdin: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let boxed: BoxedWrite = Box::pin(stdin);
        Self {
            inner: Arc::new(Mutex::new(Some(FramedWrite::new(boxed, EngineCodec::new())))),
        }
    }

    /// Write `input` and flush it to the engine.
    ///
    /// # Errors
    ///
    /// - `AppError::Contract` if the writer has been closed.
    /// - `AppError::Io` if the write fails (e.g. the engine has exited).
    pub(crate) async fn send(&self, input: EngineInput) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let framed = guard
            .as_mut()
            .ok_or_else(|| AppError::Contract("engine input has been closed".into()))?;
        framed.send(input).await.map_err(|err| {
            warn!(error = %err, "write to engine stdin failed");
            err
        })
    }

    /// Close the engine's stdin. Later sends fail.
    pub(crate) async fn close(&self) {
        if let Some(mut framed) = self.inner.lock().await.take() {
            if let Err(err) = framed.close().await {
                debug!(error = %err, "closing engine stdin failed");
            }
        }
    }
}

impl std::fmt::Debug for InputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputWriter").finish_non_exhaustive()
    }
}
