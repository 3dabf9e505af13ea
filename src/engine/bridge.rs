//! Adapter for engines that stream audio asynchronously (HTTP or WebSocket
//! TTS clients) so they can sit behind the blocking [`Synthesizer`] contract.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use sirius_protocol::StreamInfo;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AudioOutput, Synthesizer};
use crate::{Error, Result};

/// Audio chunks for one utterance
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// An engine whose output arrives as an async stream of chunks
pub trait AsyncSynthesizer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn stream_info(&self) -> StreamInfo;

    fn stream(&self, text: String) -> ChunkStream;
}

/// Drives an [`AsyncSynthesizer`] on a private single-worker runtime.
pub struct AsyncSynthesizerBridge<S> {
    inner: Arc<S>,
    runtime: Runtime,
    current: Mutex<CancellationToken>,
}

impl<S: AsyncSynthesizer> AsyncSynthesizerBridge<S> {
    pub fn new(inner: S) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sirius-engine-io")
            .enable_all()
            .build()?;
        Ok(Self {
            inner: Arc::new(inner),
            runtime,
            current: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncSynthesizer> Synthesizer for AsyncSynthesizerBridge<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn stream_info(&self) -> StreamInfo {
        self.inner.stream_info()
    }

    fn synthesize(&self, text: &str, out: &AudioOutput) -> Result<()> {
        let token = CancellationToken::new();
        *self.current.lock() = token.clone();
        let session = out.cancel_token().clone();
        let mut stream = self.inner.stream(text.to_string());

        self.runtime.block_on(async {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = session.cancelled() => return Err(Error::Cancelled),
                    next = stream.next() => match next {
                        Some(Ok(chunk)) => {
                            if !out.push(&chunk) {
                                return Err(Error::Cancelled);
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            debug!("{} finished after {} bytes", self.inner.name(), out.bytes_pushed());
                            return Ok(());
                        }
                    }
                }
            }
        })
    }

    fn stop(&self) {
        self.current.lock().cancel();
    }
}
