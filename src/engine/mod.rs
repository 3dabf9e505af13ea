//! The synthesizer contract and the bundled adapters.
//!
//! A synthesizer is a black box that turns one utterance into audio chunks,
//! delivered through the [`AudioOutput`] it is handed. Engines are shared
//! values (`Arc<dyn Synthesizer>`): the caller keeps its handle and the
//! dispatcher may swap between several of them on failure.

mod bridge;
mod command;

pub use bridge::{AsyncSynthesizer, AsyncSynthesizerBridge, ChunkStream};
pub use command::{CommandSynthesizer, WavHeaderStripper};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sirius_protocol::{StreamInfo, TimingInfo, Voice, VoiceParameters};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

pub type SharedSynthesizer = Arc<dyn Synthesizer>;

/// A text-to-speech back-end.
///
/// Methods take `&self` so that [`stop`](Synthesizer::stop) can be called
/// from another thread while [`synthesize`](Synthesizer::synthesize) blocks.
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Format of the chunks this engine pushes
    fn stream_info(&self) -> StreamInfo;

    /// Synthesize `text`, pushing zero or more chunks into `out` before
    /// returning. An `Err` marks a recoverable failure for this utterance.
    fn synthesize(&self, text: &str, out: &AudioOutput) -> Result<()>;

    /// Whether the engine accepts a live character stream instead of utterances
    fn can_consume_generators(&self) -> bool {
        false
    }

    /// Synthesize directly from a character stream. Only called when
    /// [`can_consume_generators`](Synthesizer::can_consume_generators) is true.
    fn synthesize_stream(
        &self,
        _chars: &mut (dyn Iterator<Item = char> + Send),
        _out: &AudioOutput,
    ) -> Result<()> {
        Err(Error::Configuration(format!(
            "{} does not consume text streams",
            self.name()
        )))
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn set_voice(&self, selector: &str) -> Result<()> {
        Err(Error::Configuration(format!(
            "{} does not support voice selection (requested '{}')",
            self.name(),
            selector
        )))
    }

    fn set_voice_parameters(&self, _params: &VoiceParameters) -> Result<()> {
        Ok(())
    }

    /// Ask an in-progress `synthesize` to return at its next safe point
    fn stop(&self) {}

    /// Release back-end resources
    fn shutdown(&self) {}
}

type ChunkRoute = Arc<dyn Fn(&[u8]) + Send + Sync>;
type TimingRoute = Arc<dyn Fn(TimingInfo) + Send + Sync>;

/// Where a synthesizer delivers its audio for the current utterance
pub struct AudioOutput {
    route: ChunkRoute,
    timing: Option<TimingRoute>,
    cancel: CancellationToken,
    bytes: AtomicUsize,
    chunks: AtomicUsize,
}

impl fmt::Debug for AudioOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioOutput")
            .field("bytes", &self.bytes_pushed())
            .field("chunks", &self.chunks_pushed())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl AudioOutput {
    pub fn new<F>(route: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self {
            route: Arc::new(route),
            timing: None,
            cancel: CancellationToken::new(),
            bytes: AtomicUsize::new(0),
            chunks: AtomicUsize::new(0),
        }
    }

    pub fn with_timing<F>(mut self, timing: F) -> Self
    where
        F: Fn(TimingInfo) + Send + Sync + 'static,
    {
        self.timing = Some(Arc::new(timing));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deliver one chunk. Returns `false` once the session is cancelled; the
    /// engine should then stop producing.
    pub fn push(&self, chunk: &[u8]) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }
        self.bytes.fetch_add(chunk.len(), Ordering::AcqRel);
        self.chunks.fetch_add(1, Ordering::AcqRel);
        (self.route)(chunk);
        true
    }

    /// Forward a word boundary record unchanged
    pub fn push_timing(&self, timing: TimingInfo) {
        if let Some(route) = &self.timing {
            route(timing);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn bytes_pushed(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn chunks_pushed(&self) -> usize {
        self.chunks.load(Ordering::Acquire)
    }
}
