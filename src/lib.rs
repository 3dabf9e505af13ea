//! Sirius: realtime text-to-speech streaming.
//!
//! Text is fed incrementally (strings or lazy sources such as LLM token
//! streams), cut into utterances as early as the sentence structure allows,
//! synthesized by a chain of interchangeable engines and played gaplessly
//! through a sink device. See [`TextToAudioStream`] for the entry point.

pub mod audio;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod options;
pub mod playback;
pub mod sink;
mod stream;
pub mod text;

pub use error::{Error, Result};
pub use engine::{
    AsyncSynthesizer, AsyncSynthesizerBridge, AudioOutput, ChunkStream, CommandSynthesizer,
    SharedSynthesizer, Synthesizer,
};
pub use options::{PlayOptions, StreamCallbacks};
pub use playback::Playback;
pub use sink::{CommandSink, MemorySink, NullSink, SinkDevice, SinkEvent};
#[cfg(feature = "rodio")]
pub use sink::RodioSink;
pub use stream::TextToAudioStream;
pub use text::{Segmenter, SegmenterOptions, StreamSegmenter, TextSource, Tokenizer};

pub use sirius_protocol::{SampleFormat, StreamInfo, TimingInfo, Voice, VoiceParameters};
