//! Shared audio stream descriptions for Sirius.
//!
//! Synthesizers declare what they emit with a [`StreamInfo`], the player opens
//! sink devices with it and the recorder writes WAV headers from it. Word
//! timing records travel alongside the audio as [`TimingInfo`].

use serde::{Deserialize, Serialize};

/// Default sample rate used by the bundled engines
pub const SAMPLE_RATE: u32 = 24000;
/// Default channel count used by the bundled engines
pub const CHANNELS: u16 = 1;
/// Bits per sample of every PCM stream that reaches a sink
pub const BITS_PER_SAMPLE: u16 = 16;

/// Sample encoding declared by a synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Little-endian signed 16-bit PCM
    Int16,
    /// Little-endian 32-bit float PCM in `[-1.0, 1.0]`
    Float32,
    /// Opaque container bytes (e.g. MPEG frames), decoded by the device layer
    Custom,
}

impl SampleFormat {
    /// Width of one sample in bytes, `None` for opaque containers
    pub fn sample_bytes(self) -> Option<usize> {
        match self {
            SampleFormat::Int16 => Some(2),
            SampleFormat::Float32 => Some(4),
            SampleFormat::Custom => None,
        }
    }
}

/// What a synthesizer emits: sample encoding, channel count and rate.
///
/// The custom format carries no channel count or rate; they are reported as
/// `-1` by [`StreamInfo::channels_or_unknown`] and
/// [`StreamInfo::rate_or_unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum StreamInfo {
    Int16 { channels: u16, sample_rate: u32 },
    Float32 { channels: u16, sample_rate: u32 },
    Custom,
}

impl StreamInfo {
    pub fn int16(channels: u16, sample_rate: u32) -> Self {
        StreamInfo::Int16 {
            channels,
            sample_rate,
        }
    }

    pub fn float32(channels: u16, sample_rate: u32) -> Self {
        StreamInfo::Float32 {
            channels,
            sample_rate,
        }
    }

    pub fn custom() -> Self {
        StreamInfo::Custom
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            StreamInfo::Int16 { .. } => SampleFormat::Int16,
            StreamInfo::Float32 { .. } => SampleFormat::Float32,
            StreamInfo::Custom => SampleFormat::Custom,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, StreamInfo::Custom)
    }

    pub fn channels(&self) -> Option<u16> {
        match *self {
            StreamInfo::Int16 { channels, .. } | StreamInfo::Float32 { channels, .. } => {
                Some(channels)
            }
            StreamInfo::Custom => None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match *self {
            StreamInfo::Int16 { sample_rate, .. } | StreamInfo::Float32 { sample_rate, .. } => {
                Some(sample_rate)
            }
            StreamInfo::Custom => None,
        }
    }

    /// Channel count, or `-1` for the custom format
    pub fn channels_or_unknown(&self) -> i32 {
        self.channels().map_or(-1, i32::from)
    }

    /// Sample rate, or `-1` for the custom format
    pub fn rate_or_unknown(&self) -> i64 {
        self.sample_rate().map_or(-1, i64::from)
    }

    /// Bytes per frame (all channels of one sample), `None` for the custom format
    pub fn frame_bytes(&self) -> Option<usize> {
        let sample = self.format().sample_bytes()?;
        Some(sample * usize::from(self.channels()?))
    }

    /// The stream as it leaves the routing stage: float PCM becomes 16-bit PCM,
    /// everything else is unchanged.
    pub fn normalized(&self) -> Self {
        match *self {
            StreamInfo::Float32 {
                channels,
                sample_rate,
            } => StreamInfo::int16(channels, sample_rate),
            other => other,
        }
    }

    /// Playback duration of `bytes` bytes of this stream, in seconds
    pub fn seconds_for(&self, bytes: usize) -> f64 {
        match (self.frame_bytes(), self.sample_rate()) {
            (Some(frame), Some(rate)) if frame > 0 && rate > 0 => {
                bytes as f64 / (rate as f64 * frame as f64)
            }
            _ => 0.0,
        }
    }
}

impl Default for StreamInfo {
    fn default() -> Self {
        StreamInfo::int16(CHANNELS, SAMPLE_RATE)
    }
}

/// Word boundary reported by synthesizers that track timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub word: String,
}

impl TimingInfo {
    pub fn new(word: impl Into<String>, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            start_seconds,
            end_seconds,
            word: word.into(),
        }
    }
}

/// A voice offered by a synthesizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    /// Selector accepted by `set_voice`
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Language code (e.g., "en-us")
    #[serde(default)]
    pub language: Option<String>,
}

impl Voice {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            language: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Free-form voice parameters (rate, pitch, ...) handed to a synthesizer
pub type VoiceParameters = serde_json::Map<String, serde_json::Value>;
