//! Per-session configuration: serializable play options and the callback set.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sirius_protocol::TimingInfo;

use crate::text::{SegmenterOptions, Tokenizer};
use crate::{Error, Result};

/// Options for one play session. Every field has a default, so a partial
/// JSON document is a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayOptions {
    /// Release the first fragment as soon as it is plausible
    pub fast_sentence_fragment: bool,
    /// Quick-release every sentence, not only the first
    pub fast_sentence_fragment_allsentences: bool,
    /// Quick-release at every fragment delimiter
    pub fast_sentence_fragment_allsentences_multiple: bool,
    /// Fuse sentences while playback holds at least this much audio (0 disables)
    pub buffer_threshold_seconds: f64,
    pub minimum_sentence_length: usize,
    pub minimum_first_fragment_length: usize,
    pub force_first_fragment_after_words: usize,
    pub log_synthesized_text: bool,
    pub log_characters: bool,
    /// Clear the accumulated text when the session starts
    pub reset_generated_text: bool,
    pub output_wavfile: Option<PathBuf>,
    pub tokenizer: Tokenizer,
    pub language: String,
    pub context_size: usize,
    pub muted: bool,
    pub cleanup_text_links: bool,
    pub cleanup_text_emojis: bool,
    /// Bytes per device write
    pub playout_chunk_size: usize,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            fast_sentence_fragment: true,
            fast_sentence_fragment_allsentences: false,
            fast_sentence_fragment_allsentences_multiple: false,
            buffer_threshold_seconds: 0.0,
            minimum_sentence_length: 10,
            minimum_first_fragment_length: 10,
            force_first_fragment_after_words: 30,
            log_synthesized_text: false,
            log_characters: false,
            reset_generated_text: true,
            output_wavfile: None,
            tokenizer: Tokenizer::default(),
            language: "en".to_string(),
            context_size: 12,
            muted: false,
            cleanup_text_links: false,
            cleanup_text_emojis: false,
            playout_chunk_size: 1024,
        }
    }
}

impl PlayOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_output_wavfile(mut self, path: impl AsRef<Path>) -> Self {
        self.output_wavfile = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_buffer_threshold(mut self, seconds: f64) -> Self {
        self.buffer_threshold_seconds = seconds;
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.buffer_threshold_seconds.is_finite() || self.buffer_threshold_seconds < 0.0 {
            return Err(Error::Configuration(format!(
                "buffer_threshold_seconds must be a finite value >= 0, got {}",
                self.buffer_threshold_seconds
            )));
        }
        if self.playout_chunk_size == 0 {
            return Err(Error::Configuration(
                "playout_chunk_size must be greater than 0".into(),
            ));
        }
        if self.context_size == 0 {
            return Err(Error::Configuration(
                "context_size must be greater than 0".into(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(Error::Configuration("language must not be empty".into()));
        }
        if let Some(path) = &self.output_wavfile {
            if path.as_os_str().is_empty() {
                return Err(Error::Configuration("output_wavfile is an empty path".into()));
            }
        }
        Ok(())
    }

    pub fn segmenter_options(&self) -> SegmenterOptions {
        SegmenterOptions {
            context_size: self.context_size,
            minimum_sentence_length: self.minimum_sentence_length,
            minimum_first_fragment_length: self.minimum_first_fragment_length,
            quick_yield_single_sentence_fragment: self.fast_sentence_fragment,
            quick_yield_for_all_sentences: self.fast_sentence_fragment_allsentences,
            quick_yield_every_fragment: self.fast_sentence_fragment_allsentences_multiple,
            force_first_fragment_after_words: self.force_first_fragment_after_words,
            cleanup_text_links: self.cleanup_text_links,
            cleanup_text_emojis: self.cleanup_text_emojis,
            tokenizer: self.tokenizer,
            language: self.language.clone(),
            log_characters: self.log_characters,
        }
    }
}

pub type Hook = Arc<dyn Fn() + Send + Sync>;
pub type TextHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type CharHook = Arc<dyn Fn(char) + Send + Sync>;
pub type ChunkHook = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type WordHook = Arc<dyn Fn(&TimingInfo) + Send + Sync>;

/// User callbacks for a session. All are optional and are invoked from the
/// library's worker threads, so they must return promptly.
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    pub(crate) on_text_stream_start: Option<Hook>,
    pub(crate) on_text_stream_stop: Option<Hook>,
    pub(crate) on_character: Option<CharHook>,
    pub(crate) before_sentence_synthesized: Option<TextHook>,
    pub(crate) on_sentence_synthesized: Option<TextHook>,
    pub(crate) on_audio_chunk: Option<ChunkHook>,
    pub(crate) on_audio_stream_start: Option<Hook>,
    pub(crate) on_audio_stream_stop: Option<Hook>,
    pub(crate) on_word: Option<WordHook>,
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_text_stream_start", &self.on_text_stream_start.is_some())
            .field("on_text_stream_stop", &self.on_text_stream_stop.is_some())
            .field("on_character", &self.on_character.is_some())
            .field(
                "before_sentence_synthesized",
                &self.before_sentence_synthesized.is_some(),
            )
            .field("on_sentence_synthesized", &self.on_sentence_synthesized.is_some())
            .field("on_audio_chunk", &self.on_audio_chunk.is_some())
            .field("on_audio_stream_start", &self.on_audio_stream_start.is_some())
            .field("on_audio_stream_stop", &self.on_audio_stream_stop.is_some())
            .field("on_word", &self.on_word.is_some())
            .finish()
    }
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// First character of the session was read
    pub fn with_on_text_stream_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_text_stream_start = Some(Arc::new(f));
        self
    }

    /// Text input ran out naturally
    pub fn with_on_text_stream_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_text_stream_stop = Some(Arc::new(f));
        self
    }

    pub fn with_on_character(mut self, f: impl Fn(char) + Send + Sync + 'static) -> Self {
        self.on_character = Some(Arc::new(f));
        self
    }

    pub fn with_before_sentence_synthesized(
        mut self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.before_sentence_synthesized = Some(Arc::new(f));
        self
    }

    pub fn with_on_sentence_synthesized(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_sentence_synthesized = Some(Arc::new(f));
        self
    }

    /// Every 16-bit PCM (or custom-format) sub-chunk handed to the device
    pub fn with_on_audio_chunk(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_audio_chunk = Some(Arc::new(f));
        self
    }

    /// First audio of the session reached the device
    pub fn with_on_audio_stream_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_audio_stream_start = Some(Arc::new(f));
        self
    }

    /// The session ended, on every exit path
    pub fn with_on_audio_stream_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_audio_stream_stop = Some(Arc::new(f));
        self
    }

    pub fn with_on_word(mut self, f: impl Fn(&TimingInfo) + Send + Sync + 'static) -> Self {
        self.on_word = Some(Arc::new(f));
        self
    }
}
