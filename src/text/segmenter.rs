//! Sentence segmentation over a slow, unbounded character stream.
//!
//! The built-in [`StreamSegmenter`] never buffers more than the sentence in
//! progress. The first fragment is released as soon as it ends on a
//! delimiter and is long enough, so the first audio starts early; later
//! sentences wait for `context_size` characters of lookahead so the boundary
//! is certain.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;
use unicode_segmentation::UnicodeSegmentation;

use super::cleanup::clean_text;
use crate::Result;

pub type CharStream = Box<dyn Iterator<Item = char> + Send>;
pub type SentenceStream = Box<dyn Iterator<Item = String> + Send>;

/// Characters that end a sentence
pub const FULL_SENTENCE_DELIMITERS: &[char] = &['.', '!', '?', '…', '。', '！', '？', '\n'];

/// Characters that end a speakable fragment (a superset of the above)
pub const SENTENCE_FRAGMENT_DELIMITERS: &[char] = &[
    '.', '!', '?', '…', '。', '！', '？', '\n', ',', ';', ':', '—', ')', ']', '}', '、', '，', '；',
    '：',
];

const CJK_TERMINATORS: &[char] = &['。', '！', '？'];
const CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '}', '」', '』'];

/// How sentence boundaries are found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tokenizer {
    /// Unicode sentence boundaries (UAX #29)
    #[default]
    Unicode,
    /// A terminator followed by whitespace; CJK terminators split immediately
    Punctuation,
}

impl Tokenizer {
    /// Split `text` into sentences. Concatenating the pieces gives back `text`.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match self {
            Tokenizer::Unicode => text.split_sentence_bounds().collect(),
            Tokenizer::Punctuation => split_on_punctuation(text),
        }
    }
}

fn split_on_punctuation(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    let mut after_terminator = false;

    while let Some((idx, c)) = chars.next() {
        if CJK_TERMINATORS.contains(&c) || c == '\n' {
            let mut end = idx + c.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if CLOSERS.contains(&next) || next.is_whitespace() {
                    end = next_idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            pieces.push(&text[start..end]);
            start = end;
            after_terminator = false;
        } else if FULL_SENTENCE_DELIMITERS.contains(&c) || (after_terminator && CLOSERS.contains(&c))
        {
            after_terminator = true;
        } else if after_terminator && c.is_whitespace() {
            let mut end = idx + c.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    end = next_idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            pieces.push(&text[start..end]);
            start = end;
            after_terminator = false;
        } else {
            after_terminator = false;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Options handed to a [`Segmenter`] for one play session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterOptions {
    /// Characters of lookahead required after a boundary before it is trusted
    pub context_size: usize,
    pub minimum_sentence_length: usize,
    pub minimum_first_fragment_length: usize,
    /// Release the first fragment at the first fragment delimiter
    pub quick_yield_single_sentence_fragment: bool,
    /// Release every sentence at its terminator, without lookahead
    pub quick_yield_for_all_sentences: bool,
    /// Release at every fragment delimiter, for all sentences
    pub quick_yield_every_fragment: bool,
    /// Release the first fragment after this many words even without a delimiter (0 disables)
    pub force_first_fragment_after_words: usize,
    pub cleanup_text_links: bool,
    pub cleanup_text_emojis: bool,
    pub tokenizer: Tokenizer,
    pub language: String,
    pub log_characters: bool,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            context_size: 12,
            minimum_sentence_length: 10,
            minimum_first_fragment_length: 10,
            quick_yield_single_sentence_fragment: true,
            quick_yield_for_all_sentences: false,
            quick_yield_every_fragment: false,
            force_first_fragment_after_words: 30,
            cleanup_text_links: false,
            cleanup_text_emojis: false,
            tokenizer: Tokenizer::Unicode,
            language: "en".to_string(),
            log_characters: false,
        }
    }
}

/// Turns a character stream into sentences.
///
/// Implementations must be safe to call with an unbounded, slowly arriving
/// stream: they may only buffer the sentence in progress.
pub trait Segmenter: Send + Sync {
    /// One-time setup for a tokenizer and language
    fn init(&self, _tokenizer: Tokenizer, _language: &str) -> Result<()> {
        Ok(())
    }

    fn generate_sentences(&self, chars: CharStream, options: &SegmenterOptions) -> SentenceStream;
}

/// The default, language-neutral segmenter
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSegmenter;

impl Segmenter for StreamSegmenter {
    fn generate_sentences(&self, chars: CharStream, options: &SegmenterOptions) -> SentenceStream {
        Box::new(Sentences::new(chars, options.clone()))
    }
}

struct Sentences {
    chars: CharStream,
    opts: SegmenterOptions,
    buffer: String,
    ready: VecDeque<String>,
    /// Sentences below the length floor, waiting to be fused with the next one
    held: Option<String>,
    yielded_any: bool,
    exhausted: bool,
}

impl Sentences {
    fn new(chars: CharStream, opts: SegmenterOptions) -> Self {
        Self {
            chars,
            opts,
            buffer: String::new(),
            ready: VecDeque::new(),
            held: None,
            yielded_any: false,
            exhausted: false,
        }
    }

    fn push(&mut self, c: char) {
        if self.opts.log_characters {
            trace!(character = %c.escape_debug(), "segmenter input");
        }
        self.buffer.push(c);

        if !self.try_quick_yield(c) {
            self.try_split();
        }
    }

    fn floor(&self) -> usize {
        if self.yielded_any {
            self.opts.minimum_sentence_length
        } else {
            self.opts.minimum_first_fragment_length
        }
    }

    /// Release the buffer early when it ends on a delimiter followed by whitespace
    fn try_quick_yield(&mut self, c: char) -> bool {
        if !c.is_whitespace() {
            return false;
        }
        let first = !self.yielded_any;
        let delimiters = if self.opts.quick_yield_every_fragment
            || (first && self.opts.quick_yield_single_sentence_fragment)
        {
            SENTENCE_FRAGMENT_DELIMITERS
        } else if self.opts.quick_yield_for_all_sentences {
            FULL_SENTENCE_DELIMITERS
        } else {
            &[]
        };

        let held_len = self.held.as_ref().map_or(0, |h| h.chars().count() + 1);
        let candidate = self.buffer.trim();
        if held_len + candidate.chars().count() < self.floor() {
            return false;
        }
        let ends_on_delimiter = candidate
            .chars()
            .last()
            .is_some_and(|last| delimiters.contains(&last));
        let forced = first
            && self.opts.force_first_fragment_after_words > 0
            && candidate.split_whitespace().count() >= self.opts.force_first_fragment_after_words;

        if ends_on_delimiter || forced {
            let fragment = std::mem::take(&mut self.buffer);
            self.emit(&fragment);
            return true;
        }
        false
    }

    /// Release every complete sentence once enough lookahead has arrived
    fn try_split(&mut self) {
        if !self.buffer.contains(FULL_SENTENCE_DELIMITERS) {
            return;
        }
        let (complete, tail) = {
            let pieces = self.opts.tokenizer.split(&self.buffer);
            if pieces.len() < 2 {
                return;
            }
            let tail = pieces[pieces.len() - 1];
            if tail.chars().count() < self.opts.context_size {
                return;
            }
            let complete: Vec<String> = pieces[..pieces.len() - 1]
                .iter()
                .map(|s| s.to_string())
                .collect();
            (complete, tail.to_string())
        };
        self.buffer = tail;
        for sentence in complete {
            self.emit(&sentence);
        }
    }

    fn flush(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        let pieces: Vec<String> = self
            .opts
            .tokenizer
            .split(&rest)
            .into_iter()
            .map(str::to_string)
            .collect();
        for sentence in pieces {
            self.emit(&sentence);
        }
        if let Some(rest) = self.held.take() {
            self.yielded_any = true;
            self.ready.push_back(rest);
        }
    }

    fn emit(&mut self, raw: &str) {
        let cleaned = clean_text(
            raw,
            self.opts.cleanup_text_links,
            self.opts.cleanup_text_emojis,
        );
        let sentence = cleaned.trim();
        if sentence.is_empty() {
            return;
        }
        let candidate = match self.held.take() {
            Some(held) => format!("{held} {sentence}"),
            None => sentence.to_string(),
        };
        if candidate.chars().count() < self.floor() {
            self.held = Some(candidate);
            return;
        }
        self.yielded_any = true;
        self.ready.push_back(candidate);
    }
}

impl Iterator for Sentences {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(sentence) = self.ready.pop_front() {
                return Some(sentence);
            }
            if self.exhausted {
                return None;
            }
            match self.chars.next() {
                Some(c) => self.push(c),
                None => {
                    self.exhausted = true;
                    self.flush();
                }
            }
        }
    }
}
