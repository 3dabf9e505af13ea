//! Sentence post-processing between the segmenter and the dispatcher.
//!
//! [`SentenceFloor`] trims sentences and fuses the ones below the length
//! floors with their successors. [`ChunkAggregator`] fuses whole sentences
//! into one synthesis request while playback is comfortably buffered, since
//! most engines pay a fixed cost per request.

use std::sync::Arc;

use tracing::debug;

/// Source of the playback backpressure signal, in seconds of buffered audio
pub type BufferedSeconds = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Enforces the first-fragment and sentence length floors.
///
/// The first item is at least `minimum_first_fragment_length` characters long
/// and every later item at least `minimum_sentence_length`, except for the
/// remainder flushed when the input ends.
pub struct SentenceFloor<I> {
    inner: I,
    minimum_first_fragment_length: usize,
    minimum_sentence_length: usize,
    held: Option<String>,
    emitted_any: bool,
}

impl<I> SentenceFloor<I>
where
    I: Iterator<Item = String>,
{
    pub fn new(inner: I, minimum_first_fragment_length: usize, minimum_sentence_length: usize) -> Self {
        Self {
            inner,
            minimum_first_fragment_length,
            minimum_sentence_length,
            held: None,
            emitted_any: false,
        }
    }
}

impl<I> Iterator for SentenceFloor<I>
where
    I: Iterator<Item = String>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let Some(sentence) = self.inner.next() else {
                let rest = self.held.take();
                if rest.is_some() {
                    self.emitted_any = true;
                }
                return rest;
            };
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let candidate = match self.held.take() {
                Some(held) => format!("{held} {sentence}"),
                None => sentence.to_string(),
            };
            let floor = if self.emitted_any {
                self.minimum_sentence_length
            } else {
                self.minimum_first_fragment_length
            };
            if candidate.chars().count() >= floor {
                self.emitted_any = true;
                return Some(candidate);
            }
            self.held = Some(candidate);
        }
    }
}

/// Groups sentences into dispatch units based on buffered playback.
///
/// A sentence is released immediately while less than `threshold` seconds
/// of audio are queued (or when the threshold is disabled with a value
/// `<= 0`); otherwise it is appended to the pending unit, separated by a
/// single space, and the check repeats on the next sentence.
pub struct ChunkAggregator<I> {
    inner: I,
    threshold: f64,
    buffered: BufferedSeconds,
    pending: String,
}

impl<I> ChunkAggregator<I>
where
    I: Iterator<Item = String>,
{
    pub fn new(inner: I, threshold: f64, buffered: BufferedSeconds) -> Self {
        Self {
            inner,
            threshold,
            buffered,
            pending: String::new(),
        }
    }
}

impl<I> Iterator for ChunkAggregator<I>
where
    I: Iterator<Item = String>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(sentence) = self.inner.next() {
            let buffered = (self.buffered)();
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            if !self.pending.is_empty() {
                self.pending.push(' ');
            }
            self.pending.push_str(sentence);

            if self.threshold <= 0.0 || buffered < self.threshold {
                return Some(std::mem::take(&mut self.pending));
            }
            debug!(
                buffered_seconds = buffered,
                threshold = self.threshold,
                "Playback well buffered, fusing sentence into the next request"
            );
        }

        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
