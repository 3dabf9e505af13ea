//! Thread-safe character stream over fed strings and lazy text sources.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::Error;

/// Error produced by a fallible lazy text source
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

type LazyText = Box<dyn Iterator<Item = Result<String, SourceError>> + Send>;

/// One fed item: a complete string or a lazily produced sequence of strings
/// (for example tokens streamed from a language model).
pub enum TextSource {
    Text(String),
    Lazy(LazyText),
}

impl TextSource {
    /// Wrap an infallible iterator of text fragments
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: Send + 'static,
        S: Into<String>,
    {
        TextSource::Lazy(Box::new(fragments.into_iter().map(|s| Ok(s.into()))))
    }

    /// Wrap an iterator whose fragments may fail. A failure ends that source;
    /// the error is recorded and later sources still play.
    pub fn from_fallible<I, S, E>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Result<S, E>>,
        I::IntoIter: Send + 'static,
        S: Into<String>,
        E: Into<SourceError>,
    {
        TextSource::Lazy(Box::new(
            fragments
                .into_iter()
                .map(|item| item.map(Into::into).map_err(Into::into)),
        ))
    }
}

impl fmt::Debug for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextSource::Text(text) => f.debug_tuple("Text").field(text).finish(),
            TextSource::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<String> for TextSource {
    fn from(text: String) -> Self {
        TextSource::Text(text)
    }
}

impl From<&str> for TextSource {
    fn from(text: &str) -> Self {
        TextSource::Text(text.to_string())
    }
}

type CharHook = Arc<dyn Fn(char) + Send + Sync>;
type EventHook = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle hooks fired by the iterator
#[derive(Clone, Default)]
pub struct CharHooks {
    pub on_character: Option<CharHook>,
    pub on_first_text_chunk: Option<EventHook>,
    pub on_last_text_chunk: Option<EventHook>,
}

#[derive(Default)]
struct State {
    items: VecDeque<TextSource>,
    pending: VecDeque<char>,
    accumulated: String,
    started: bool,
    finished: bool,
    errors: Vec<Error>,
    hooks: CharHooks,
}

struct Inner {
    state: Mutex<State>,
    stopped: AtomicBool,
}

/// Multi-producer, single-consumer character stream.
///
/// Clones share the same stream. Characters from an earlier [`add`](Self::add)
/// are always yielded before those of a later one, and [`stop`](Self::stop) is
/// observed by the very next call to [`next_char`](Self::next_char).
#[derive(Clone)]
pub struct CharIterator {
    inner: Arc<Inner>,
}

impl Default for CharIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl CharIterator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_hooks(&self, hooks: CharHooks) {
        self.inner.state.lock().hooks = hooks;
    }

    /// Append a string or lazy source. Safe while another thread iterates.
    pub fn add(&self, item: impl Into<TextSource>) {
        self.inner.state.lock().items.push_back(item.into());
    }

    /// End iteration at the next call, even if items remain
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Everything yielded so far, concatenated
    pub fn accumulated_text(&self) -> String {
        self.inner.state.lock().accumulated.clone()
    }

    /// True when nothing is queued and no lazy source is in progress
    pub fn is_empty(&self) -> bool {
        let state = self.inner.state.lock();
        state.items.is_empty() && state.pending.is_empty()
    }

    /// Errors raised by lazy sources since the last call
    pub fn take_errors(&self) -> Vec<Error> {
        std::mem::take(&mut self.inner.state.lock().errors)
    }

    /// Prepare for a new play session: drop unconsumed items and rearm the
    /// lifecycle hooks. The accumulated text is kept.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.items.clear();
        state.pending.clear();
        state.started = false;
        state.finished = false;
        state.errors.clear();
        self.inner.stopped.store(false, Ordering::Release);
    }

    /// Undo a `stop()` that arrived after the last reset. Queued items are kept.
    pub fn rearm(&self) {
        self.inner.stopped.store(false, Ordering::Release);
    }

    pub fn clear_accumulated(&self) {
        self.inner.state.lock().accumulated.clear();
    }

    /// Next character, or `None` once every item is drained or after `stop()`.
    ///
    /// Lazy sources are pulled without holding the lock, so a slow generator
    /// never blocks `add` or `stop` on other threads.
    pub fn next_char(&self) -> Option<char> {
        loop {
            if self.is_stopped() {
                return None;
            }

            let mut state = self.inner.state.lock();
            if let Some(c) = state.pending.pop_front() {
                let first = !state.started;
                state.started = true;
                state.accumulated.push(c);
                let hooks = state.hooks.clone();
                drop(state);

                if first {
                    if let Some(hook) = &hooks.on_first_text_chunk {
                        hook();
                    }
                }
                if let Some(hook) = &hooks.on_character {
                    hook(c);
                }
                trace!(character = %c.escape_debug(), "yielded character");
                return Some(c);
            }

            match state.items.pop_front() {
                Some(TextSource::Text(text)) => {
                    state.pending.extend(text.chars());
                }
                Some(TextSource::Lazy(mut source)) => {
                    drop(state);
                    let fragment = source.next();
                    let mut state = self.inner.state.lock();
                    match fragment {
                        Some(Ok(text)) => {
                            state.pending.extend(text.chars());
                            state.items.push_front(TextSource::Lazy(source));
                        }
                        Some(Err(err)) => {
                            warn!("Text source failed, skipping the rest of it: {}", err);
                            state.errors.push(Error::TextSource(err.to_string()));
                        }
                        None => {}
                    }
                }
                None => {
                    let fire_last = !state.finished;
                    state.finished = true;
                    let hook = state.hooks.on_last_text_chunk.clone();
                    drop(state);
                    if fire_last {
                        if let Some(hook) = hook {
                            hook();
                        }
                    }
                    return None;
                }
            }
        }
    }
}

impl Iterator for CharIterator {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        self.next_char()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn yields_items_in_feed_order() {
        let chars = CharIterator::new();
        chars.add("ab");
        chars.add(TextSource::from_fragments(vec!["c", "de"]));
        chars.add(String::from("f"));

        let text: String = chars.clone().collect();
        assert_eq!(text, "abcdef");
        assert_eq!(chars.accumulated_text(), "abcdef");
    }

    #[test]
    fn stop_ends_iteration_immediately() {
        let chars = CharIterator::new();
        chars.add("hello world");
        assert_eq!(chars.next_char(), Some('h'));
        chars.stop();
        chars.add("more");
        assert_eq!(chars.next_char(), None);
        assert_eq!(chars.accumulated_text(), "h");
    }

    #[test]
    fn hooks_fire_once_per_session() {
        let chars = CharIterator::new();
        let firsts = Arc::new(AtomicUsize::new(0));
        let lasts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let (f, l, s) = (firsts.clone(), lasts.clone(), seen.clone());
        chars.set_hooks(CharHooks {
            on_character: Some(Arc::new(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            on_first_text_chunk: Some(Arc::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })),
            on_last_text_chunk: Some(Arc::new(move || {
                l.fetch_add(1, Ordering::SeqCst);
            })),
        });

        chars.add("abc");
        while chars.next_char().is_some() {}
        assert_eq!(chars.next_char(), None);

        assert_eq!(firsts.load(Ordering::SeqCst), 1);
        assert_eq!(lasts.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn last_hook_does_not_fire_on_stop() {
        let chars = CharIterator::new();
        let lasts = Arc::new(AtomicUsize::new(0));
        let l = lasts.clone();
        chars.set_hooks(CharHooks {
            on_last_text_chunk: Some(Arc::new(move || {
                l.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        });
        chars.add("abc");
        chars.next_char();
        chars.stop();
        assert_eq!(chars.next_char(), None);
        assert_eq!(lasts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_source_is_skipped_and_recorded() {
        let chars = CharIterator::new();
        let fragments: Vec<Result<String, std::io::Error>> = vec![
            Ok("ok ".to_string()),
            Err(std::io::Error::other("stream broke")),
            Ok("never".to_string()),
        ];
        chars.add(TextSource::from_fallible(fragments));
        chars.add("after");

        let text: String = chars.clone().collect();
        assert_eq!(text, "ok after");
        let errors = chars.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::TextSource(msg) if msg == "stream broke"));
    }

    #[test]
    fn slow_generator_does_not_block_producers() {
        let chars = CharIterator::new();
        let slow = (0..3).map(|i| {
            thread::sleep(Duration::from_millis(20));
            i.to_string()
        });
        chars.add(TextSource::from_fragments(slow));

        let consumer = {
            let chars = chars.clone();
            thread::spawn(move || chars.collect::<String>())
        };
        thread::sleep(Duration::from_millis(5));
        chars.add("x");

        assert_eq!(consumer.join().unwrap(), "012x");
    }

    #[test]
    fn reset_keeps_accumulated_text() {
        let chars = CharIterator::new();
        chars.add("abc");
        chars.next_char();
        chars.stop();
        chars.reset();
        assert!(chars.is_empty());
        assert!(!chars.is_stopped());
        chars.add("d");
        assert_eq!(chars.next_char(), Some('d'));
        assert_eq!(chars.accumulated_text(), "ad");
    }

    #[test]
    fn rearm_keeps_text_fed_after_a_late_stop() {
        let chars = CharIterator::new();
        chars.reset();
        chars.stop();
        chars.add("next");
        chars.rearm();
        assert_eq!(chars.collect::<String>(), "next");
    }
}
