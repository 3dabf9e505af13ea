use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sirius::{
    AudioOutput, Error, MemorySink, PlayOptions, Result, SharedSynthesizer, SinkEvent,
    StreamCallbacks, StreamInfo, Synthesizer, TextSource, TextToAudioStream, TimingInfo,
};

/// Deterministic engine: a fixed number of bytes per character, cut into chunks
struct Scripted {
    name: &'static str,
    info: StreamInfo,
    bytes_per_char: usize,
    chunk_bytes: usize,
    chunk_delay: Duration,
    failures: AtomicUsize,
    fail_on: Option<&'static str>,
    utterances: Mutex<Vec<String>>,
    pushed: AtomicUsize,
    stopped: AtomicBool,
}

impl Scripted {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            info: StreamInfo::int16(1, 24000),
            bytes_per_char: 64,
            chunk_bytes: 512,
            chunk_delay: Duration::ZERO,
            failures: AtomicUsize::new(0),
            fail_on: None,
            utterances: Mutex::new(Vec::new()),
            pushed: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::Release);
        self
    }

    /// Fail every utterance containing `needle`
    fn failing_on(mut self, needle: &'static str) -> Self {
        self.fail_on = Some(needle);
        self
    }

    fn bytes_per_char(mut self, n: usize) -> Self {
        self.bytes_per_char = n;
        self
    }

    fn chunks(mut self, bytes: usize, delay: Duration) -> Self {
        self.chunk_bytes = bytes;
        self.chunk_delay = delay;
        self
    }

    fn utterances(&self) -> Vec<String> {
        self.utterances.lock().clone()
    }
}

impl Synthesizer for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn synthesize(&self, text: &str, out: &AudioOutput) -> Result<()> {
        self.stopped.store(false, Ordering::Release);
        self.utterances.lock().push(text.to_string());
        let remaining = self.failures.load(Ordering::Acquire);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::Release);
            return Err(Error::synthesis(self.name, "scripted failure"));
        }
        if self.fail_on.is_some_and(|needle| text.contains(needle)) {
            return Err(Error::synthesis(self.name, "scripted failure"));
        }

        let audio: Vec<u8> = (0..text.chars().count() * self.bytes_per_char)
            .map(|i| (i % 251) as u8)
            .collect();
        for chunk in audio.chunks(self.chunk_bytes) {
            if self.stopped.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            if !self.chunk_delay.is_zero() {
                thread::sleep(self.chunk_delay);
            }
            if !out.push(chunk) {
                return Err(Error::Cancelled);
            }
            self.pushed.fetch_add(chunk.len(), Ordering::AcqRel);
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn single(engine: &Arc<Scripted>, sink: &MemorySink) -> TextToAudioStream {
    TextToAudioStream::new(engine.clone(), sink.clone())
}

#[test]
fn simple_text_becomes_two_utterances() {
    let engine = Arc::new(Scripted::new("scripted"));
    let sink = MemorySink::new();
    let stream = single(&engine, &sink);

    stream.feed("Hello, World! This is a test.");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(engine.utterances(), ["Hello, World!", "This is a test."]);
    assert!(!sink.bytes().is_empty());
    assert_eq!(sink.bytes().len(), engine.pushed.load(Ordering::Acquire));
    assert_eq!(stream.text(), "Hello, World! This is a test.");
    assert!(!stream.is_playing());
}

#[test]
fn first_fragment_is_released_at_the_first_sentence_boundary() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &MemorySink::new());
    let text = "Greetings everyone. Nice to meet you all.";

    let slow = text
        .chars()
        .collect::<Vec<_>>()
        .into_iter()
        .map(|c| {
            thread::sleep(Duration::from_millis(2));
            c.to_string()
        });
    stream.feed(TextSource::from_fragments(slow));
    stream.play(PlayOptions::default()).unwrap();

    let utterances = engine.utterances();
    assert_eq!(utterances[0], "Greetings everyone.");
    assert_eq!(utterances.join(" "), text);
    assert_eq!(stream.text(), text);
}

#[test]
fn short_sentences_are_fused_up_to_the_floor() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &MemorySink::new());

    stream.feed("Hi. Bye. Thanks for the test.");
    stream.play(PlayOptions::default()).unwrap();

    let utterances = engine.utterances();
    let (last, rest) = utterances.split_last().unwrap();
    assert!(rest.iter().all(|u| u.chars().count() >= 10), "{utterances:?}");
    assert!(!last.is_empty());
    assert_eq!(utterances.join(" "), "Hi. Bye. Thanks for the test.");
}

#[test]
fn failed_utterance_is_retried_on_the_next_engine() {
    let first = Arc::new(Scripted::new("first").failing_first(1));
    let second = Arc::new(Scripted::new("second"));
    let sink = MemorySink::new();
    let stream = TextToAudioStream::with_engines(
        vec![first.clone() as SharedSynthesizer, second.clone()],
        sink.clone(),
    )
    .unwrap();

    stream.feed("Sentence one. Sentence two.");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(first.utterances(), ["Sentence one."]);
    assert_eq!(second.utterances(), ["Sentence one.", "Sentence two."]);
    assert_eq!(stream.current_engine().unwrap().name(), "second");
    // Playback was restarted for the new engine
    assert_eq!(sink.opened_with().len(), 2);
    assert_eq!(sink.bytes().len(), second.pushed.load(Ordering::Acquire));
}

#[test]
fn single_engine_drops_a_failed_utterance_and_continues() {
    let engine = Arc::new(Scripted::new("only").failing_first(1));
    let sink = MemorySink::new();
    let stream = single(&engine, &sink);

    stream.feed("Sentence one. Sentence two.");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(engine.utterances(), ["Sentence one.", "Sentence two."]);
    assert_eq!(sink.bytes().len(), "Sentence two.".len() * 64);
}

#[test]
fn stop_is_prompt_and_silences_callbacks() {
    let engine = Arc::new(
        Scripted::new("slow")
            .bytes_per_char(4800)
            .chunks(4800, Duration::from_millis(5)),
    );
    let sink = MemorySink::new().paced();
    let chunks = Arc::new(AtomicUsize::new(0));
    let counter = chunks.clone();
    let stream = single(&engine, &sink).with_callbacks(
        StreamCallbacks::new().with_on_audio_chunk(move |_| {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    for _ in 0..20 {
        stream.feed("This is a rather long sentence that keeps going. ");
    }
    stream.play_async(PlayOptions::default()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || chunks.load(Ordering::Acquire) > 0));

    let started = Instant::now();
    stream.stop();
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(!stream.is_playing());

    let after_stop = chunks.load(Ordering::Acquire);
    let writes = sink.write_count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(chunks.load(Ordering::Acquire), after_stop);
    assert_eq!(sink.write_count(), writes);
    assert!(engine.utterances().len() < 20);
}

#[test]
fn stop_is_idempotent() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &MemorySink::new());
    stream.stop();

    stream.feed("Hello there, how are you?");
    stream.play_async(PlayOptions::default()).unwrap();
    stream.stop();
    stream.stop();
    assert!(!stream.is_playing());

    // The stream is reusable after a stop
    stream.feed("A second session works.");
    stream.play(PlayOptions::default()).unwrap();
    assert_eq!(stream.text(), "A second session works.");
}

#[test]
fn stop_after_a_finished_session_leaves_the_next_one_intact() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &MemorySink::new());

    stream.feed("First session sentence.");
    stream.play(PlayOptions::default()).unwrap();
    stream.stop();

    stream.feed("Second session sentence.");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(
        engine.utterances(),
        ["First session sentence.", "Second session sentence."]
    );
    assert_eq!(stream.text(), "Second session sentence.");
}

fn failing_over_pair() -> (Arc<Scripted>, Arc<Scripted>, MemorySink, TextToAudioStream) {
    let primary = Arc::new(
        Scripted::new("primary")
            .bytes_per_char(320)
            .failing_on("Second"),
    );
    let backup = Arc::new(Scripted::new("backup"));
    let sink = MemorySink::new().paced();
    let stream = TextToAudioStream::with_engines(
        vec![primary.clone() as SharedSynthesizer, backup.clone()],
        sink.clone(),
    )
    .unwrap();
    stream.feed("First sentence is long enough. Second sentence fails here.");
    (primary, backup, sink, stream)
}

#[test]
fn paused_session_holds_the_fail_over_until_resume() {
    let (primary, backup, sink, stream) = failing_over_pair();

    stream.play_async(PlayOptions::default()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.write_count() > 0));
    stream.pause();
    assert!(wait_until(Duration::from_secs(2), || primary.utterances().len() == 2));

    thread::sleep(Duration::from_millis(500));
    assert!(backup.utterances().is_empty());
    assert!(stream.is_playing());
    let first_audio = "First sentence is long enough.".len() * 320;
    assert!(sink.bytes().len() < first_audio);

    stream.resume();
    stream.wait().unwrap();
    assert_eq!(backup.utterances(), ["Second sentence fails here."]);
    assert_eq!(
        sink.bytes().len(),
        first_audio + backup.pushed.load(Ordering::Acquire)
    );
}

#[test]
fn stop_from_a_chunk_callback_during_fail_over_does_not_hang() {
    let (primary, _backup, _sink, stream) = failing_over_pair();
    let stream = Arc::new(stream);
    let handle = Arc::downgrade(&stream);
    let watched = primary.clone();
    stream.set_callbacks(StreamCallbacks::new().with_on_audio_chunk(move |_| {
        if watched.utterances().len() >= 2 {
            if let Some(stream) = handle.upgrade() {
                stream.stop();
            }
        }
    }));

    stream.play_async(PlayOptions::default()).unwrap();
    assert!(wait_until(Duration::from_secs(3), || !stream.is_playing()));
    assert!(primary.utterances().len() >= 2);
    stream.stop();
}

#[test]
fn wav_recording_matches_enqueued_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.wav");
    let engine = Arc::new(Scripted::new("scripted"));
    let sink = MemorySink::new();
    let stream = single(&engine, &sink);

    stream.feed("The first sentence. And the second one.");
    stream
        .play(PlayOptions::default().with_output_wavfile(&path))
        .unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 24000);
    assert_eq!(spec.bits_per_sample, 16);
    let enqueued = engine.pushed.load(Ordering::Acquire);
    assert_eq!(reader.len() as usize, enqueued / 2);
    assert_eq!(sink.bytes().len(), enqueued);
}

#[test]
fn muted_sessions_still_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("muted.wav");
    let engine = Arc::new(Scripted::new("scripted"));
    let sink = MemorySink::new();
    let stream = single(&engine, &sink);

    stream.feed("Nobody hears this sentence.");
    stream
        .play(PlayOptions::default().with_output_wavfile(&path).muted(true))
        .unwrap();

    assert!(sink.bytes().is_empty());
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.len() as usize, engine.pushed.load(Ordering::Acquire) / 2);
}

struct FloatEngine;

impl Synthesizer for FloatEngine {
    fn name(&self) -> &str {
        "float"
    }

    fn stream_info(&self) -> StreamInfo {
        StreamInfo::float32(1, 16000)
    }

    fn synthesize(&self, _text: &str, out: &AudioOutput) -> Result<()> {
        let samples = [0.5f32, 2.0, -2.0, 0.0, -0.25];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        // Split mid-sample to exercise frame alignment
        out.push(&bytes[..7]);
        out.push(&bytes[7..]);
        Ok(())
    }
}

#[test]
fn float_engines_are_normalized_to_int16() {
    let sink = MemorySink::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let chunks = seen.clone();
    let stream = TextToAudioStream::new(Arc::new(FloatEngine), sink.clone()).with_callbacks(
        StreamCallbacks::new().with_on_audio_chunk(move |c| chunks.lock().push(c.len())),
    );

    stream.feed("Just one sentence.");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(sink.opened_with(), vec![StreamInfo::int16(1, 16000)]);
    assert!(seen.lock().iter().all(|len| len % 2 == 0));
    let samples: Vec<i16> = sink
        .bytes()
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert_eq!(samples, vec![16383, 32767, -32767, 0, -8191]);
}

#[test]
fn backpressure_fuses_sentences_while_audio_is_buffered() {
    let engine = Arc::new(Scripted::new("scripted").bytes_per_char(2400).chunks(2400, Duration::ZERO));
    let stream = single(&engine, &MemorySink::new());
    let sentences = [
        "The first sentence is here. ",
        "Then comes the second one. ",
        "A third sentence follows. ",
        "The fourth is not far behind. ",
        "And the fifth closes it.",
    ];
    let slow = sentences.into_iter().map(|s| {
        thread::sleep(Duration::from_millis(150));
        s.to_string()
    });
    stream.feed(TextSource::from_fragments(slow));

    stream.pause();
    stream
        .play_async(PlayOptions::default().with_buffer_threshold(0.5))
        .unwrap();
    assert!(stream.is_playing());
    // play_async resets pause state, so pause again for the session
    stream.pause();
    assert!(wait_until(Duration::from_secs(5), || stream.buffered_seconds() >= 0.5));

    assert!(wait_until(Duration::from_secs(5), || engine.utterances().len() >= 2));
    stream.resume();
    stream.wait().unwrap();

    let utterances = engine.utterances();
    assert!(utterances.len() < sentences.len(), "{utterances:?}");
    assert_eq!(utterances.join(" "), sentences.concat().trim());
}

#[test]
fn second_play_is_rejected_while_playing() {
    let engine = Arc::new(Scripted::new("scripted").bytes_per_char(4800));
    let stream = single(&engine, &MemorySink::new().paced());

    stream.feed("A sentence that takes a while to play back.");
    stream.play_async(PlayOptions::default()).unwrap();
    assert!(matches!(
        stream.play_async(PlayOptions::default()),
        Err(Error::AlreadyPlaying)
    ));
    assert!(matches!(
        stream.load_engine(Arc::new(Scripted::new("other"))),
        Err(Error::AlreadyPlaying)
    ));
    stream.stop();
}

#[test]
fn invalid_options_are_rejected_before_the_session() {
    let stream = single(&Arc::new(Scripted::new("scripted")), &MemorySink::new());
    stream.feed("Some text.");
    let result = stream.play(PlayOptions::default().with_buffer_threshold(-2.0));
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(!stream.is_playing());
}

#[test]
fn device_failure_ends_the_session() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stopped = Arc::new(AtomicUsize::new(0));
    let counter = stopped.clone();
    let stream = single(&engine, &MemorySink::new().failing_on_write(1)).with_callbacks(
        StreamCallbacks::new().with_on_audio_stream_stop(move || {
            counter.fetch_add(1, Ordering::AcqRel);
        }),
    );

    for _ in 0..10 {
        stream.feed("Sentence after sentence after sentence. ");
    }
    let result = stream.play(PlayOptions::default());

    assert!(matches!(result, Err(Error::Device(_))), "{result:?}");
    assert!(!stream.is_playing());
    assert_eq!(stopped.load(Ordering::Acquire), 1);
}

#[test]
fn device_open_failure_is_returned_by_play() {
    let stream = single(
        &Arc::new(Scripted::new("scripted")),
        &MemorySink::new().failing_on_open(),
    );
    stream.feed("Unheard.");
    assert!(matches!(
        stream.play(PlayOptions::default()),
        Err(Error::Device(_))
    ));
    assert!(!stream.is_playing());
}

#[test]
fn lifecycle_callbacks_fire_once_each() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = MemorySink::new();
    let events_at_stop = Arc::new(Mutex::new(Vec::new()));
    let callbacks = {
        let (a, b, c, d, e, f) = (
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
        );
        let (device, seen) = (sink.clone(), events_at_stop.clone());
        StreamCallbacks::new()
            .with_on_text_stream_start(move || a.lock().push("text start".into()))
            .with_on_text_stream_stop(move || b.lock().push("text stop".into()))
            .with_before_sentence_synthesized(move |t| c.lock().push(format!("before {t}")))
            .with_on_sentence_synthesized(move |t| d.lock().push(format!("done {t}")))
            .with_on_audio_stream_start(move || e.lock().push("audio start".into()))
            .with_on_audio_stream_stop(move || {
                f.lock().push("audio stop".into());
                *seen.lock() = device.events();
            })
    };
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &sink).with_callbacks(callbacks);

    stream.feed("Only one sentence here.");
    stream.play(PlayOptions::default()).unwrap();

    let log = log.lock().clone();
    let count = |entry: &str| log.iter().filter(|e| e.as_str() == entry).count();
    assert_eq!(count("text start"), 1);
    assert_eq!(count("text stop"), 1);
    assert_eq!(count("audio start"), 1);
    assert_eq!(count("audio stop"), 1);
    assert_eq!(log.first().map(String::as_str), Some("text start"));
    assert_eq!(log.last().map(String::as_str), Some("audio stop"));
    let before = log.iter().position(|e| e == "before Only one sentence here.");
    let done = log.iter().position(|e| e == "done Only one sentence here.");
    assert!(before.is_some() && before < done);

    // The device is still open when on_audio_stream_stop runs
    let at_stop = events_at_stop.lock().clone();
    assert!(at_stop.iter().any(|e| matches!(e, SinkEvent::Write(_))));
    assert!(!at_stop.contains(&SinkEvent::Close));
    assert_eq!(sink.events().last(), Some(&SinkEvent::Close));
}

#[test]
fn failing_text_source_does_not_end_the_session() {
    let engine = Arc::new(Scripted::new("scripted"));
    let stream = single(&engine, &MemorySink::new());

    stream.feed(TextSource::from_fallible(vec![
        Ok("Streamed tokens arrive, ".to_string()),
        Err(std::io::Error::other("connection reset")),
        Ok("never seen".to_string()),
    ]));
    stream.feed(" and later text still plays.");
    let result = stream.play(PlayOptions::default());

    assert!(matches!(result, Err(Error::TextSource(msg)) if msg.contains("connection reset")));
    assert_eq!(
        stream.text(),
        "Streamed tokens arrive,  and later text still plays."
    );
    assert!(!engine.utterances().is_empty());
}

/// Consumes the character stream directly and reports word timings
struct StreamingEngine {
    heard: Mutex<String>,
}

impl Synthesizer for StreamingEngine {
    fn name(&self) -> &str {
        "streaming"
    }

    fn stream_info(&self) -> StreamInfo {
        StreamInfo::int16(1, 24000)
    }

    fn synthesize(&self, _text: &str, _out: &AudioOutput) -> Result<()> {
        Err(Error::synthesis("streaming", "expects a text stream"))
    }

    fn can_consume_generators(&self) -> bool {
        true
    }

    fn synthesize_stream(
        &self,
        chars: &mut (dyn Iterator<Item = char> + Send),
        out: &AudioOutput,
    ) -> Result<()> {
        let mut word = String::new();
        let mut at = 0.0;
        for c in chars {
            self.heard.lock().push(c);
            out.push(&[0, 0]);
            if c.is_whitespace() {
                if !word.is_empty() {
                    out.push_timing(TimingInfo::new(word.as_str(), at, at + 0.1));
                    at += 0.1;
                    word.clear();
                }
            } else {
                word.push(c);
            }
        }
        if !word.is_empty() {
            out.push_timing(TimingInfo::new(word, at, at + 0.1));
        }
        Ok(())
    }
}

#[test]
fn stream_consuming_engines_get_the_raw_characters() {
    let engine = Arc::new(StreamingEngine {
        heard: Mutex::new(String::new()),
    });
    let sink = MemorySink::new();
    let words = Arc::new(Mutex::new(Vec::new()));
    let seen = words.clone();
    let stream = TextToAudioStream::new(engine.clone(), sink.clone()).with_callbacks(
        StreamCallbacks::new().with_on_word(move |t| seen.lock().push(t.word.clone())),
    );
    let timings = stream.timings();

    stream.feed("no segmentation needed");
    stream.play(PlayOptions::default()).unwrap();

    assert_eq!(engine.heard.lock().as_str(), "no segmentation needed");
    assert_eq!(sink.bytes().len(), "no segmentation needed".len() * 2);
    assert_eq!(words.lock().as_slice(), ["no", "segmentation", "needed"]);
    let received: Vec<_> = timings.try_iter().map(|t| t.word).collect();
    assert_eq!(received, ["no", "segmentation", "needed"]);
}

#[test]
fn custom_format_is_recorded_verbatim() {
    struct Mpeg;
    impl Synthesizer for Mpeg {
        fn name(&self) -> &str {
            "mpeg"
        }
        fn stream_info(&self) -> StreamInfo {
            StreamInfo::custom()
        }
        fn synthesize(&self, _text: &str, out: &AudioOutput) -> Result<()> {
            out.push(b"\xFF\xFBframe");
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.mp3");
    let sink = MemorySink::new();
    let stream = TextToAudioStream::new(Arc::new(Mpeg), sink.clone());

    stream.feed("One sentence only.");
    stream
        .play(PlayOptions::default().with_output_wavfile(&path))
        .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"\xFF\xFBframe");
    assert_eq!(sink.bytes(), b"\xFF\xFBframe");
    assert_eq!(sink.opened_with(), vec![StreamInfo::custom()]);
    assert_eq!(stream.buffered_seconds(), 0.0);
}

#[test]
fn events_close_the_device_once_per_session() {
    let engine = Arc::new(Scripted::new("scripted"));
    let sink = MemorySink::new();
    let stream = single(&engine, &sink);

    stream.feed("First session sentence.");
    stream.play(PlayOptions::default()).unwrap();
    stream.feed("Second session sentence.");
    stream.play(PlayOptions::default()).unwrap();

    let events = sink.events();
    let opens = events.iter().filter(|e| matches!(e, SinkEvent::Open(_))).count();
    let closes = events.iter().filter(|e| **e == SinkEvent::Close).count();
    assert_eq!(opens, 2);
    assert_eq!(closes, 2);
    assert!(stream.first_chunk_latency().is_some());
}
