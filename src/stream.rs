//! The public entry point: feed text, play it, stop it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use sirius_protocol::TimingInfo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioQueue, Recorder};
use crate::dispatcher::{Dispatcher, Work};
use crate::engine::SharedSynthesizer;
use crate::options::{PlayOptions, StreamCallbacks};
use crate::playback::{Playback, PlaybackHooks};
use crate::sink::SinkDevice;
use crate::text::{
    CharHooks, CharIterator, CharStream, ChunkAggregator, Segmenter, SentenceFloor,
    StreamSegmenter, TextSource, Tokenizer,
};
use crate::{Error, Result};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Stop switch of the running session. Dropping it disconnects `wake`,
/// which interrupts the dispatcher's backoff.
struct SessionAbort {
    token: CancellationToken,
    _wake: Sender<()>,
}

#[derive(Default)]
struct SessionState {
    playing: bool,
    result: Option<Result<()>>,
    threads: Vec<ThreadId>,
    abort: Option<SessionAbort>,
}

/// Streams fed text to audio through a chain of synthesizers and one sink.
///
/// ```no_run
/// use std::sync::Arc;
/// use sirius::{CommandSynthesizer, NullSink, PlayOptions, TextToAudioStream};
///
/// let stream = TextToAudioStream::new(Arc::new(CommandSynthesizer::espeak_ng()), NullSink::new());
/// stream.feed("Hello there. This is sirius speaking.");
/// stream.play(PlayOptions::default()).unwrap();
/// ```
pub struct TextToAudioStream {
    engines: Mutex<Vec<SharedSynthesizer>>,
    current: Arc<AtomicUsize>,
    segmenter: Arc<dyn Segmenter>,
    segmenter_setup: Mutex<Option<(Tokenizer, String)>>,
    chars: CharIterator,
    playback: Arc<Playback>,
    state: Arc<(Mutex<SessionState>, Condvar)>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<StreamCallbacks>,
    timings_tx: Sender<TimingInfo>,
    timings_rx: Receiver<TimingInfo>,
}

impl TextToAudioStream {
    pub fn new<D: SinkDevice + 'static>(engine: SharedSynthesizer, device: D) -> Self {
        Self::build(vec![engine], device)
    }

    /// A fail-over chain: engines are tried in order when one fails
    pub fn with_engines<D: SinkDevice + 'static>(
        engines: Vec<SharedSynthesizer>,
        device: D,
    ) -> Result<Self> {
        if engines.is_empty() {
            return Err(Error::NoEngine);
        }
        Ok(Self::build(engines, device))
    }

    fn build<D: SinkDevice + 'static>(engines: Vec<SharedSynthesizer>, device: D) -> Self {
        let (timings_tx, timings_rx) = unbounded();
        Self {
            engines: Mutex::new(engines),
            current: Arc::new(AtomicUsize::new(0)),
            segmenter: Arc::new(StreamSegmenter),
            segmenter_setup: Mutex::new(None),
            chars: CharIterator::new(),
            playback: Arc::new(Playback::new(device)),
            state: Arc::new((Mutex::new(SessionState::default()), Condvar::new())),
            supervisor: Mutex::new(None),
            callbacks: Mutex::new(StreamCallbacks::default()),
            timings_tx,
            timings_rx,
        }
    }

    /// Replace the sentence segmenter
    pub fn with_segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Callbacks for every following session
    pub fn with_callbacks(self, callbacks: StreamCallbacks) -> Self {
        *self.callbacks.lock() = callbacks;
        self
    }

    pub fn set_callbacks(&self, callbacks: StreamCallbacks) {
        *self.callbacks.lock() = callbacks;
    }

    /// Queue text (or a lazy text source) for playback. Never blocks.
    pub fn feed(&self, text: impl Into<TextSource>) -> &Self {
        self.chars.add(text);
        self
    }

    /// Play everything fed so far and block until the session ends
    pub fn play(&self, options: PlayOptions) -> Result<()> {
        self.play_async(options)?;
        self.wait()
    }

    /// Start a session in the background and return immediately.
    ///
    /// Configuration and device-open errors are returned here; later
    /// failures end the session and are reported by [`wait`](Self::wait).
    pub fn play_async(&self, options: PlayOptions) -> Result<()> {
        let (lock, _) = &*self.state;
        {
            let mut state = lock.lock();
            if state.playing {
                return Err(Error::AlreadyPlaying);
            }
            state.playing = true;
            state.result = None;
            state.threads.clear();
        }
        self.join_supervisor();

        let started = self.start_session(options);
        if let Err(e) = &started {
            warn!("Could not start playing: {}", e);
            let mut state = lock.lock();
            state.playing = false;
        }
        started
    }

    fn start_session(&self, options: PlayOptions) -> Result<()> {
        options.validate()?;
        let engines = self.engines.lock().clone();
        if engines.is_empty() {
            return Err(Error::NoEngine);
        }
        self.ensure_segmenter(&options)?;

        let callbacks = self.callbacks.lock().clone();
        self.chars.rearm();
        if options.reset_generated_text {
            self.chars.clear_accumulated();
        }
        self.chars.set_hooks(CharHooks {
            on_character: callbacks.on_character.clone(),
            on_first_text_chunk: callbacks.on_text_stream_start.clone(),
            on_last_text_chunk: callbacks.on_text_stream_stop.clone(),
        });

        let index = self.current.load(Ordering::Acquire) % engines.len();
        let engine = engines[index].clone();
        let info = engine.stream_info();
        let recorder = options
            .output_wavfile
            .as_ref()
            .map(|path| Recorder::create(path, &info.normalized()))
            .transpose()?;

        let abort = CancellationToken::new();
        let (wake, aborted) = bounded::<()>(0);
        let queue = AudioQueue::new();
        self.playback.set_muted(options.muted);
        self.playback.begin_session(
            PlaybackHooks {
                on_chunk: callbacks.on_audio_chunk.clone(),
                on_start: callbacks.on_audio_stream_start.clone(),
            },
            options.playout_chunk_size,
        );
        self.playback.start(info, queue.clone(), &abort)?;
        info!(
            "Playing with engine '{}' on {} ({:?})",
            engine.name(),
            self.playback.device_name(),
            info
        );

        let dispatcher = Dispatcher::new(
            engines,
            self.current.clone(),
            self.playback.clone(),
            queue,
            abort.clone(),
            aborted,
            recorder,
            callbacks.clone(),
            self.timings_tx.clone(),
            options.log_synthesized_text,
        );
        let session = Session {
            options,
            engine,
            dispatcher,
            callbacks,
            segmenter: self.segmenter.clone(),
            chars: self.chars.clone(),
            playback: self.playback.clone(),
            abort: abort.clone(),
            state: self.state.clone(),
        };

        self.state.0.lock().abort = Some(SessionAbort {
            token: abort.clone(),
            _wake: wake,
        });
        match thread::Builder::new()
            .name("sirius-session".into())
            .spawn(move || session.run())
        {
            Ok(handle) => {
                *self.supervisor.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                abort.cancel();
                self.state.0.lock().abort = None;
                self.playback.stop(true);
                Err(e.into())
            }
        }
    }

    fn ensure_segmenter(&self, options: &PlayOptions) -> Result<()> {
        let mut setup = self.segmenter_setup.lock();
        let wanted = (options.tokenizer, options.language.clone());
        if setup.as_ref() != Some(&wanted) {
            self.segmenter.init(options.tokenizer, &options.language)?;
            debug!("Segmenter initialized for {:?}/{}", options.tokenizer, options.language);
            *setup = Some(wanted);
        }
        Ok(())
    }

    /// Block until the current session ends and return how it ended
    pub fn wait(&self) -> Result<()> {
        let (lock, cvar) = &*self.state;
        let result = {
            let mut state = lock.lock();
            while state.playing {
                cvar.wait(&mut state);
            }
            state.result.take()
        };
        self.join_supervisor();
        result.unwrap_or(Ok(()))
    }

    /// Abort the session: pending text and audio are dropped, the engines
    /// are asked to stop and every session thread is joined. A no-op when no
    /// session is running. Safe to call repeatedly and from callbacks.
    pub fn stop(&self) {
        let (lock, cvar) = &*self.state;
        let Some(abort) = lock.lock().abort.take() else {
            return;
        };
        info!("Stopping playback");
        abort.token.cancel();
        drop(abort);
        self.chars.stop();
        for engine in self.engines.lock().iter() {
            engine.stop();
        }
        self.playback.resume();

        // The session thread finishes teardown after the current callback returns
        let current = thread::current().id();
        let on_session_thread = lock.lock().threads.contains(&current);
        if on_session_thread || self.playback.is_playback_thread() {
            return;
        }
        {
            let mut state = lock.lock();
            while state.playing {
                cvar.wait(&mut state);
            }
        }
        self.join_supervisor();
        // A stop racing the end of the session lands after its reset
        self.chars.rearm();
    }

    fn join_supervisor(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Session thread panicked");
            }
        }
    }

    pub fn pause(&self) {
        debug!("Pausing playback");
        self.playback.pause();
    }

    pub fn resume(&self) {
        debug!("Resuming playback");
        self.playback.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.playback.is_paused()
    }

    /// True from `play` until the session has fully ended
    pub fn is_playing(&self) -> bool {
        self.state.0.lock().playing
    }

    /// Text read so far in this session, or the whole text once it ended
    pub fn text(&self) -> String {
        self.chars.accumulated_text()
    }

    /// Replace the engine chain with a single engine
    pub fn load_engine(&self, engine: SharedSynthesizer) -> Result<()> {
        if self.is_playing() {
            return Err(Error::AlreadyPlaying);
        }
        info!("Loaded engine '{}'", engine.name());
        *self.engines.lock() = vec![engine];
        self.current.store(0, Ordering::Release);
        Ok(())
    }

    pub fn engines(&self) -> Vec<SharedSynthesizer> {
        self.engines.lock().clone()
    }

    /// The engine in use, which changes after a fail-over
    pub fn current_engine(&self) -> Option<SharedSynthesizer> {
        let engines = self.engines.lock();
        if engines.is_empty() {
            return None;
        }
        let index = self.current.load(Ordering::Acquire) % engines.len();
        Some(engines[index].clone())
    }

    pub fn set_muted(&self, muted: bool) {
        self.playback.set_muted(muted);
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.playback.buffered_seconds()
    }

    /// Time from the last `play` to its first audible chunk
    pub fn first_chunk_latency(&self) -> Option<Duration> {
        self.playback.first_chunk_latency()
    }

    /// Word timings pushed by engines that support them
    pub fn timings(&self) -> Receiver<TimingInfo> {
        self.timings_rx.clone()
    }
}

impl Drop for TextToAudioStream {
    fn drop(&mut self) {
        self.stop();
        for engine in self.engines.lock().iter() {
            engine.shutdown();
        }
    }
}

/// One play session, run on its own supervisor thread
struct Session {
    options: PlayOptions,
    engine: SharedSynthesizer,
    dispatcher: Dispatcher,
    callbacks: StreamCallbacks,
    segmenter: Arc<dyn Segmenter>,
    chars: CharIterator,
    playback: Arc<Playback>,
    abort: CancellationToken,
    state: Arc<(Mutex<SessionState>, Condvar)>,
}

impl Session {
    fn run(self) {
        let Session {
            options,
            engine,
            dispatcher,
            callbacks,
            segmenter,
            chars,
            playback,
            abort,
            state,
        } = self;
        state.0.lock().threads.push(thread::current().id());

        let fed = if engine.can_consume_generators() {
            let mut stream = chars.clone();
            dispatcher.run_stream(&mut stream);
            Ok(())
        } else {
            feed_dispatcher(&options, dispatcher, &segmenter, &chars, &playback, &abort, &state)
        };

        if !abort.is_cancelled() {
            while playback.is_running() && !abort.is_cancelled() {
                thread::sleep(DRAIN_POLL);
            }
        }

        let mut result = fed;
        for failure in chars.take_errors() {
            warn!("{}", failure);
            if result.is_ok() {
                result = Err(failure);
            }
        }
        if let Some(device_error) = playback.take_error() {
            result = Err(device_error);
        }
        if let Some(on_stop) = &callbacks.on_audio_stream_stop {
            on_stop();
        }
        playback.stop(abort.is_cancelled());
        chars.reset();
        info!("Playback finished");

        let (lock, cvar) = &*state;
        let mut state = lock.lock();
        state.playing = false;
        state.result = Some(result);
        state.abort = None;
        cvar.notify_all();
    }
}

/// Run the text pipeline on this thread and the dispatcher on a worker
fn feed_dispatcher(
    options: &PlayOptions,
    dispatcher: Dispatcher,
    segmenter: &Arc<dyn Segmenter>,
    chars: &CharIterator,
    playback: &Arc<Playback>,
    abort: &CancellationToken,
    state: &Arc<(Mutex<SessionState>, Condvar)>,
) -> Result<()> {
    let (work_tx, work_rx) = bounded(1);
    let worker = match thread::Builder::new()
        .name("sirius-dispatch".into())
        .spawn(move || dispatcher.run(work_rx))
    {
        Ok(worker) => worker,
        Err(e) => {
            abort.cancel();
            return Err(e.into());
        }
    };
    state.0.lock().threads.push(worker.thread().id());

    let halted = abort.clone();
    let stream: CharStream = Box::new(
        chars
            .clone()
            .take_while(move |_| !halted.is_cancelled()),
    );
    let sentences = segmenter.generate_sentences(stream, &options.segmenter_options());
    let floored = SentenceFloor::new(
        sentences,
        options.minimum_first_fragment_length,
        options.minimum_sentence_length,
    );
    let utterances = ChunkAggregator::new(
        floored,
        options.buffer_threshold_seconds,
        playback.buffered_seconds_probe(),
    );

    for utterance in utterances {
        if abort.is_cancelled() {
            break;
        }
        debug!("Queueing utterance {:?}", utterance);
        if work_tx.send(Work::Utterance(utterance)).is_err() {
            break;
        }
    }
    let _ = work_tx.send(Work::End);
    drop(work_tx);

    if worker.join().is_err() {
        abort.cancel();
        return Err(Error::synthesis("dispatcher", "worker thread panicked"));
    }
    Ok(())
}
