//! The synthesis worker: takes utterances in order, runs them through the
//! active engine and fails over along the engine chain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use sirius_protocol::{StreamInfo, TimingInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioQueue, PcmNormalizer, Recorder};
use crate::engine::{AudioOutput, SharedSynthesizer};
use crate::options::StreamCallbacks;
use crate::playback::Playback;
use crate::{Error, Result};

const POLL: Duration = Duration::from_millis(50);
const SINGLE_ENGINE_BACKOFF: Duration = Duration::from_millis(200);

/// One slot of the work queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Work {
    Utterance(String),
    End,
}

/// Converts engine output, records it and enqueues it for playback
struct Router {
    normalizer: PcmNormalizer,
    queue: AudioQueue,
    recorder: Option<Recorder>,
    recording: bool,
}

impl Router {
    fn route(&mut self, chunk: &[u8]) {
        let pcm = self.normalizer.process(chunk);
        if pcm.is_empty() {
            return;
        }
        if self.recording {
            if let Some(recorder) = self.recorder.as_mut() {
                if let Err(e) = recorder.write(&pcm) {
                    error!("Writing {} failed, recording stopped: {}", recorder.path().display(), e);
                    self.recording = false;
                }
            }
        }
        self.queue.push(pcm);
    }

    fn switch_to(&mut self, info: StreamInfo) {
        let dropped = self.normalizer.pending();
        if dropped > 0 {
            debug!("Dropping {} bytes of a partial frame on engine switch", dropped);
        }
        let recorded_as = self.normalizer.output_info();
        self.normalizer = PcmNormalizer::new(info);
        if self.recorder.is_some() && self.normalizer.output_info() != recorded_as {
            warn!(
                "Engine format {:?} differs from the recording format {:?}; not recording its audio",
                self.normalizer.output_info(),
                recorded_as
            );
            self.recording = false;
        }
    }

    fn finalize(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            let path = recorder.path().to_path_buf();
            match recorder.finalize() {
                Ok(()) => info!("Saved session audio to {}", path.display()),
                Err(e) => error!("Finalizing {} failed: {}", path.display(), e),
            }
        }
    }
}

/// Everything the worker needs for one play session
pub(crate) struct Dispatcher {
    engines: Vec<SharedSynthesizer>,
    current: Arc<AtomicUsize>,
    playback: Arc<Playback>,
    queue: AudioQueue,
    abort: CancellationToken,
    /// Disconnects when the session is stopped
    aborted: Receiver<()>,
    router: Arc<Mutex<Router>>,
    callbacks: StreamCallbacks,
    timings: Sender<TimingInfo>,
    log_synthesized_text: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engines: Vec<SharedSynthesizer>,
        current: Arc<AtomicUsize>,
        playback: Arc<Playback>,
        queue: AudioQueue,
        abort: CancellationToken,
        aborted: Receiver<()>,
        recorder: Option<Recorder>,
        callbacks: StreamCallbacks,
        timings: Sender<TimingInfo>,
        log_synthesized_text: bool,
    ) -> Self {
        let index = current.load(Ordering::Acquire) % engines.len().max(1);
        let info = engines
            .get(index)
            .map(|engine| engine.stream_info())
            .unwrap_or_default();
        let router = Router {
            normalizer: PcmNormalizer::new(info),
            queue: queue.clone(),
            recording: recorder.is_some(),
            recorder,
        };
        Self {
            engines,
            current,
            playback,
            queue,
            abort,
            aborted,
            router: Arc::new(Mutex::new(router)),
            callbacks,
            timings,
            log_synthesized_text,
        }
    }

    /// Drain `work` until the end marker, a closed channel or abort
    pub(crate) fn run(self, work: Receiver<Work>) {
        loop {
            if self.abort.is_cancelled() {
                debug!("Dispatcher aborted");
                break;
            }
            match work.recv_timeout(POLL) {
                Ok(Work::Utterance(text)) => self.dispatch(&text),
                Ok(Work::End) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
        self.finish();
    }

    /// Hand the character stream itself to an engine that consumes text
    /// streams. A consumed stream cannot be replayed, so there is no fail-over.
    pub(crate) fn run_stream(self, chars: &mut (dyn Iterator<Item = char> + Send)) {
        let engine = self.active_engine();
        let out = self.output();
        info!("Streaming text directly into engine '{}'", engine.name());
        match engine.synthesize_stream(chars, &out) {
            Ok(()) => debug!("Engine '{}' consumed the stream, {} bytes", engine.name(), out.bytes_pushed()),
            Err(Error::Cancelled) => debug!("Streaming synthesis cancelled"),
            Err(e) => warn!("Engine '{}' failed on the text stream: {}", engine.name(), e),
        }
        self.finish();
    }

    fn finish(&self) {
        self.queue.finish();
        self.router.lock().finalize();
    }

    fn active_engine(&self) -> SharedSynthesizer {
        let index = self.current.load(Ordering::Acquire) % self.engines.len();
        self.engines[index].clone()
    }

    fn output(&self) -> AudioOutput {
        let router = self.router.clone();
        let timings = self.timings.clone();
        let on_word = self.callbacks.on_word.clone();
        AudioOutput::new(move |chunk| router.lock().route(chunk))
            .with_cancel(self.abort.clone())
            .with_timing(move |timing| {
                if let Some(on_word) = &on_word {
                    on_word(&timing);
                }
                let _ = timings.send(timing);
            })
    }

    fn dispatch(&self, text: &str) {
        if let Some(before) = &self.callbacks.before_sentence_synthesized {
            before(text);
        }
        if self.log_synthesized_text {
            info!("Synthesizing: {}", text);
        } else {
            debug!("Synthesizing: {:?}", text);
        }

        let attempts = self.engines.len();
        for _ in 0..attempts {
            if self.abort.is_cancelled() {
                return;
            }
            let engine = self.active_engine();
            let started = Instant::now();
            match self.synthesize_once(&engine, text) {
                Ok(()) => {
                    debug!(
                        "Engine '{}' synthesized {} chars in {:.3}s",
                        engine.name(),
                        text.chars().count(),
                        started.elapsed().as_secs_f64()
                    );
                    if let Some(done) = &self.callbacks.on_sentence_synthesized {
                        done(text);
                    }
                    return;
                }
                Err(_) if self.abort.is_cancelled() => return,
                Err(e) if !e.is_transient() => {
                    warn!("Engine '{}' gave up on {:?}: {}; dropping it", engine.name(), text, e);
                    return;
                }
                Err(e) => {
                    warn!("Engine '{}' failed on {:?}: {}", engine.name(), text, e);
                    if attempts == 1 {
                        self.sleep_unless_aborted(SINGLE_ENGINE_BACKOFF);
                        warn!("Dropping utterance {:?}", text);
                        return;
                    }
                    if let Err(e) = self.fail_over() {
                        if !matches!(e, Error::Cancelled) {
                            error!("Restarting playback failed: {}", e);
                            self.abort.cancel();
                        }
                        return;
                    }
                }
            }
        }
        warn!(
            "All {} engines failed on {:?}; dropping it",
            attempts, text
        );
    }

    fn synthesize_once(&self, engine: &SharedSynthesizer, text: &str) -> Result<()> {
        let out = self.output();
        engine.synthesize(text, &out)?;
        if out.bytes_pushed() == 0 && text.chars().any(char::is_alphanumeric) {
            return Err(Error::synthesis(engine.name(), "no audio produced"));
        }
        Ok(())
    }

    /// Advance to the next engine and restart playback with its format
    fn fail_over(&self) -> Result<()> {
        let next = (self.current.load(Ordering::Acquire) + 1) % self.engines.len();
        self.current.store(next, Ordering::Release);
        let engine = &self.engines[next];
        let info = engine.stream_info();
        info!("Failing over to engine '{}'", engine.name());

        self.playback.stop(false);
        self.router.lock().switch_to(info);
        self.playback.start(info, self.queue.clone(), &self.abort)
    }

    fn sleep_unless_aborted(&self, duration: Duration) {
        if self.abort.is_cancelled() {
            return;
        }
        select! {
            recv(self.aborted) -> _ => debug!("Backoff interrupted"),
            recv(after(duration)) -> _ => {}
        }
    }
}
