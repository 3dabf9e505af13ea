//! Bridges the session's [`AudioQueue`] to a [`SinkDevice`] on a dedicated
//! thread. Pausable, mutable and interruptible within one sub-chunk write.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sirius_protocol::StreamInfo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioMessage, AudioQueue};
use crate::options::{ChunkHook, Hook};
use crate::sink::SinkDevice;
use crate::text::BufferedSeconds;
use crate::{Error, Result};

const POLL: Duration = Duration::from_millis(50);
const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Callbacks fired from the playback thread
#[derive(Clone, Default)]
pub struct PlaybackHooks {
    /// Every sub-chunk handed to the device (also while muted)
    pub on_chunk: Option<ChunkHook>,
    /// First audio of the session
    pub on_start: Option<Hook>,
}

struct Shared {
    paused: Mutex<bool>,
    resumed: Condvar,
    muted: AtomicBool,
    chunk_size: AtomicUsize,
    hooks: Mutex<PlaybackHooks>,
    info: Mutex<StreamInfo>,
    queue: Mutex<Option<AudioQueue>>,
    session_started: Mutex<Option<Instant>>,
    first_chunk_latency: Mutex<Option<Duration>>,
    audio_started: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl Shared {
    fn buffered_seconds(&self) -> f64 {
        let queued = match self.queue.lock().as_ref() {
            Some(queue) => queue.queued_bytes(),
            None => return 0.0,
        };
        self.info.lock().seconds_for(queued)
    }
}

struct Worker {
    handle: JoinHandle<Box<dyn SinkDevice>>,
    halt: CancellationToken,
    draining: Arc<AtomicBool>,
}

/// The audio player for one stream. Shared between the orchestrator and the
/// dispatcher, which restarts it when it fails over to another engine.
pub struct Playback {
    shared: Arc<Shared>,
    device: Mutex<Option<Box<dyn SinkDevice>>>,
    device_name: String,
    worker: Mutex<Option<Worker>>,
    player_thread: Mutex<Option<ThreadId>>,
}

impl Playback {
    pub fn new<D: SinkDevice + 'static>(device: D) -> Self {
        let device_name = device.name().to_string();
        let device: Box<dyn SinkDevice> = Box::new(device);
        Self {
            shared: Arc::new(Shared {
                paused: Mutex::new(false),
                resumed: Condvar::new(),
                muted: AtomicBool::new(false),
                chunk_size: AtomicUsize::new(DEFAULT_CHUNK_SIZE),
                hooks: Mutex::new(PlaybackHooks::default()),
                info: Mutex::new(StreamInfo::default()),
                queue: Mutex::new(None),
                session_started: Mutex::new(None),
                first_chunk_latency: Mutex::new(None),
                audio_started: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            device: Mutex::new(Some(device)),
            device_name,
            worker: Mutex::new(None),
            player_thread: Mutex::new(None),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Reset per-session state: hooks, sub-chunk size, latency and errors
    pub fn begin_session(&self, hooks: PlaybackHooks, chunk_size: usize) {
        *self.shared.hooks.lock() = hooks;
        self.shared
            .chunk_size
            .store(chunk_size.max(1), Ordering::Release);
        *self.shared.session_started.lock() = Some(Instant::now());
        *self.shared.first_chunk_latency.lock() = None;
        self.shared.audio_started.store(false, Ordering::Release);
        *self.shared.error.lock() = None;
        *self.shared.paused.lock() = false;
    }

    /// Open the device for `info` and start draining `queue`.
    ///
    /// Float streams are opened as 16-bit PCM since the dispatcher converts
    /// them before they reach the queue. `abort` is the session's shared
    /// abort signal; a device failure cancels it.
    pub fn start(&self, info: StreamInfo, queue: AudioQueue, abort: &CancellationToken) -> Result<()> {
        if abort.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            if !previous.handle.is_finished() {
                *worker = Some(previous);
                return Err(Error::AlreadyPlaying);
            }
            self.reclaim(previous);
        }

        let mut device = self
            .device
            .lock()
            .take()
            .ok_or_else(|| Error::Device("the sink device was lost after a playback panic".into()))?;

        let info = info.normalized();
        if let Err(e) = device.open(&info).and_then(|_| device.start()) {
            let _ = device.close();
            *self.device.lock() = Some(device);
            return Err(e);
        }
        *self.shared.info.lock() = info;
        *self.shared.queue.lock() = Some(queue.clone());

        let halt = abort.child_token();
        let draining = Arc::new(AtomicBool::new(false));
        let player = Player {
            device,
            queue,
            info,
            halt: halt.clone(),
            abort: abort.clone(),
            draining: draining.clone(),
            shared: self.shared.clone(),
            hooks: self.shared.hooks.lock().clone(),
        };
        let handle = thread::Builder::new()
            .name("sirius-playback".into())
            .spawn(move || player.run())?;
        *self.player_thread.lock() = Some(handle.thread().id());
        debug!("Playback started on {} with {:?}", self.device_name, info);

        *worker = Some(Worker {
            handle,
            halt,
            draining,
        });
        Ok(())
    }

    /// Stop the playback thread, wait for it and close the device.
    ///
    /// `immediate` drops pending audio and halts the device; otherwise the
    /// queue is played out first. Called from a playback callback, the
    /// thread is signalled but not joined and the device stays open until
    /// the next `stop` or `start`.
    pub fn stop(&self, immediate: bool) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if immediate {
            worker.halt.cancel();
        } else {
            worker.draining.store(true, Ordering::Release);
        }
        self.shared.resumed.notify_all();

        if worker.handle.thread().id() == thread::current().id() {
            *self.worker.lock() = Some(worker);
            return;
        }
        self.reclaim(worker);
    }

    fn reclaim(&self, worker: Worker) {
        match worker.handle.join() {
            Ok(mut device) => {
                if let Err(e) = device.close() {
                    warn!("Closing {} failed: {}", self.device_name, e);
                }
                *self.device.lock() = Some(device);
            }
            Err(_) => error!("Playback thread panicked; {} is lost", self.device_name),
        }
    }

    /// Whether the caller is running on the latest playback thread (inside a
    /// hook), including while another thread is joining it
    pub fn is_playback_thread(&self) -> bool {
        *self.player_thread.lock() == Some(thread::current().id())
    }

    pub fn pause(&self) {
        *self.shared.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.shared.paused.lock() = false;
        self.shared.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.lock()
    }

    /// Suppress device writes; chunk callbacks and recording continue
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Seconds of audio waiting in the queue. Always 0 for custom formats.
    pub fn buffered_seconds(&self) -> f64 {
        self.shared.buffered_seconds()
    }

    /// Buffered-seconds probe for the chunk aggregator
    pub fn buffered_seconds_probe(&self) -> BufferedSeconds {
        let shared = self.shared.clone();
        Arc::new(move || shared.buffered_seconds())
    }

    /// Time from session start to the first device write
    pub fn first_chunk_latency(&self) -> Option<Duration> {
        *self.shared.first_chunk_latency.lock()
    }

    /// The device error that ended the session, if any
    pub fn take_error(&self) -> Option<Error> {
        self.shared.error.lock().take()
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Drains the queue into the device. The device is handed back still open;
/// closing it is left to whoever joins the thread.
struct Player {
    device: Box<dyn SinkDevice>,
    queue: AudioQueue,
    info: StreamInfo,
    halt: CancellationToken,
    abort: CancellationToken,
    draining: Arc<AtomicBool>,
    shared: Arc<Shared>,
    hooks: PlaybackHooks,
}

impl Player {
    fn run(mut self) -> Box<dyn SinkDevice> {
        loop {
            if self.halt.is_cancelled() {
                break;
            }
            match self.queue.recv_timeout(POLL) {
                Some(AudioMessage::Chunk(chunk)) => {
                    if let Err(e) = self.play(&chunk) {
                        error!("Audio device {} failed: {}", self.device.name(), e);
                        *self.shared.error.lock() = Some(e);
                        self.abort.cancel();
                        break;
                    }
                }
                Some(AudioMessage::End) => break,
                None => {
                    if self.draining.load(Ordering::Acquire) && self.queue.is_empty() {
                        break;
                    }
                }
            }
        }

        if self.halt.is_cancelled() {
            if let Err(e) = self.device.stop() {
                warn!("Stopping {} failed: {}", self.device.name(), e);
            }
            let dropped = self.queue.clear();
            if dropped > 0 {
                debug!("Dropped {} bytes of pending audio", dropped);
            }
        }
        debug!("Playback thread exiting");
        self.device
    }

    fn play(&mut self, chunk: &Bytes) -> Result<()> {
        let size = self.shared.chunk_size.load(Ordering::Acquire);
        let step = match self.info.frame_bytes() {
            Some(frame) => (size - size % frame).max(frame),
            None => size,
        };

        for piece in chunk.chunks(step) {
            self.wait_while_paused();
            if self.halt.is_cancelled() {
                return Ok(());
            }
            if !self.shared.muted.load(Ordering::Acquire) {
                self.device.write(piece)?;
            }
            if let Some(on_chunk) = &self.hooks.on_chunk {
                on_chunk(piece);
            }
            if !self.shared.audio_started.swap(true, Ordering::AcqRel) {
                let latency = self
                    .shared
                    .session_started
                    .lock()
                    .map(|started| started.elapsed());
                if let Some(latency) = latency {
                    info!("First audio after {:.3}s", latency.as_secs_f64());
                }
                *self.shared.first_chunk_latency.lock() = latency;
                if let Some(on_start) = &self.hooks.on_start {
                    on_start();
                }
            }
        }
        Ok(())
    }

    fn wait_while_paused(&mut self) {
        let mut paused = self.shared.paused.lock();
        if !*paused {
            return;
        }
        self.device.pause();
        while *paused && !self.halt.is_cancelled() {
            self.shared.resumed.wait_for(&mut paused, POLL);
        }
        drop(paused);
        self.device.resume();
    }
}
