//! Local playback through the default output device using rodio.
//!
//! rodio's `OutputStream` is not `Send`, so it lives on a small keeper
//! thread for as long as the device is open; the player only talks to the
//! `Sink`, which is.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use sirius_protocol::StreamInfo;
use tracing::debug;

use super::SinkDevice;
use crate::audio::i16_samples;
use crate::{Error, Result};

/// Buffers queued inside rodio before `write` starts blocking
const MAX_QUEUED_BUFFERS: usize = 4;
const QUEUE_POLL: Duration = Duration::from_millis(5);

struct Output {
    sink: Sink,
    channels: u16,
    sample_rate: u32,
    keepalive: Option<Sender<()>>,
    keeper: Option<JoinHandle<()>>,
}

impl Output {
    fn release(&mut self) {
        self.keepalive = None;
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
    }
}

/// Plays 16-bit PCM on the default output device.
///
/// Custom-format streams are rejected at open; pipe them through
/// [`CommandSink::mpv`](super::CommandSink::mpv) instead.
#[derive(Default)]
pub struct RodioSink {
    output: Option<Output>,
}

impl RodioSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SinkDevice for RodioSink {
    fn name(&self) -> &str {
        "rodio"
    }

    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        let (channels, sample_rate) = match *info {
            StreamInfo::Int16 {
                channels,
                sample_rate,
            } => (channels, sample_rate),
            other => {
                return Err(Error::Configuration(format!(
                    "rodio sink plays 16-bit PCM only, got {:?}",
                    other.format()
                )))
            }
        };
        self.close()?;

        let (handle_tx, handle_rx) = bounded(1);
        let (keepalive, keepalive_rx) = bounded::<()>(0);
        let keeper = thread::Builder::new()
            .name("sirius-rodio".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    if handle_tx.send(Ok(handle)).is_ok() {
                        // Hold the stream until the sender side is dropped
                        let _ = keepalive_rx.recv();
                    }
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })?;

        let handle = handle_rx
            .recv_timeout(Duration::from_secs(1))
            .map_err(|_| Error::Device("timed out opening the default output device".into()))?
            .map_err(Error::Device)?;
        let sink = Sink::try_new(&handle).map_err(|e| Error::Device(e.to_string()))?;
        debug!("Opened default output device at {} Hz, {} channel(s)", sample_rate, channels);

        self.output = Some(Output {
            sink,
            channels,
            sample_rate,
            keepalive: Some(keepalive),
            keeper: Some(keeper),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut output) = self.output.take() {
            output.sink.stop();
            output.release();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut output) = self.output.take() {
            output.sink.sleep_until_end();
            output.release();
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::Device("rodio sink is not open".into()))?;
        while output.sink.len() >= MAX_QUEUED_BUFFERS {
            thread::sleep(QUEUE_POLL);
        }
        let samples: Vec<i16> = i16_samples(bytes).collect();
        output
            .sink
            .append(SamplesBuffer::new(output.channels, output.sample_rate, samples));
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.output.is_some()
    }

    fn pause(&mut self) {
        if let Some(output) = &self.output {
            output.sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(output) = &self.output {
            output.sink.play();
        }
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
