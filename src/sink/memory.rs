use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sirius_protocol::StreamInfo;

use super::SinkDevice;
use crate::{Error, Result};

/// Device lifecycle calls observed by a [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Open(StreamInfo),
    Write(usize),
    Pause,
    Resume,
    Stop,
    Close,
}

#[derive(Debug, Default)]
struct Captured {
    info: Option<StreamInfo>,
    bytes: Vec<u8>,
    events: Vec<SinkEvent>,
    writes: usize,
}

/// Captures everything written to it. Clones share the capture, so a test can
/// hand one clone to the player and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    captured: Arc<Mutex<Captured>>,
    paced: bool,
    fail_on_write: Option<usize>,
    fail_on_open: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each write for the duration of the audio it carries
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Fail the `n`th write (1-based) with a device error
    pub fn failing_on_write(mut self, n: usize) -> Self {
        self.fail_on_write = Some(n);
        self
    }

    pub fn failing_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.captured.lock().bytes.clone()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.captured.lock().events.clone()
    }

    pub fn write_count(&self) -> usize {
        self.captured.lock().writes
    }

    /// Stream descriptions the device was opened with, in order
    pub fn opened_with(&self) -> Vec<StreamInfo> {
        self.captured
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Open(info) => Some(*info),
                _ => None,
            })
            .collect()
    }
}

impl SinkDevice for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        if self.fail_on_open {
            return Err(Error::Device("memory sink configured to fail on open".into()));
        }
        let mut captured = self.captured.lock();
        captured.info = Some(*info);
        captured.events.push(SinkEvent::Open(*info));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.captured.lock().events.push(SinkEvent::Stop);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut captured = self.captured.lock();
        captured.info = None;
        captured.events.push(SinkEvent::Close);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let info = {
            let mut captured = self.captured.lock();
            let info = captured
                .info
                .ok_or_else(|| Error::Device("write to a closed memory sink".into()))?;
            captured.writes += 1;
            if self.fail_on_write == Some(captured.writes) {
                return Err(Error::Device(format!(
                    "memory sink configured to fail on write {}",
                    captured.writes
                )));
            }
            captured.bytes.extend_from_slice(bytes);
            captured.events.push(SinkEvent::Write(bytes.len()));
            info
        };
        if self.paced {
            thread::sleep(Duration::from_secs_f64(info.seconds_for(bytes.len())));
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.captured.lock().info.is_some()
    }

    fn pause(&mut self) {
        self.captured.lock().events.push(SinkEvent::Pause);
    }

    fn resume(&mut self) {
        self.captured.lock().events.push(SinkEvent::Resume);
    }
}
