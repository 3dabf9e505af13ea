use std::thread;
use std::time::Duration;

use sirius_protocol::StreamInfo;

use super::SinkDevice;
use crate::{Error, Result};

/// Discards audio. When paced, each write blocks for the audio's duration,
/// which makes it stand in for a real device in headless environments.
#[derive(Debug, Default)]
pub struct NullSink {
    info: Option<StreamInfo>,
    paced: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paced() -> Self {
        Self {
            info: None,
            paced: true,
        }
    }
}

impl SinkDevice for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        self.info = Some(*info);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.info = None;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let info = self
            .info
            .ok_or_else(|| Error::Device("write to a closed null sink".into()))?;
        if self.paced {
            thread::sleep(Duration::from_secs_f64(info.seconds_for(bytes.len())));
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.info.is_some()
    }
}
