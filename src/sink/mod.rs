//! Output devices the player writes to.

mod command;
mod memory;
mod null;
#[cfg(feature = "rodio")]
mod rodio;

pub use command::CommandSink;
pub use memory::{MemorySink, SinkEvent};
pub use null::NullSink;
#[cfg(feature = "rodio")]
pub use self::rodio::RodioSink;

use sirius_protocol::StreamInfo;

use crate::Result;

/// A device that accepts the session's audio bytes.
///
/// Playback opens the device with the active engine's (normalized) stream
/// description, writes synchronously from its own thread and closes it when
/// the session ends. For [`StreamInfo::Custom`] the bytes are opaque and the
/// device is responsible for decoding them.
pub trait SinkDevice: Send {
    fn name(&self) -> &str;

    fn open(&mut self, info: &StreamInfo) -> Result<()>;

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard anything the device still holds and halt output immediately
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Let the device finish what it holds, then release it
    fn close(&mut self) -> Result<()>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Called when playback is paused; devices with their own buffer may hold output
    fn pause(&mut self) {}

    fn resume(&mut self) {}
}

impl<S: SinkDevice + ?Sized> SinkDevice for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        (**self).open(info)
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn resume(&mut self) {
        (**self).resume()
    }
}
