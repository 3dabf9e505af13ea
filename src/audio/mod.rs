//! Audio plumbing between synthesizers and playback: sample conversion,
//! the session audio queue and file recording.

pub mod queue;
pub mod recorder;

pub use queue::{AudioMessage, AudioQueue};
pub use recorder::Recorder;

use bytes::Bytes;
use sirius_protocol::StreamInfo;

/// Convert one float sample to 16-bit PCM, saturating outside `[-1.0, 1.0]`
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Convert little-endian f32 bytes to little-endian i16 bytes.
/// A trailing partial sample is ignored.
pub fn f32_bytes_to_i16(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for raw in bytes.chunks_exact(4) {
        let sample = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        out.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    out
}

/// Decode little-endian i16 bytes into samples. A trailing odd byte is ignored.
pub fn i16_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Brings engine output to the format sinks and recorders expect.
///
/// Float PCM becomes 16-bit PCM and every PCM chunk is cut at a frame
/// boundary; the leftover bytes are carried into the next chunk. Custom
/// format bytes pass through untouched.
#[derive(Debug)]
pub struct PcmNormalizer {
    info: StreamInfo,
    remainder: Vec<u8>,
}

impl PcmNormalizer {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info,
            remainder: Vec::new(),
        }
    }

    /// The stream description after normalization
    pub fn output_info(&self) -> StreamInfo {
        self.info.normalized()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Bytes {
        let Some(frame) = self.info.frame_bytes().filter(|&f| f > 0) else {
            return Bytes::copy_from_slice(chunk);
        };

        let mut data = std::mem::take(&mut self.remainder);
        data.extend_from_slice(chunk);
        let aligned = data.len() - data.len() % frame;
        self.remainder = data.split_off(aligned);

        match self.info {
            StreamInfo::Float32 { .. } => Bytes::from(f32_bytes_to_i16(&data)),
            _ => Bytes::from(data),
        }
    }

    /// Bytes held back waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }
}
