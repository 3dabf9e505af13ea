//! Records a session's audio to disk.
//!
//! PCM streams are written as a 16-bit WAV file; custom-format streams are
//! appended verbatim and the file extension is left to the caller.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use sirius_protocol::{StreamInfo, BITS_PER_SAMPLE};
use tracing::debug;

use super::i16_samples;
use crate::{Error, Result};

enum Target {
    Wav(WavWriter<BufWriter<File>>),
    Raw(BufWriter<File>),
}

pub struct Recorder {
    path: PathBuf,
    target: Target,
    carry: Option<u8>,
    bytes_written: usize,
}

impl Recorder {
    /// Open `path` for the (already normalized) stream `info`
    pub fn create(path: impl AsRef<Path>, info: &StreamInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let target = match *info {
            StreamInfo::Int16 {
                channels,
                sample_rate,
            } => {
                let spec = WavSpec {
                    channels,
                    sample_rate,
                    bits_per_sample: BITS_PER_SAMPLE,
                    sample_format: SampleFormat::Int,
                };
                Target::Wav(WavWriter::create(&path, spec)?)
            }
            StreamInfo::Custom => Target::Raw(BufWriter::new(File::create(&path)?)),
            StreamInfo::Float32 { .. } => {
                return Err(Error::Configuration(
                    "recorder expects 16-bit PCM; normalize float streams first".into(),
                ))
            }
        };
        debug!("Recording session audio to {}", path.display());
        Ok(Self {
            path,
            target,
            carry: None,
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.bytes_written += bytes.len();
        match &mut self.target {
            Target::Raw(file) => file.write_all(bytes)?,
            Target::Wav(writer) => {
                let mut rest = bytes;
                if let Some(low) = self.carry.take() {
                    writer.write_sample(i16::from_le_bytes([low, rest[0]]))?;
                    rest = &rest[1..];
                }
                for sample in i16_samples(rest) {
                    writer.write_sample(sample)?;
                }
                if rest.len() % 2 == 1 {
                    self.carry = rest.last().copied();
                }
            }
        }
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Flush and close the file, fixing up the WAV header sizes
    pub fn finalize(self) -> Result<()> {
        match self.target {
            Target::Wav(writer) => writer.finalize()?,
            Target::Raw(mut file) => file.flush()?,
        }
        debug!(
            "Finished recording {} bytes to {}",
            self.bytes_written,
            self.path.display()
        );
        Ok(())
    }
}
