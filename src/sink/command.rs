use std::fmt;
use std::io::{ErrorKind, Write};
use std::process::{Child, ChildStdin, Command, Stdio};

use sirius_protocol::StreamInfo;
use tracing::{debug, warn};

use super::SinkDevice;
use crate::{Error, Result};

type ArgBuilder = Box<dyn Fn(&StreamInfo) -> Result<Vec<String>> + Send>;

/// Pipes audio into an external player process.
///
/// This is how opaque containers (MPEG and friends) get decoded: the child
/// (e.g. `mpv`) reads the stream from stdin. The child is killed on `stop`,
/// given EOF on `close` and always reaped.
pub struct CommandSink {
    program: String,
    args: ArgBuilder,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl fmt::Debug for CommandSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSink")
            .field("program", &self.program)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl CommandSink {
    /// Run `program` with arguments derived from the stream description
    pub fn new<F>(program: impl Into<String>, args: F) -> Self
    where
        F: Fn(&StreamInfo) -> Result<Vec<String>> + Send + 'static,
    {
        Self {
            program: program.into(),
            args: Box::new(args),
            child: None,
            stdin: None,
        }
    }

    /// ALSA `aplay`, raw 16-bit PCM only
    pub fn aplay() -> Self {
        Self::new("aplay", |info| match info {
            StreamInfo::Int16 {
                channels,
                sample_rate,
            } => Ok(vec![
                "-q".into(),
                "-t".into(),
                "raw".into(),
                "-f".into(),
                "S16_LE".into(),
                "-r".into(),
                sample_rate.to_string(),
                "-c".into(),
                channels.to_string(),
            ]),
            other => Err(Error::Configuration(format!(
                "aplay cannot play {:?} streams; use CommandSink::mpv",
                other.format()
            ))),
        })
    }

    /// `mpv` reading stdin; decodes containers itself and raw PCM via its rawaudio demuxer
    pub fn mpv() -> Self {
        Self::new("mpv", |info| {
            let mut args: Vec<String> = vec![
                "--no-terminal".into(),
                "--no-video".into(),
                "--cache=no".into(),
            ];
            if let StreamInfo::Int16 {
                channels,
                sample_rate,
            } = info
            {
                args.push("--demuxer=rawaudio".into());
                args.push("--demuxer-rawaudio-format=s16le".into());
                args.push(format!("--demuxer-rawaudio-rate={sample_rate}"));
                args.push(format!("--demuxer-rawaudio-channels={channels}"));
            }
            args.push("-".into());
            Ok(args)
        })
    }

    fn reap(&mut self, kill: bool) -> Result<()> {
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if kill {
            if let Err(e) = child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("Failed to kill {}: {}", self.program, e);
                }
            }
        }
        let status = child.wait()?;
        debug!("{} exited with {}", self.program, status);
        Ok(())
    }
}

impl SinkDevice for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    fn open(&mut self, info: &StreamInfo) -> Result<()> {
        self.reap(true)?;
        let args = (self.args)(info)?;
        debug!("Spawning player: {} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Device(format!("failed to start {}: {}", self.program, e)))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.reap(true)
    }

    fn close(&mut self) -> Result<()> {
        self.reap(false)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Device(format!("{} is not running", self.program)))?;
        stdin
            .write_all(bytes)
            .map_err(|e| Error::Device(format!("writing to {} failed: {}", self.program, e)))
    }

    fn is_active(&self) -> bool {
        self.stdin.is_some()
    }
}

impl Drop for CommandSink {
    fn drop(&mut self) {
        if let Err(e) = self.reap(true) {
            warn!("Failed to reap {}: {}", self.program, e);
        }
    }
}
