//! Runs an external TTS program per utterance and streams its stdout.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use sirius_protocol::{StreamInfo, Voice, VoiceParameters};
use tracing::{debug, warn};

use super::{AudioOutput, Synthesizer};
use crate::{Error, Result};

const READ_CHUNK: usize = 4096;

/// Drops the RIFF/WAVE header from a byte stream and passes the payload on.
///
/// Engines that write WAV to stdout often put placeholder sizes in the header,
/// so only the chunk layout is trusted: everything after the `data` chunk
/// header is audio.
#[derive(Debug, Default)]
pub struct WavHeaderStripper {
    header: Vec<u8>,
    done: bool,
}

impl WavHeaderStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns the audio payload they contain, if any
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        if self.done {
            return Ok(bytes.to_vec());
        }
        self.header.extend_from_slice(bytes);
        if self.header.len() < 12 {
            return Ok(Vec::new());
        }
        if &self.header[0..4] != b"RIFF" || &self.header[8..12] != b"WAVE" {
            return Err(Error::synthesis("wav", "output is not a RIFF/WAVE stream"));
        }

        let mut pos = 12;
        while pos + 8 <= self.header.len() {
            let id = &self.header[pos..pos + 4];
            let size = u32::from_le_bytes([
                self.header[pos + 4],
                self.header[pos + 5],
                self.header[pos + 6],
                self.header[pos + 7],
            ]) as usize;
            if id == b"data" {
                self.done = true;
                let payload = self.header.split_off(pos + 8);
                self.header.clear();
                return Ok(payload);
            }
            pos += 8 + size + size % 2;
        }
        Ok(Vec::new())
    }
}

/// Synthesizes by running a command such as `espeak-ng --stdout` or
/// `piper --output-raw` once per utterance.
///
/// Arguments may contain placeholders: `{text}` (the utterance), `{voice}`
/// and `{name}` for any voice parameter. Unless `{text}` appears in the
/// arguments, the utterance is written to the program's stdin.
pub struct CommandSynthesizer {
    name: String,
    program: String,
    args: Vec<String>,
    info: StreamInfo,
    wav_output: bool,
    voices: Vec<Voice>,
    voice: Mutex<Option<String>>,
    params: Mutex<VoiceParameters>,
    child: Mutex<Option<Child>>,
    stopped: AtomicBool,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, info: StreamInfo) -> Self {
        let program = program.into();
        Self {
            name: program.clone(),
            program,
            args: Vec::new(),
            info,
            wav_output: false,
            voices: Vec::new(),
            voice: Mutex::new(None),
            params: Mutex::new(VoiceParameters::new()),
            child: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// `espeak-ng` writing 22.05 kHz mono WAV to stdout
    pub fn espeak_ng() -> Self {
        Self::new("espeak-ng", StreamInfo::int16(1, 22050))
            .args(["--stdout", "-v", "{voice}", "-s", "{rate}"])
            .wav_output(true)
            .voice("en")
            .param("rate", 175)
    }

    /// `piper` with the given ONNX voice model, raw 16-bit output
    pub fn piper(model: impl Into<String>, sample_rate: u32) -> Self {
        Self::new("piper", StreamInfo::int16(1, sample_rate))
            .args(["--model", "{voice}", "--output-raw"])
            .voice(model)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program writes a WAV file to stdout; strip its header
    pub fn wav_output(mut self, wav: bool) -> Self {
        self.wav_output = wav;
        self
    }

    pub fn voice(self, voice: impl Into<String>) -> Self {
        *self.voice.lock() = Some(voice.into());
        self
    }

    pub fn param(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.lock().insert(key.into(), value.into());
        self
    }

    pub fn with_voices(mut self, voices: Vec<Voice>) -> Self {
        self.voices = voices;
        self
    }

    fn resolve_args(&self, text: &str) -> Result<(Vec<String>, bool)> {
        let voice = self.voice.lock().clone();
        let params = self.params.lock().clone();
        let mut text_in_args = false;

        let mut resolved = Vec::with_capacity(self.args.len());
        for template in &self.args {
            let mut arg = String::with_capacity(template.len());
            let mut rest = template.as_str();
            while let Some(open) = rest.find('{') {
                let Some(close) = rest[open..].find('}') else {
                    break;
                };
                arg.push_str(&rest[..open]);
                let key = &rest[open + 1..open + close];
                match key {
                    "text" => {
                        text_in_args = true;
                        arg.push_str(text);
                    }
                    "voice" => arg.push_str(voice.as_deref().ok_or_else(|| {
                        Error::Configuration(format!("{} needs a voice", self.name))
                    })?),
                    _ => match params.get(key) {
                        Some(Value::String(s)) => arg.push_str(s),
                        Some(other) => arg.push_str(&other.to_string()),
                        None => {
                            return Err(Error::Configuration(format!(
                                "{}: no value for placeholder {{{}}}",
                                self.name, key
                            )))
                        }
                    },
                }
                rest = &rest[open + close + 1..];
            }
            arg.push_str(rest);
            resolved.push(arg);
        }
        Ok((resolved, text_in_args))
    }
}

impl Synthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream_info(&self) -> StreamInfo {
        self.info
    }

    fn synthesize(&self, text: &str, out: &AudioOutput) -> Result<()> {
        self.stopped.store(false, Ordering::Release);
        let (args, text_in_args) = self.resolve_args(text)?;
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if text_in_args {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::synthesis(&self.name, format!("failed to start: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
            }
        }
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::synthesis(&self.name, "stdout not captured"))?;
        *self.child.lock() = Some(child);

        let mut stripper = self.wav_output.then(WavHeaderStripper::new);
        let mut buf = [0u8; READ_CHUNK];
        let read_result: Result<()> = loop {
            let n = match stdout.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e.into()),
            };
            let payload = match stripper.as_mut() {
                Some(stripper) => match stripper.feed(&buf[..n]) {
                    Ok(payload) => payload,
                    Err(e) => break Err(e),
                },
                None => buf[..n].to_vec(),
            };
            if !out.push(&payload) {
                self.stop();
                break Err(Error::Cancelled);
            }
        };

        let status = match self.child.lock().take() {
            Some(mut child) => Some(child.wait()?),
            None => None,
        };
        read_result?;

        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        match status {
            Some(status) if !status.success() => {
                Err(Error::synthesis(&self.name, format!("exited with {status}")))
            }
            _ => Ok(()),
        }
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn set_voice(&self, selector: &str) -> Result<()> {
        if !self.voices.is_empty() && !self.voices.iter().any(|v| v.id == selector) {
            return Err(Error::Configuration(format!(
                "{} has no voice '{}'",
                self.name, selector
            )));
        }
        *self.voice.lock() = Some(selector.to_string());
        Ok(())
    }

    fn set_voice_parameters(&self, params: &VoiceParameters) -> Result<()> {
        let mut current = self.params.lock();
        for (key, value) in params {
            current.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(child) = self.child.lock().as_mut() {
            if let Err(e) = child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("Failed to stop {}: {}", self.program, e);
                }
            }
        }
    }

    fn shutdown(&self) {
        self.stop();
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.wait();
        }
    }
}
