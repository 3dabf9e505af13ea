//! Sirius command-line player
//!
//! Streams text through a local TTS program and plays it as it is synthesized.
//!
//! Usage:
//!   # Interactive mode (type text, press Enter to speak it)
//!   cargo run --release -p sirius-client
//!
//!   # Single text mode
//!   cargo run --release -p sirius-client -- --text "Hello world"
//!
//!   # Stream stdin (e.g. an LLM's output) as one continuous session
//!   llm-cli "tell me a story" | cargo run --release -p sirius-client -- --stream
//!
//!   # Record while playing, with piper as the primary engine and espeak-ng as fallback
//!   cargo run --release -p sirius-client -- --engine piper:en_US-amy.onnx --engine espeak-ng \
//!       --text "Hello world" --output hello.wav

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing::{error, info};

use sirius::{
    CommandSink, CommandSynthesizer, NullSink, PlayOptions, SharedSynthesizer, SinkDevice,
    StreamCallbacks, TextSource, TextToAudioStream,
};
use sirius_protocol::StreamInfo;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sirius realtime TTS player")]
struct Args {
    /// Text to speak (if not provided, reads stdin)
    #[arg(short, long)]
    text: Option<String>,

    /// Engine: `espeak-ng`, `piper:<model.onnx>` or a command line producing
    /// raw 16-bit mono PCM on stdout. Repeat to build a fail-over chain.
    #[arg(short, long = "engine", env = "SIRIUS_ENGINE_CMD", default_value = "espeak-ng")]
    engines: Vec<String>,

    /// Sample rate of piper and raw command engines
    #[arg(long, default_value_t = 22050)]
    sample_rate: u32,

    /// Output device: aplay, mpv, null or rodio
    #[arg(long, env = "SIRIUS_SINK", default_value = "aplay")]
    sink: String,

    /// Also record the session to this WAV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with play options
    #[arg(long, env = "SIRIUS_CONFIG")]
    config: Option<PathBuf>,

    /// Fuse sentences while this many seconds of audio are buffered
    #[arg(long)]
    buffer_threshold: Option<f64>,

    /// Voice for the first engine
    #[arg(short, long)]
    voice: Option<String>,

    /// Synthesize without playing (useful with --output)
    #[arg(long)]
    muted: bool,

    /// Treat stdin as one continuous text stream instead of line-by-line prompts
    #[arg(long)]
    stream: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sirius=info".parse()?)
                .add_directive("sirius_client=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut options = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PlayOptions::from_json_str(&json)?
        }
        None => PlayOptions::default(),
    };
    if let Some(seconds) = args.buffer_threshold {
        options.buffer_threshold_seconds = seconds;
    }
    if args.muted {
        options.muted = true;
    }
    options.validate()?;

    let engines = args
        .engines
        .iter()
        .map(|spec| build_engine(spec, args.sample_rate))
        .collect::<Result<Vec<_>>>()?;
    if let (Some(voice), Some(first)) = (&args.voice, engines.first()) {
        first.set_voice(voice)?;
    }
    info!(
        "Engines: {}",
        engines
            .iter()
            .map(|e| e.name().to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let stream = TextToAudioStream::with_engines(engines, build_sink(&args.sink)?)?
        .with_callbacks(StreamCallbacks::new().with_on_sentence_synthesized(|text| {
            info!("Spoken: {}", text)
        }));

    let recorded = match &args.output {
        Some(path) => options.clone().with_output_wavfile(path),
        None => options.clone(),
    };

    if let Some(text) = args.text {
        // Single text mode
        stream.feed(text);
        play(&stream, recorded)?;
    } else if args.stream {
        // One session over all of stdin, spoken while it is still being read
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let failed = line.is_err();
                if tx.send(line.map(|l| format!("{l}\n"))).is_err() || failed {
                    break;
                }
            }
        });
        stream.feed(TextSource::from_fallible(rx));
        play(&stream, recorded)?;
    } else {
        // Interactive mode
        println!("Sirius - Interactive Mode");
        println!("=========================");
        println!("Type text and press Enter to hear it.");
        println!("Commands:");
        println!("  :q or :quit - Exit");
        println!("  :v <voice>  - Change voice");
        println!();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("> ");
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line == ":q" || line == ":quit" {
                println!("Goodbye!");
                break;
            }

            if let Some(voice) = line.strip_prefix(":v ") {
                match stream.current_engine().map(|e| e.set_voice(voice.trim())) {
                    Some(Ok(())) => println!("Voice changed to: {}", voice.trim()),
                    Some(Err(e)) => println!("{}", e),
                    None => println!("No engine loaded"),
                }
                continue;
            }

            stream.feed(line.to_string());
            if let Err(e) = play(&stream, options.clone()) {
                error!("Error: {}", e);
            }
        }
    }

    Ok(())
}

fn play(stream: &TextToAudioStream, options: PlayOptions) -> Result<()> {
    let recording = options.output_wavfile.clone();
    stream.play(options)?;
    if let Some(latency) = stream.first_chunk_latency() {
        info!("First audio after {:.0} ms", latency.as_secs_f64() * 1000.0);
    }
    if let Some(path) = recording {
        println!("Audio saved to: {}", path.display());
    }
    Ok(())
}

fn build_engine(spec: &str, sample_rate: u32) -> Result<SharedSynthesizer> {
    let engine: SharedSynthesizer = if spec == "espeak-ng" || spec == "espeak" {
        Arc::new(CommandSynthesizer::espeak_ng())
    } else if let Some(model) = spec.strip_prefix("piper:") {
        Arc::new(CommandSynthesizer::piper(model, sample_rate))
    } else {
        let mut parts = spec.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("empty engine command");
        };
        Arc::new(
            CommandSynthesizer::new(program, StreamInfo::int16(1, sample_rate))
                .args(parts.map(str::to_string)),
        )
    };
    Ok(engine)
}

fn build_sink(name: &str) -> Result<Box<dyn SinkDevice>> {
    Ok(match name {
        "aplay" => Box::new(CommandSink::aplay()),
        "mpv" => Box::new(CommandSink::mpv()),
        "null" => Box::new(NullSink::paced()),
        #[cfg(feature = "rodio")]
        "rodio" => Box::new(sirius::RodioSink::new()),
        other => bail!("unknown sink '{}'", other),
    })
}
