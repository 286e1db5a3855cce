use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use command_dispatch::HttpDataApi;
use intent_parser::{IntentParser, PatternRegistry};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_local::{
    AsrStream, AudioSource, Interrupt, PiperSpeaker, Speaker, SttEngineKind, TranscriptWakeModel,
    UtteranceRecorder, VoiceError, WakeDetector,
};

mod config;
mod metrics;
mod session;

use config::Settings;
use metrics::SessionMetrics;
use session::{SessionOptions, SourceOpener, VoiceSession, REOPEN_BACKOFF};

#[derive(Parser, Debug)]
#[command(
    name = "voice-assistant",
    version,
    about = "Hands-free voice logging for the health dashboard",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the voice session loop
    Run {
        /// Listen directly without waiting for a wake phrase
        #[arg(long, action = ArgAction::SetTrue)]
        no_wake: bool,
        /// Process one utterance, then exit
        #[arg(long, action = ArgAction::SetTrue)]
        single: bool,
        /// Reload custom metric patterns every N cycles (0 = never)
        #[arg(long, default_value_t = 0)]
        reload_every: u32,
    },
    /// Parse a command and print the intent
    Parse {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Parse and execute a command against the data API
    Dispatch {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Speak text through the TTS pipeline
    Say {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Show a live microphone level meter
    MicTest {
        #[arg(long, default_value_t = 5)]
        secs: u64,
    },
    /// Listen for one wake phrase
    WakeTest,
    /// Record one utterance and print the transcription
    SttTest,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.settings.log_level());
    voice_local::init()?;
    intent_parser::init()?;
    command_dispatch::init()?;

    let interrupt = Interrupt::new();
    install_interrupt_handler(&interrupt)?;

    let settings = cli.settings;
    match cli.command {
        Commands::Run {
            no_wake,
            single,
            reload_every,
        } => run_session(&settings, &interrupt, no_wake, SessionOptions { single, reload_every }),
        Commands::Parse { text } => parse_text(&settings, &text.join(" ")),
        Commands::Dispatch { text } => dispatch_text(&settings, &text.join(" ")),
        Commands::Say { text } => say(&settings, &interrupt, &text.join(" ")),
        Commands::MicTest { secs } => mic_test(&settings, &interrupt, Duration::from_secs(secs)),
        Commands::WakeTest => wake_test(&settings, &interrupt),
        Commands::SttTest => stt_test(&settings, &interrupt),
    }
}

fn setup_tracing(default_level: &str) {
    // RUST_LOG wins; otherwise --verbose / VOICE_DEBUG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn install_interrupt_handler(interrupt: &Interrupt) -> Result<()> {
    let flag = interrupt.clone();
    ctrlc::set_handler(move || {
        if flag.is_set() {
            // Second Ctrl-C: stop waiting for a clean unwind.
            std::process::exit(130);
        }
        eprintln!("\nShutting down...");
        flag.trigger();
    })
    .context("installing Ctrl-C handler")
}

#[cfg(feature = "audio")]
fn open_audio(settings: &Settings, interrupt: &Interrupt) -> Result<Box<dyn AudioSource>> {
    let mic = voice_local::MicSource::open(&settings.audio(), interrupt.clone())
        .context("opening microphone")?;
    Ok(Box::new(mic))
}

#[cfg(not(feature = "audio"))]
fn open_audio(_settings: &Settings, _interrupt: &Interrupt) -> Result<Box<dyn AudioSource>> {
    anyhow::bail!("built without microphone support; rebuild with `--features audio`")
}

fn wake_detector(settings: &Settings) -> Result<WakeDetector> {
    let wake = settings.wake();
    anyhow::ensure!(!wake.phrases.is_empty(), "no wake phrase configured");
    let stt = settings.wake_stt();
    let stream: Box<dyn AsrStream> = match settings.stt_engine {
        SttEngineKind::Mock => Box::new(voice_local::MockAsrStream::default()),
        _ => Box::new(voice_local::KyutaiTranscriber::new(&stt).context("wake recognizer")?),
    };
    let model = TranscriptWakeModel::new(stream, wake.phrases.clone());
    Ok(WakeDetector::new(Box::new(model), wake))
}

fn speaker(settings: &Settings, interrupt: &Interrupt) -> Result<PiperSpeaker> {
    PiperSpeaker::new(settings.tts(), interrupt.clone()).context("loading TTS voice")
}

fn parser(settings: &Settings) -> Result<IntentParser> {
    let source = HttpDataApi::new(&settings.api_url).context("data API client")?;
    Ok(IntentParser::new(settings.intent())
        .context("building intent parser")?
        .with_registry(PatternRegistry::new(Box::new(source))))
}

fn run_session(
    settings: &Settings,
    interrupt: &Interrupt,
    no_wake: bool,
    options: SessionOptions,
) -> Result<()> {
    let wake_phrases = if no_wake {
        "disabled".to_string()
    } else {
        settings.wake().phrases.join(", ")
    };
    info!(
        wake = %wake_phrases,
        engine = %settings.stt_engine,
        api = %settings.api_url,
        "Starting voice assistant"
    );
    // Startup failures end the process before any listening begins.
    let mut tts = speaker(settings, interrupt)?;
    match tts.precompute() {
        Ok(n) => info!(synthesized = n, "Common phrases cached"),
        Err(e) if e.is_interrupted() => return Ok(()),
        Err(e) => warn!(error = %e, "Phrase precompute failed"),
    }
    let wake = if no_wake { None } else { Some(wake_detector(settings)?) };
    let stt = voice_local::new_transcriber(&settings.stt()).context("loading STT engine")?;
    let source = open_audio(settings, interrupt)?;
    let metrics = SessionMetrics::new().map_err(anyhow::Error::msg)?;
    let reopen: SourceOpener = {
        let settings = settings.clone();
        let interrupt = interrupt.clone();
        Box::new(move || {
            open_audio(&settings, &interrupt).map_err(|e| VoiceError::Device(format!("{e:#}")))
        })
    };

    let mut session = VoiceSession::new(
        source,
        wake,
        UtteranceRecorder::new(settings.vad()),
        stt,
        parser(settings)?,
        command_dispatch::connect(&settings.api_url)?,
        Box::new(tts),
        interrupt.clone(),
        metrics,
        options,
    )
    .with_reopen(reopen, REOPEN_BACKOFF);
    let result = session.run();
    tracing::debug!(metrics = %session.metrics().encode_text(), "Session metrics");
    result.context("voice session")
}

fn parse_text(settings: &Settings, text: &str) -> Result<()> {
    let mut parser = parser(settings)?;
    match parser.parse(text) {
        Ok(intent) => {
            println!("Intent: {}", intent.intent);
            println!("Params: {}", serde_json::Value::Object(intent.params));
            println!("Confidence: {:.2}", intent.confidence);
            println!("Source: {:?}", intent.source);
        }
        Err(e) => println!("No intent: {e}"),
    }
    Ok(())
}

fn dispatch_text(settings: &Settings, text: &str) -> Result<()> {
    let mut parser = parser(settings)?;
    let dispatcher = command_dispatch::connect(&settings.api_url)?;
    let intent = match parser.parse(text) {
        Ok(intent) => intent,
        Err(e) => {
            println!("Could not parse intent: {e}");
            return Ok(());
        }
    };
    println!("Parsed intent: {} -> {}", intent.intent, serde_json::Value::Object(intent.params.clone()));
    let result = dispatcher.execute(&intent);
    println!("Result: {}", result.success);
    println!("Message: {}", result.message);
    Ok(())
}

fn say(settings: &Settings, interrupt: &Interrupt, text: &str) -> Result<()> {
    let mut tts = speaker(settings, interrupt)?;
    let started = Instant::now();
    match tts.speak(text) {
        Ok(()) => info!(ms = started.elapsed().as_millis() as u64, "Spoken"),
        Err(e) => warn!(error = %e, "Speech stopped"),
    }
    Ok(())
}

fn level_bar(energy: f32, threshold: f32) -> String {
    const WIDTH: usize = 40;
    let filled = ((energy / 4000.0).clamp(0.0, 1.0) * WIDTH as f32) as usize;
    let marker = if energy >= threshold { "SPEECH" } else { "" };
    format!("[{}{}] {:>6.0} {marker}", "#".repeat(filled), " ".repeat(WIDTH - filled), energy)
}

fn mic_test(settings: &Settings, interrupt: &Interrupt, secs: Duration) -> Result<()> {
    #[cfg(feature = "audio")]
    {
        for (i, name) in voice_local::list_input_devices()?.iter().enumerate() {
            println!("{i}: {name}");
        }
    }
    let mut source = open_audio(settings, interrupt)?;
    let threshold = settings.vad().energy_threshold;
    let deadline = Instant::now() + secs;
    let mut peak = 0.0f32;
    while Instant::now() < deadline && !interrupt.is_set() {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_interrupted() => break,
            Err(e) => return Err(e).context("reading microphone"),
        };
        let energy = voice_local::dsp::mean_abs_energy(&frame);
        peak = peak.max(energy);
        eprint!("\r{}", level_bar(energy, threshold));
    }
    eprintln!();
    println!("Peak level: {peak:.0} (speech threshold {threshold:.0})");
    Ok(())
}

fn wake_test(settings: &Settings, interrupt: &Interrupt) -> Result<()> {
    let mut detector = wake_detector(settings)?;
    let mut source = open_audio(settings, interrupt)?;
    println!("Say one of: {}", detector.config().phrases.join(", "));
    match detector.wait_for_wake(source.as_mut(), interrupt) {
        Ok(Some(event)) => println!("Detected '{}' (score {:.2})", event.phrase, event.score),
        Ok(None) => println!("Audio stream ended without a detection"),
        Err(e) if e.is_interrupted() => println!("Interrupted"),
        Err(e) => return Err(e).context("wake detection"),
    }
    Ok(())
}

fn stt_test(settings: &Settings, interrupt: &Interrupt) -> Result<()> {
    let mut stt = voice_local::new_transcriber(&settings.stt()).context("loading STT engine")?;
    let mut source = open_audio(settings, interrupt)?;
    let recorder = UtteranceRecorder::new(settings.vad());
    println!("Speak now ({} engine)...", stt.kind());
    let utterance = match recorder.record(source.as_mut(), stt.as_stream(), interrupt) {
        Ok(Some(u)) => u,
        Ok(None) => {
            println!("No speech detected");
            return Ok(());
        }
        Err(e) if e.is_interrupted() => return Ok(()),
        Err(e) => return Err(e).context("recording"),
    };
    let started = Instant::now();
    let text = stt.transcribe(&utterance).context("transcribing")?;
    println!(
        "Recorded {:.1}s, transcribed in {} ms",
        utterance.duration_secs(),
        started.elapsed().as_millis()
    );
    println!("Text: {text:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from(["voice-assistant", "run", "--no-wake", "--single", "--reload-every", "3"]).unwrap();
        match cli.command {
            Commands::Run {
                no_wake,
                single,
                reload_every,
            } => {
                assert!(no_wake && single);
                assert_eq!(reload_every, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
        let cli = Cli::try_parse_from(["voice-assistant", "parse", "had", "500", "calories"]).unwrap();
        assert!(matches!(cli.command, Commands::Parse { ref text } if text.join(" ") == "had 500 calories"));
    }

    #[test]
    fn test_level_bar() {
        let quiet = level_bar(100.0, 500.0);
        assert!(!quiet.contains("SPEECH"));
        let loud = level_bar(8000.0, 500.0);
        assert!(loud.contains(&"#".repeat(40)) && loud.contains("SPEECH"));
    }
}
