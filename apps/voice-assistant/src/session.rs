//! The listen / understand / act / answer loop

use crate::metrics::SessionMetrics;
use command_dispatch::{CommandDispatcher, CommandResult};
use intent_parser::{IntentParser, ParseError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use voice_local::{
    AudioSource, Interrupt, Speaker, Transcriber, UtteranceRecorder, VoiceError, WakeDetector,
};

pub const ACK_PHRASE: &str = "Yes!";
pub const NOT_UNDERSTOOD: &str = "Sorry, I didn't understand that.";
pub const CYCLE_ERROR: &str = "An error occurred.";

/// Consecutive audio failures tolerated before the session gives up
pub const MAX_AUDIO_FAILURES: u32 = 5;
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(500);
const MAX_REOPEN_BACKOFF: Duration = Duration::from_secs(8);

/// Opens a fresh audio source after the current one has failed.
pub type SourceOpener = Box<dyn FnMut() -> Result<Box<dyn AudioSource>, VoiceError>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Stop after one cycle, whatever its outcome
    pub single: bool,
    /// Reload custom-metric patterns every N cycles; 0 never
    pub reload_every: u32,
}

/// What one cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The wake wait ended on an audio error
    NoWake,
    /// Audio failed while recording
    AudioError,
    /// Nothing was said, or nothing was recognized
    NoSpeech,
    NotUnderstood(String),
    Handled(CommandResult),
    Failed,
}

pub struct VoiceSession {
    source: Box<dyn AudioSource>,
    /// `None` listens directly without waiting for a wake phrase
    wake: Option<WakeDetector>,
    recorder: UtteranceRecorder,
    stt: Box<dyn Transcriber>,
    parser: IntentParser,
    dispatcher: CommandDispatcher,
    speaker: Box<dyn Speaker>,
    interrupt: Interrupt,
    metrics: SessionMetrics,
    options: SessionOptions,
    cycles: u64,
    opener: Option<SourceOpener>,
    backoff: Duration,
    audio_failures: u32,
}

impl VoiceSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn AudioSource>,
        wake: Option<WakeDetector>,
        recorder: UtteranceRecorder,
        stt: Box<dyn Transcriber>,
        parser: IntentParser,
        dispatcher: CommandDispatcher,
        speaker: Box<dyn Speaker>,
        interrupt: Interrupt,
        metrics: SessionMetrics,
        options: SessionOptions,
    ) -> Self {
        Self {
            source,
            wake,
            recorder,
            stt,
            parser,
            dispatcher,
            speaker,
            interrupt,
            metrics,
            options,
            cycles: 0,
            opener: None,
            backoff: REOPEN_BACKOFF,
            audio_failures: 0,
        }
    }

    /// Replace the audio source through `opener` after audio failures,
    /// waiting `backoff` (doubling per consecutive failure) first.
    pub fn with_reopen(mut self, opener: SourceOpener, backoff: Duration) -> Self {
        self.opener = Some(opener);
        self.backoff = backoff;
        self
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Run cycles until interrupted, or once in single mode.
    pub fn run(&mut self) -> Result<(), VoiceError> {
        if let Err(e) = self.parser.load_patterns() {
            warn!(error = %e, "Custom metric patterns unavailable");
        }
        match &self.wake {
            Some(w) => info!(phrases = ?w.config().phrases, "Ready! Listening for wake phrase"),
            None => info!("Ready! Listening (wake phrase disabled)"),
        }
        loop {
            if self.interrupt.is_set() {
                break;
            }
            self.maybe_reload();
            let audio_failed = match self.run_cycle() {
                Ok(outcome) => {
                    debug!(?outcome, "Cycle finished");
                    matches!(outcome, CycleOutcome::NoWake | CycleOutcome::AudioError)
                }
                Err(VoiceError::Interrupted) => break,
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    self.say(CYCLE_ERROR)?;
                    false
                }
            };
            self.cycles += 1;
            if self.options.single {
                break;
            }
            if !audio_failed {
                self.audio_failures = 0;
                continue;
            }
            self.audio_failures += 1;
            match self.recover_audio() {
                Ok(()) => {}
                Err(VoiceError::Interrupted) => break,
                Err(e) => return Err(e),
            }
        }
        info!(cycles = self.cycles, "Goodbye");
        Ok(())
    }

    /// Back off, then reopen the source if an opener is available. Gives up
    /// once the failure streak passes `MAX_AUDIO_FAILURES`.
    fn recover_audio(&mut self) -> Result<(), VoiceError> {
        let failures = self.audio_failures;
        if failures > MAX_AUDIO_FAILURES {
            error!(failures, "Audio input keeps failing, stopping");
            return Err(VoiceError::Stream(format!(
                "audio input failed {failures} times in a row"
            )));
        }
        let delay = self
            .backoff
            .saturating_mul(1 << (failures - 1).min(16))
            .min(MAX_REOPEN_BACKOFF);
        warn!(failures, delay_ms = delay.as_millis() as u64, "Audio input failed, backing off");
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            self.interrupt.check()?;
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()).min(Duration::from_millis(50)));
        }
        self.interrupt.check()?;

        let Some(open) = self.opener.as_mut() else {
            return Ok(());
        };
        match open() {
            Ok(source) => {
                info!("Audio input reopened");
                self.source = source;
            }
            Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
            Err(e) => warn!(error = %e, "Reopening audio input failed"),
        }
        Ok(())
    }

    fn maybe_reload(&mut self) {
        let every = u64::from(self.options.reload_every);
        if every == 0 || self.cycles == 0 || self.cycles % every != 0 {
            return;
        }
        debug!(cycle = self.cycles, "Reloading custom metric patterns");
        if let Err(e) = self.parser.reload_patterns() {
            warn!(error = %e, "Custom metric reload failed");
        }
    }

    /// Speech failures are already logged by the speaker; only an interrupt
    /// comes back.
    fn say(&mut self, text: &str) -> Result<(), VoiceError> {
        self.speaker.speak(text)
    }

    fn acknowledge(&mut self) -> Result<(), VoiceError> {
        let mut handle = self.speaker.speak_async(ACK_PHRASE)?;
        match handle.wait() {
            Ok(()) => {}
            Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
            Err(e) => warn!(error = %e, "Acknowledgement playback failed"),
        }
        // Drop whatever the microphone picked up of our own voice.
        self.source.drain();
        Ok(())
    }

    /// One full cycle. Only an interrupt is returned as an error.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, VoiceError> {
        if let Some(wake) = self.wake.as_mut() {
            let Some(event) = wake.wait_for_wake(self.source.as_mut(), &self.interrupt)? else {
                return Ok(CycleOutcome::NoWake);
            };
            self.metrics.wake_detections.inc();
            debug!(phrase = %event.phrase, score = event.score, "Acknowledging wake");
            self.acknowledge()?;
        }

        let recorded = self
            .recorder
            .record(self.source.as_mut(), self.stt.as_stream(), &self.interrupt);
        let utterance = match recorded {
            Ok(Some(u)) => u,
            Ok(None) => {
                self.no_speech();
                return Ok(CycleOutcome::NoSpeech);
            }
            Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
            Err(e) => {
                warn!(error = %e, "Recording failed");
                return Ok(CycleOutcome::AudioError);
            }
        };
        self.metrics.utterances.inc();
        debug!(secs = utterance.duration_secs(), stop = ?utterance.stop, "Utterance recorded");

        let text = match self.stt.transcribe(&utterance) {
            Ok(text) => text,
            Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
            Err(e) => {
                warn!(error = %e, "Transcription failed");
                String::new()
            }
        };
        let text = text.trim();
        if text.is_empty() {
            self.no_speech();
            return Ok(CycleOutcome::NoSpeech);
        }
        info!(%text, "Heard");

        let intent = match self.parser.parse(text) {
            Ok(intent) => intent,
            Err(ParseError::NoMatch(_) | ParseError::Empty) => {
                info!(%text, "No intent matched");
                self.metrics.parsed(None);
                self.say(NOT_UNDERSTOOD)?;
                return Ok(CycleOutcome::NotUnderstood(text.to_string()));
            }
            Err(e) => {
                error!(error = %e, "Parser failed");
                self.metrics.parsed(None);
                self.say(CYCLE_ERROR)?;
                return Ok(CycleOutcome::Failed);
            }
        };
        self.metrics.parsed(Some(intent.source));
        info!(
            intent = %intent.intent,
            params = %serde_json::Value::Object(intent.params.clone()),
            confidence = intent.confidence,
            "Intent"
        );

        let result = self.dispatcher.execute(&intent);
        if result.success {
            self.metrics.dispatch_ok.inc();
        } else {
            self.metrics.dispatch_failed.inc();
        }
        self.say(&result.message)?;
        Ok(CycleOutcome::Handled(result))
    }

    fn no_speech(&self) {
        if self.wake.is_none() {
            info!("No speech detected");
        } else {
            debug!("No speech detected");
        }
    }
}
