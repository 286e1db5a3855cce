//! Wake phrase detection with a refractory period

use crate::error::{Result, VoiceError};
use crate::interrupt::Interrupt;
use crate::traits::{AsrStream, AudioSource, WakeModel};
use crate::{WakeConfig, WakeEvent};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Blocks on an audio source until a wake phrase crosses the threshold.
pub struct WakeDetector {
    model: Box<dyn WakeModel>,
    config: WakeConfig,
    last_detection: Option<Instant>,
    needs_reset: bool,
    frames: u64,
}

impl WakeDetector {
    pub fn new(model: Box<dyn WakeModel>, config: WakeConfig) -> Self {
        Self {
            model,
            config,
            last_detection: None,
            needs_reset: false,
            frames: 0,
        }
    }

    pub fn config(&self) -> &WakeConfig {
        &self.config
    }

    /// Time left before another detection may be accepted.
    pub fn refractory_remaining(&self, now: Instant) -> Duration {
        match self.last_detection {
            Some(last) => self
                .config
                .refractory()
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Score one frame observed at `now`.
    ///
    /// Frames inside the refractory window are not scored. The first frame
    /// after it resets the model before scoring so leftover activation from
    /// the previous detection cannot re-trigger.
    pub fn observe(&mut self, frame: &[i16], now: Instant) -> Result<Option<WakeEvent>> {
        if !self.refractory_remaining(now).is_zero() {
            return Ok(None);
        }
        if self.needs_reset {
            self.model.reset();
            self.needs_reset = false;
        }

        let scores = self.model.predict(frame)?;
        self.frames += 1;
        if self.frames % 50 == 0 && scores.iter().any(|(_, s)| *s > 0.1) {
            trace!(?scores, "Wake scores");
        }

        let hit = scores
            .into_iter()
            .find(|(_, score)| *score > self.config.threshold);
        Ok(hit.map(|(phrase, score)| {
            self.last_detection = Some(now);
            self.needs_reset = true;
            WakeEvent { phrase, score }
        }))
    }

    /// Listen until a wake phrase is detected.
    ///
    /// Waits out any remaining refractory time first. Audio errors end the
    /// wait with `Ok(None)` so the caller can decide whether to reopen the
    /// stream; only an interrupt is returned as an error.
    pub fn wait_for_wake(
        &mut self,
        source: &mut dyn AudioSource,
        interrupt: &Interrupt,
    ) -> Result<Option<WakeEvent>> {
        let remaining = self.refractory_remaining(Instant::now());
        if !remaining.is_zero() {
            debug!(secs = remaining.as_secs_f32(), "Refractory period, waiting");
            sleep_interruptibly(remaining, interrupt)?;
        }
        self.model.reset();
        self.needs_reset = false;
        source.drain();

        debug!(
            phrases = ?self.model.phrases(),
            threshold = self.config.threshold,
            "Listening for wake phrase"
        );
        loop {
            interrupt.check()?;
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
                Err(e) => {
                    warn!(error = %e, "Audio error while listening for wake phrase");
                    return Ok(None);
                }
            };
            match self.observe(&frame, Instant::now()) {
                Ok(Some(event)) => {
                    info!(phrase = %event.phrase, score = event.score, "Wake phrase detected");
                    return Ok(Some(event));
                }
                Ok(None) => {}
                Err(VoiceError::Interrupted) => return Err(VoiceError::Interrupted),
                Err(e) => {
                    warn!(error = %e, "Wake model error");
                    return Ok(None);
                }
            }
        }
    }
}

pub(crate) fn sleep_interruptibly(total: Duration, interrupt: &Interrupt) -> Result<()> {
    let deadline = Instant::now() + total;
    loop {
        interrupt.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

/// Wake model that scores phrases from a streaming recognizer's text.
///
/// A phrase fully contained in the recent transcript scores 1.0; otherwise
/// the score is the fraction of its words heard in order.
pub struct TranscriptWakeModel {
    stream: Box<dyn AsrStream>,
    phrases: Vec<String>,
    heard: String,
}

const HEARD_WINDOW: usize = 200;

impl TranscriptWakeModel {
    pub fn new(stream: Box<dyn AsrStream>, phrases: Vec<String>) -> Self {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize_words(&p))
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            stream,
            phrases,
            heard: String::new(),
        }
    }

    fn score(&self, phrase: &str) -> f32 {
        if format!(" {} ", self.heard).contains(&format!(" {phrase} ")) {
            return 1.0;
        }
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.is_empty() {
            return 0.0;
        }
        let mut matched = 0;
        for heard in self.heard.split_whitespace() {
            if matched < words.len() && heard == words[matched] {
                matched += 1;
            }
        }
        matched as f32 / words.len() as f32
    }
}

fn normalize_words(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl WakeModel for TranscriptWakeModel {
    fn phrases(&self) -> Vec<String> {
        self.phrases.clone()
    }

    fn predict(&mut self, frame: &[i16]) -> Result<Vec<(String, f32)>> {
        self.stream.push_audio(frame);
        while let Some(segment) = self.stream.poll() {
            let text = normalize_words(&segment.text);
            if !text.is_empty() {
                if !self.heard.is_empty() {
                    self.heard.push(' ');
                }
                self.heard.push_str(&text);
            }
        }
        if self.heard.len() > HEARD_WINDOW {
            let cut = self.heard.len() - HEARD_WINDOW;
            let cut = self.heard[cut..]
                .find(' ')
                .map(|i| cut + i + 1)
                .unwrap_or(cut);
            if self.heard.is_char_boundary(cut) {
                self.heard.drain(..cut);
            }
        }
        Ok(self
            .phrases
            .iter()
            .map(|p| (p.clone(), self.score(p)))
            .collect())
    }

    fn reset(&mut self) {
        self.stream.reset();
        self.heard.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAsrStream, MockWakeModel, ScriptedSource};

    fn detector(scores: Vec<f32>) -> (WakeDetector, std::rc::Rc<std::cell::Cell<usize>>) {
        let model = MockWakeModel::new("hey jarvis", scores);
        let resets = model.reset_counter();
        let config = WakeConfig {
            phrases: vec!["hey jarvis".into()],
            threshold: 0.7,
            refractory_secs: 2.0,
        };
        (WakeDetector::new(Box::new(model), config), resets)
    }

    #[test]
    fn test_refractory_suppresses_rapid_second_detection() {
        let (mut det, resets) = detector(vec![0.9, 0.95, 0.9]);
        let t0 = Instant::now();
        let frame = vec![0i16; 160];

        assert!(det.observe(&frame, t0).unwrap().is_some());
        assert!(det
            .observe(&frame, t0 + Duration::from_millis(500))
            .unwrap()
            .is_none());
        assert_eq!(resets.get(), 0);

        let later = det
            .observe(&frame, t0 + Duration::from_millis(2100))
            .unwrap();
        assert!(later.is_some());
        assert_eq!(resets.get(), 1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let (mut det, _) = detector(vec![0.5, 0.7, 0.71]);
        let now = Instant::now();
        let frame = vec![0i16; 160];
        assert!(det.observe(&frame, now).unwrap().is_none());
        assert!(det.observe(&frame, now).unwrap().is_none());
        let event = det.observe(&frame, now).unwrap().unwrap();
        assert_eq!(event.phrase, "hey jarvis");
        assert!((event.score - 0.71).abs() < 1e-6);
    }

    #[test]
    fn test_first_phrase_over_threshold_wins() {
        let model = MockWakeModel::multi(vec![
            vec![("alexa".into(), 0.2), ("hey jarvis".into(), 0.8), ("computer".into(), 0.9)],
        ]);
        let mut det = WakeDetector::new(Box::new(model), WakeConfig::default());
        let event = det.observe(&[0; 16], Instant::now()).unwrap().unwrap();
        assert_eq!(event.phrase, "hey jarvis");
    }

    #[test]
    fn test_stream_error_reports_no_detection() {
        let (mut det, _) = detector(vec![0.1, 0.1]);
        let mut source = ScriptedSource::new(16_000, 160).silence(2);
        let result = det.wait_for_wake(&mut source, &Interrupt::new()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_wait_for_wake_detects_and_interrupt_aborts() {
        let (mut det, _) = detector(vec![0.1, 0.2, 0.95]);
        let mut source = ScriptedSource::new(16_000, 160).silence(5);
        let event = det.wait_for_wake(&mut source, &Interrupt::new()).unwrap();
        assert!(event.is_some());

        let (mut det, _) = detector(vec![0.1; 10]);
        let mut source = ScriptedSource::new(16_000, 160).silence(10);
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert!(matches!(
            det.wait_for_wake(&mut source, &interrupt),
            Err(VoiceError::Interrupted)
        ));
    }

    #[test]
    fn test_transcript_wake_model_scores() {
        let stream = MockAsrStream::new(vec![Some("uh hey"), None, Some("jarvis add")]);
        let mut model = TranscriptWakeModel::new(Box::new(stream), vec!["Hey Jarvis".into()]);
        let frame = [0i16; 16];

        let scores = model.predict(&frame).unwrap();
        assert_eq!(scores[0].0, "hey jarvis");
        assert!((scores[0].1 - 0.5).abs() < 1e-6);
        model.predict(&frame).unwrap();
        let scores = model.predict(&frame).unwrap();
        assert_eq!(scores[0].1, 1.0);

        model.reset();
        let scores = model.predict(&frame).unwrap();
        assert_eq!(scores[0].1, 0.0);
    }

    #[test]
    fn test_transcript_wake_model_matches_whole_words() {
        let stream = MockAsrStream::new(vec![Some("they jarvised")]);
        let mut model = TranscriptWakeModel::new(Box::new(stream), vec!["hey jarvis".into()]);
        let scores = model.predict(&[0i16; 16]).unwrap();
        assert_eq!(scores[0].1, 0.0);

        let stream = MockAsrStream::new(vec![Some("okay, hey jarvis!")]);
        let mut model = TranscriptWakeModel::new(Box::new(stream), vec!["hey jarvis".into()]);
        let scores = model.predict(&[0i16; 16]).unwrap();
        assert_eq!(scores[0].1, 1.0);
    }
}
