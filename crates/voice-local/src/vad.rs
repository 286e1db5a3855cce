//! Energy-based voice activity detection and utterance recording
//!
//! Time is measured in consumed frames, so a recording behaves the same
//! whether frames arrive live from a microphone or from a script.

use crate::dsp::mean_abs_energy;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::traits::{AsrStream, AudioSource};
use crate::{StopReason, Utterance, VadConfig};
use tracing::debug;

/// Per-frame speech/silence bookkeeping for one recording.
#[derive(Debug, Clone)]
pub struct VadState {
    config: VadConfig,
    frame_secs: f32,
    frames: usize,
    speech_frames: usize,
    silent_run: usize,
}

impl VadState {
    pub fn new(config: VadConfig, sample_rate: u32, frame_len: usize) -> Self {
        Self {
            config,
            frame_secs: frame_len as f32 / sample_rate.max(1) as f32,
            frames: 0,
            speech_frames: 0,
            silent_run: 0,
        }
    }

    pub fn is_speech(&self, frame: &[i16]) -> bool {
        mean_abs_energy(frame) >= self.config.energy_threshold
    }

    pub fn heard_speech(&self) -> bool {
        self.speech_frames > 0
    }

    pub fn speech_frames(&self) -> usize {
        self.speech_frames
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.frames as f32 * self.frame_secs
    }

    /// Account for one frame and report whether recording should stop.
    ///
    /// The silence timer only runs once speech has been heard.
    pub fn push(&mut self, frame: &[i16]) -> Option<StopReason> {
        self.frames += 1;
        if self.is_speech(frame) {
            self.speech_frames += 1;
            self.silent_run = 0;
        } else if self.heard_speech() {
            self.silent_run += 1;
            if self.silent_run as f32 * self.frame_secs > self.config.silence_secs {
                return Some(StopReason::Silence);
            }
        }
        if self.elapsed_secs() > self.config.max_recording_secs {
            return Some(StopReason::MaxDuration);
        }
        None
    }
}

/// Accumulates frames after a wake event until speech ends.
#[derive(Debug, Clone, Default)]
pub struct UtteranceRecorder {
    config: VadConfig,
}

impl UtteranceRecorder {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Record one utterance.
    ///
    /// A streaming recognizer, when given, is fed every frame and a final
    /// segment from it stops recording at once. Returns `Ok(None)` when no
    /// speech was heard at all.
    pub fn record(
        &self,
        source: &mut dyn AudioSource,
        mut stream: Option<&mut dyn AsrStream>,
        interrupt: &Interrupt,
    ) -> Result<Option<Utterance>> {
        let sample_rate = source.sample_rate();
        let frame_len = source.frame_len();
        let mut vad = VadState::new(self.config.clone(), sample_rate, frame_len);
        let max_samples = ((self.config.max_recording_secs.max(0.0) + 1.0) * sample_rate as f32) as usize;
        let mut samples: Vec<i16> = Vec::with_capacity(max_samples);
        let mut engine_final = false;

        let stop = loop {
            interrupt.check()?;
            let frame = source.read_frame()?;
            samples.extend_from_slice(&frame);

            if let Some(s) = stream.as_deref_mut() {
                s.push_audio(&frame);
                while let Some(segment) = s.poll() {
                    if segment.is_final {
                        debug!(text = %segment.text, "Engine reported end of phrase");
                        engine_final = true;
                    }
                }
            }

            let vad_stop = vad.push(&frame);
            if engine_final {
                break StopReason::EngineFinal;
            }
            if let Some(reason) = vad_stop {
                break reason;
            }
        };

        if !vad.heard_speech() && !engine_final {
            debug!(secs = vad.elapsed_secs(), "No speech detected");
            if let Some(s) = stream {
                s.reset();
            }
            return Ok(None);
        }

        debug!(
            ?stop,
            secs = vad.elapsed_secs(),
            speech_frames = vad.speech_frames(),
            "Recording finished"
        );
        Ok(Some(Utterance {
            samples,
            sample_rate_hz: sample_rate,
            frame_len,
            speech_frames: vad.speech_frames(),
            stop,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use crate::mock::{MockAsrStream, ScriptedSource};

    // 0.1 s frames keep the arithmetic readable.
    const RATE: u32 = 16_000;
    const FRAME: usize = 1600;

    fn recorder() -> UtteranceRecorder {
        UtteranceRecorder::new(VadConfig {
            energy_threshold: 500.0,
            silence_secs: 1.5,
            max_recording_secs: 10.0,
        })
    }

    #[test]
    fn test_stops_after_silence_following_speech() {
        let mut source = ScriptedSource::new(RATE, FRAME)
            .silence(5)
            .tone(1000, 10)
            .silence(30);
        let utt = recorder()
            .record(&mut source, None, &Interrupt::new())
            .unwrap()
            .unwrap();
        assert_eq!(utt.stop, StopReason::Silence);
        assert_eq!(utt.speech_frames, 10);
        // 5 + 10 + 16 silent frames (1.6 s > 1.5 s)
        assert_eq!(utt.samples.len(), 31 * FRAME);
    }

    #[test]
    fn test_leading_silence_does_not_end_recording() {
        let mut source = ScriptedSource::new(RATE, FRAME)
            .silence(40)
            .tone(1000, 3)
            .silence(20);
        let utt = recorder()
            .record(&mut source, None, &Interrupt::new())
            .unwrap()
            .unwrap();
        assert_eq!(utt.stop, StopReason::Silence);
        assert_eq!(utt.samples.len(), 59 * FRAME);
    }

    #[test]
    fn test_no_speech_is_discarded_at_max_duration() {
        let mut source = ScriptedSource::new(RATE, FRAME).silence(200);
        let result = recorder()
            .record(&mut source, None, &Interrupt::new())
            .unwrap();
        assert!(result.is_none());
        // 10 s hard limit is exceeded on the 101st frame
        assert_eq!(source.remaining(), 99);
    }

    #[test]
    fn test_continuous_speech_hits_max_duration() {
        let mut source = ScriptedSource::new(RATE, FRAME).tone(2000, 200);
        let utt = recorder()
            .record(&mut source, None, &Interrupt::new())
            .unwrap()
            .unwrap();
        assert_eq!(utt.stop, StopReason::MaxDuration);
        assert_eq!(utt.samples.len(), 101 * FRAME);
    }

    #[test]
    fn test_engine_final_stops_immediately() {
        let mut source = ScriptedSource::new(RATE, FRAME).tone(1000, 50);
        let mut stream =
            MockAsrStream::new(vec![None, Some("had 500"), None]).with_final_at(3, "had 500 calories");
        let utt = recorder()
            .record(&mut source, Some(&mut stream), &Interrupt::new())
            .unwrap()
            .unwrap();
        assert_eq!(utt.stop, StopReason::EngineFinal);
        assert_eq!(utt.samples.len(), 4 * FRAME);
    }

    #[test]
    fn test_audio_error_and_interrupt_propagate() {
        let mut source = ScriptedSource::new(RATE, FRAME).tone(1000, 2);
        assert!(matches!(
            recorder().record(&mut source, None, &Interrupt::new()),
            Err(VoiceError::Stream(_))
        ));

        let mut source = ScriptedSource::new(RATE, FRAME).tone(1000, 20);
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert!(matches!(
            recorder().record(&mut source, None, &interrupt),
            Err(VoiceError::Interrupted)
        ));
    }
}
