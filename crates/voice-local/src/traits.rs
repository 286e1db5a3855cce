use crate::error::Result;
use crate::plugin::SttEngineKind;
use crate::tts::PlaybackHandle;
use crate::{AsrSegment, Utterance};

/// Blocking source of fixed-size mono PCM frames.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;
    fn frame_len(&self) -> usize;
    /// Block until the next full frame is available.
    fn read_frame(&mut self) -> Result<Vec<i16>>;
    /// Drop frames buffered while nobody was reading.
    fn drain(&mut self);
}

/// Scores audio frames against one or more wake phrases.
pub trait WakeModel {
    fn phrases(&self) -> Vec<String>;
    /// One `(phrase, score)` pair per registered phrase, scores in `[0, 1]`.
    fn predict(&mut self, frame: &[i16]) -> Result<Vec<(String, f32)>>;
    /// Clear internal activation state.
    fn reset(&mut self);
}

/// Incremental recognizer fed while audio arrives.
pub trait AsrStream {
    fn push_audio(&mut self, pcm_s16le: &[i16]);
    /// Newly recognized text, if any. A segment marked final ends the phrase.
    fn poll(&mut self) -> Option<AsrSegment>;
    /// Flush buffered audio and return everything heard since the last reset.
    fn finish(&mut self) -> Result<String>;
    fn reset(&mut self);
}

/// Speech-to-text engine selected once at startup.
pub trait Transcriber {
    fn kind(&self) -> SttEngineKind;

    /// Streaming engines expose themselves so the recorder can feed them live.
    fn as_stream(&mut self) -> Option<&mut dyn AsrStream> {
        None
    }

    /// Text for a recorded utterance, `""` when nothing was recognized.
    fn transcribe(&mut self, utterance: &Utterance) -> Result<String>;
}

/// Spoken output.
///
/// Synthesis and playback failures are logged by implementations; only an
/// interrupt is returned as an error.
pub trait Speaker {
    fn speak(&mut self, text: &str) -> Result<()>;
    /// Start speaking and return without waiting for playback to end.
    fn speak_async(&mut self, text: &str) -> Result<PlaybackHandle>;
}
