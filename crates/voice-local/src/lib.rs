//! voice-local: microphone capture, wake detection, VAD recording,
//! pluggable speech-to-text engines and cached text-to-speech

pub mod dsp;
pub mod error;
pub use error::{Result, VoiceError};

mod interrupt;
pub use interrupt::Interrupt;

mod types;
pub use types::{
    AsrSegment, AudioConfig, StopReason, TtsConfig, Utterance, VadConfig, WakeConfig, WakeEvent,
    COMMON_PHRASES, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE,
};

mod traits;
pub use traits::{AsrStream, AudioSource, Speaker, Transcriber, WakeModel};

pub mod wake;
pub use wake::{TranscriptWakeModel, WakeDetector};

pub mod vad;
pub use vad::{UtteranceRecorder, VadState};

pub mod plugin;
pub use plugin::{new_transcriber, SttConfig, SttEngineKind};

mod kyutai;
pub use kyutai::KyutaiTranscriber;
mod moonshine;
pub use moonshine::MoonshineTranscriber;
mod whisper;
pub use whisper::WhisperTranscriber;

pub mod tts;
pub use tts::{cache_key, PiperSpeaker, PlaybackHandle};

#[cfg(feature = "audio")]
pub mod mic;
#[cfg(feature = "audio")]
pub use mic::{list_input_devices, MicSource};

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockAsrStream, MockSpeaker, MockTranscriber, MockWakeModel, ScriptedSource};

/// Initialize the voice subsystem
pub fn init() -> Result<()> {
    tracing::info!(
        audio = cfg!(feature = "audio"),
        mock = cfg!(feature = "mock"),
        "Initializing voice subsystem"
    );
    Ok(())
}
