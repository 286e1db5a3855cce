use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
/// 80 ms at 16 kHz
pub const DEFAULT_CHUNK_SIZE: usize = 1280;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    /// Samples per frame
    pub chunk_size: usize,
    /// Device index or case-insensitive name substring
    #[serde(default)]
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    pub phrases: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_refractory")]
    pub refractory_secs: f32,
}

fn default_threshold() -> f32 {
    0.7
}

fn default_refractory() -> f32 {
    2.0
}

impl WakeConfig {
    pub fn refractory(&self) -> Duration {
        Duration::from_secs_f32(self.refractory_secs.max(0.0))
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: vec!["hey jarvis".to_string()],
            threshold: default_threshold(),
            refractory_secs: default_refractory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Mean absolute amplitude separating speech from silence
    pub energy_threshold: f32,
    pub silence_secs: f32,
    pub max_recording_secs: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 500.0,
            silence_secs: 1.5,
            max_recording_secs: 10.0,
        }
    }
}

/// A wake phrase crossing the detection threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeEvent {
    pub phrase: String,
    pub score: f32,
}

/// Text produced by a streaming recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    /// The engine considers the phrase complete
    pub is_final: bool,
}

/// Why recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Silence,
    MaxDuration,
    EngineFinal,
}

/// One recorded span of speech
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
    pub frame_len: usize,
    pub speech_frames: usize,
    pub stop: StopReason,
}

impl Utterance {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate_hz.max(1) as f32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Piper voice model; `<model>.json` must sit next to it
    pub model_path: PathBuf,
    pub cache_dir: PathBuf,
    pub synth_program: String,
    pub player_program: String,
    pub synth_timeout_secs: u64,
    pub playback_timeout_secs: u64,
    pub common_phrases: Vec<String>,
}

pub const COMMON_PHRASES: [&str; 7] = [
    "Ready!",
    "Yes!",
    "Sorry, I didn't understand that.",
    "An error occurred.",
    "Cannot connect to dashboard server.",
    "Done.",
    "OK.",
];

impl Default for TtsConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voice-assistant")
            .join("tts");
        Self {
            model_path: PathBuf::from("models/piper/en_US-bryce-medium.onnx"),
            cache_dir,
            synth_program: "piper".to_string(),
            player_program: "aplay".to_string(),
            synth_timeout_secs: 30,
            playback_timeout_secs: 10,
            common_phrases: COMMON_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
