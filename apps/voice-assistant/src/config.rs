//! Command-line and environment configuration
//!
//! Every setting is a flag with an environment variable fallback. The
//! libraries only ever see the plain config structs built here.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use intent_parser::{GenerativeConfig, IntentConfig};
use std::path::PathBuf;
use voice_local::{AudioConfig, SttConfig, SttEngineKind, TtsConfig, VadConfig, WakeConfig};

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Microphone sample rate in Hz
    #[arg(long, env = "VOICE_SAMPLE_RATE", default_value_t = voice_local::DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,
    /// Samples per audio frame
    #[arg(long, env = "VOICE_CHUNK_SIZE", default_value_t = voice_local::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Input device index or name substring
    #[arg(long, env = "VOICE_INPUT_DEVICE")]
    pub input_device: Option<String>,

    /// Wake phrases, comma separated
    #[arg(long = "wake-phrase", env = "WAKE_WORD_MODEL", value_delimiter = ',', default_value = "hey jarvis")]
    pub wake_phrases: Vec<String>,
    #[arg(long, env = "WAKE_WORD_THRESHOLD", default_value_t = 0.7)]
    pub wake_threshold: f32,
    /// Seconds before another wake detection is accepted
    #[arg(long, env = "WAKE_WORD_REFRACTORY", default_value_t = 2.0)]
    pub wake_refractory: f32,

    /// Seconds of silence that end an utterance
    #[arg(long, env = "VAD_SILENCE_THRESHOLD", default_value_t = 1.5)]
    pub silence_secs: f32,
    #[arg(long, env = "MAX_RECORDING_TIME", default_value_t = 10.0)]
    pub max_recording_secs: f32,
    /// Mean absolute amplitude that counts as speech
    #[arg(long, env = "VAD_ENERGY_THRESHOLD", default_value_t = 500.0)]
    pub vad_energy: f32,

    /// Speech-to-text engine: kyutai, whisper, moonshine or mock
    #[arg(long, env = "STT_ENGINE", default_value = "whisper")]
    pub stt_engine: SttEngineKind,
    /// Model size or name; engine default when unset
    #[arg(long, env = "STT_MODEL")]
    pub stt_model: Option<String>,
    /// Inference endpoint; engine default when unset
    #[arg(long, env = "STT_URL")]
    pub stt_url: Option<String>,
    #[arg(long, env = "STT_API_TOKEN", hide_env_values = true)]
    pub stt_token: Option<String>,

    /// Data API base URL
    #[arg(long, env = "HEALTH_API_URL", default_value = command_dispatch::DEFAULT_BASE_URL)]
    pub api_url: String,

    /// Piper voice model
    #[arg(long, env = "PIPER_MODEL_PATH", default_value = "models/piper/en_US-bryce-medium.onnx")]
    pub tts_model: PathBuf,
    /// Phrase cache directory; user cache dir when unset
    #[arg(long, env = "TTS_CACHE_DIR")]
    pub tts_cache_dir: Option<PathBuf>,

    #[arg(long, env = "OLLAMA_ENABLED", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub ollama: bool,
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434/api/generate")]
    pub ollama_url: String,
    #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen:0.5b")]
    pub ollama_model: String,
    #[arg(long, env = "OLLAMA_TIMEOUT", default_value_t = 30)]
    pub ollama_timeout: u64,

    /// Debug-level logging
    #[arg(short, long, env = "VOICE_DEBUG", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub verbose: bool,
}

impl Settings {
    pub fn audio(&self) -> AudioConfig {
        AudioConfig {
            sample_rate_hz: self.sample_rate,
            chunk_size: self.chunk_size,
            device: self.input_device.clone(),
        }
    }

    pub fn wake(&self) -> WakeConfig {
        WakeConfig {
            phrases: self
                .wake_phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            threshold: self.wake_threshold,
            refractory_secs: self.wake_refractory,
        }
    }

    pub fn vad(&self) -> VadConfig {
        VadConfig {
            energy_threshold: self.vad_energy,
            silence_secs: self.silence_secs,
            max_recording_secs: self.max_recording_secs,
        }
    }

    pub fn stt(&self) -> SttConfig {
        SttConfig {
            engine: self.stt_engine,
            model: self.stt_model.clone(),
            url: self.stt_url.clone(),
            api_token: self.stt_token.clone(),
            sample_rate_hz: self.sample_rate,
            vad_energy_threshold: self.vad_energy,
            ..SttConfig::default()
        }
    }

    /// Recognizer used to spot wake phrases: always the streaming engine,
    /// sharing the endpoint only when the main engine is streaming too.
    pub fn wake_stt(&self) -> SttConfig {
        let main = self.stt();
        if main.engine.is_streaming() {
            return main;
        }
        SttConfig {
            engine: SttEngineKind::Kyutai,
            model: None,
            url: None,
            ..main
        }
    }

    pub fn tts(&self) -> TtsConfig {
        let defaults = TtsConfig::default();
        TtsConfig {
            model_path: self.tts_model.clone(),
            cache_dir: self.tts_cache_dir.clone().unwrap_or(defaults.cache_dir.clone()),
            ..defaults
        }
    }

    pub fn intent(&self) -> IntentConfig {
        IntentConfig {
            generative: GenerativeConfig {
                enabled: self.ollama,
                url: self.ollama_url.clone(),
                model: self.ollama_model.clone(),
                timeout_secs: self.ollama_timeout,
            },
        }
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["voice-assistant"];
        argv.extend_from_slice(args);
        Wrapper::parse_from(argv).settings
    }

    #[test]
    fn test_defaults() {
        let s = parse(&[]);
        assert_eq!(s.audio().chunk_size, 1280);
        assert_eq!(s.wake().phrases, vec!["hey jarvis".to_string()]);
        assert_eq!(s.vad().silence_secs, 1.5);
        assert_eq!(s.stt().engine, SttEngineKind::Whisper);
        assert!(!s.intent().generative.enabled);
        assert_eq!(s.log_level(), "info");
    }

    #[test]
    fn test_flags_override() {
        let s = parse(&[
            "--wake-phrase",
            "Hey Jarvis, computer",
            "--stt-engine",
            "moonshine",
            "--max-recording-secs",
            "6",
            "--input-device",
            "USB",
            "-v",
        ]);
        assert_eq!(s.wake().phrases, vec!["hey jarvis".to_string(), "computer".to_string()]);
        assert_eq!(s.stt().engine, SttEngineKind::Moonshine);
        assert_eq!(s.wake_stt().engine, SttEngineKind::Kyutai);
        assert_eq!(s.vad().max_recording_secs, 6.0);
        assert_eq!(s.audio().device.as_deref(), Some("USB"));
        assert_eq!(s.log_level(), "debug");
    }
}
