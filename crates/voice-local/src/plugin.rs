use crate::dsp::{encode_wav, trim_silence};
use crate::error::{Result, VoiceError};
use crate::kyutai::KyutaiTranscriber;
use crate::moonshine::MoonshineTranscriber;
use crate::traits::Transcriber;
use crate::whisper::WhisperTranscriber;
use crate::Utterance;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttEngineKind {
    /// Streaming, low latency
    Kyutai,
    /// Batch, OpenAI-compatible transcription endpoint
    Whisper,
    /// Batch, raw WAV inference endpoint
    Moonshine,
    Mock,
}

impl SttEngineKind {
    pub fn is_streaming(self) -> bool {
        matches!(self, SttEngineKind::Kyutai)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SttEngineKind::Kyutai => "kyutai",
            SttEngineKind::Whisper => "whisper",
            SttEngineKind::Moonshine => "moonshine",
            SttEngineKind::Mock => "mock",
        }
    }

    fn default_url(self) -> &'static str {
        match self {
            SttEngineKind::Kyutai => "https://api-inference.huggingface.co/models/kyutai/stt-2.6b-en",
            SttEngineKind::Whisper => "http://localhost:8000/v1/audio/transcriptions",
            SttEngineKind::Moonshine => "http://localhost:8090/transcribe",
            SttEngineKind::Mock => "",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            SttEngineKind::Kyutai => "kyutai/stt-2.6b-en",
            SttEngineKind::Whisper => "base",
            SttEngineKind::Moonshine => "moonshine/base",
            SttEngineKind::Mock => "mock",
        }
    }
}

impl fmt::Display for SttEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SttEngineKind {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kyutai" | "kyutai_moshi" => Ok(SttEngineKind::Kyutai),
            "whisper" => Ok(SttEngineKind::Whisper),
            "moonshine" => Ok(SttEngineKind::Moonshine),
            "mock" => Ok(SttEngineKind::Mock),
            other => Err(format!(
                "unknown STT engine '{other}' (expected kyutai, whisper, moonshine or mock)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    pub engine: SttEngineKind,
    /// Model size or name; engine default when unset
    #[serde(default)]
    pub model: Option<String>,
    /// Inference endpoint; engine default when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    pub language: String,
    pub sample_rate_hz: u32,
    pub timeout_secs: u64,
    /// Energy threshold for the batch pre-filter
    pub vad_energy_threshold: f32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            engine: SttEngineKind::Whisper,
            model: None,
            url: None,
            api_token: None,
            language: "en".to_string(),
            sample_rate_hz: crate::DEFAULT_SAMPLE_RATE,
            timeout_secs: 30,
            vad_energy_threshold: 500.0,
        }
    }
}

impl SttConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.engine.default_model())
    }

    pub fn endpoint(&self) -> &str {
        self.url.as_deref().unwrap_or_else(|| self.engine.default_url())
    }
}

/// Build the configured engine.
pub fn new_transcriber(cfg: &SttConfig) -> Result<Box<dyn Transcriber>> {
    tracing::info!(engine = %cfg.engine, model = cfg.model_name(), "Loading STT engine");
    match cfg.engine {
        SttEngineKind::Kyutai => Ok(Box::new(KyutaiTranscriber::new(cfg)?)),
        SttEngineKind::Whisper => Ok(Box::new(WhisperTranscriber::new(cfg)?)),
        SttEngineKind::Moonshine => Ok(Box::new(MoonshineTranscriber::new(cfg)?)),
        SttEngineKind::Mock => {
            #[cfg(any(test, feature = "mock"))]
            {
                Ok(Box::new(crate::mock::MockTranscriber::new(Vec::<String>::new())))
            }
            #[cfg(not(any(test, feature = "mock")))]
            {
                Err(VoiceError::Transcription("mock feature not enabled".into()))
            }
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| VoiceError::Transcription(format!("http client: {e}")))
}

/// Pull recognized text out of an engine's response body.
///
/// Accepts `{"text": ...}`, a list of such objects or strings, or plain text.
pub(crate) fn text_from_body(body: &str) -> String {
    use serde_json::Value;
    let text = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(m) => m.get("text").and_then(Value::as_str),
                _ => None,
            })
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" "),
        Ok(Value::String(s)) => s,
        _ => body.to_string(),
    };
    text.trim().to_string()
}

/// VAD pre-filter shared by the batch engines: trims silence at both ends
/// and encodes what is left as WAV. `None` means there is nothing to send.
pub(crate) fn batch_wav(utterance: &Utterance, energy_threshold: f32) -> Result<Option<Vec<u8>>> {
    let speech = trim_silence(&utterance.samples, utterance.frame_len, energy_threshold);
    if speech.is_empty() {
        tracing::debug!("No speech left after trimming");
        return Ok(None);
    }
    tracing::debug!(
        secs = speech.len() as f32 / utterance.sample_rate_hz.max(1) as f32,
        "Transcribing"
    );
    encode_wav(speech, utterance.sample_rate_hz).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_names() {
        assert_eq!("Whisper".parse::<SttEngineKind>(), Ok(SttEngineKind::Whisper));
        assert_eq!("kyutai_moshi".parse::<SttEngineKind>(), Ok(SttEngineKind::Kyutai));
        assert!("vosk".parse::<SttEngineKind>().is_err());
        assert!(SttEngineKind::Kyutai.is_streaming());
        assert!(!SttEngineKind::Moonshine.is_streaming());
    }

    #[test]
    fn test_config_defaults_per_engine() {
        let cfg = SttConfig {
            engine: SttEngineKind::Moonshine,
            ..SttConfig::default()
        };
        assert_eq!(cfg.model_name(), "moonshine/base");
        assert!(cfg.endpoint().ends_with("/transcribe"));
    }

    #[test]
    fn test_text_from_body_shapes() {
        assert_eq!(text_from_body(r#"{"text": " had 500 calories "}"#), "had 500 calories");
        assert_eq!(text_from_body(r#"[{"text": "hey"}, {"text": "jarvis"}]"#), "hey jarvis");
        assert_eq!(text_from_body(r#"["one", "two"]"#), "one two");
        assert_eq!(text_from_body("plain words\n"), "plain words");
        assert_eq!(text_from_body(r#"{"error": "busy"}"#), "");
    }

    #[test]
    fn test_batch_wav_skips_silent_utterances() {
        let silent = Utterance {
            samples: vec![0; 3200],
            sample_rate_hz: 16_000,
            frame_len: 320,
            speech_frames: 0,
            stop: crate::StopReason::MaxDuration,
        };
        assert!(batch_wav(&silent, 500.0).unwrap().is_none());

        let mut samples = vec![0i16; 3200];
        samples[1600..1920].iter_mut().for_each(|s| *s = 2000);
        let voiced = Utterance { samples, ..silent };
        let wav = batch_wav(&voiced, 500.0).unwrap().unwrap();
        // 44-byte header plus one 320-sample frame
        assert_eq!(wav.len(), 44 + 640);
    }

    #[test]
    fn test_mock_engine_builds() {
        let cfg = SttConfig {
            engine: SttEngineKind::Mock,
            ..SttConfig::default()
        };
        let engine = new_transcriber(&cfg).unwrap();
        assert_eq!(engine.kind(), SttEngineKind::Mock);
    }
}
