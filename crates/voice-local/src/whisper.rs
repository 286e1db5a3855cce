//! Whisper batch engine over an OpenAI-compatible transcription endpoint

use crate::error::{Result, VoiceError};
use crate::plugin::{batch_wav, http_client, text_from_body, SttConfig, SttEngineKind};
use crate::traits::Transcriber;
use crate::Utterance;
use reqwest::blocking::multipart::{Form, Part};
use tracing::debug;

pub struct WhisperTranscriber {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    language: String,
    api_token: Option<String>,
    energy_threshold: f32,
}

impl WhisperTranscriber {
    pub fn new(cfg: &SttConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: cfg.endpoint().to_string(),
            model: cfg.model_name().to_string(),
            language: cfg.language.clone(),
            api_token: cfg.api_token.clone(),
            energy_threshold: cfg.vad_energy_threshold,
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn kind(&self) -> SttEngineKind {
        SttEngineKind::Whisper
    }

    fn transcribe(&mut self, utterance: &Utterance) -> Result<String> {
        let Some(wav) = batch_wav(utterance, self.energy_threshold)? else {
            return Ok(String::new());
        };
        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Transcription(format!("whisper form: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let mut req = self.client.post(&self.url).multipart(form);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .map_err(|e| VoiceError::Transcription(format!("whisper request: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| VoiceError::Transcription(format!("whisper response: {e}")))?;
        if !status.is_success() {
            return Err(VoiceError::Transcription(format!("whisper HTTP {status}: {body}")));
        }
        let text = text_from_body(&body);
        debug!(%text, "Whisper transcribed");
        Ok(text)
    }
}
