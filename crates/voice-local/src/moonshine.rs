//! Moonshine batch engine: the utterance is posted as a raw WAV body.

use crate::error::{Result, VoiceError};
use crate::plugin::{batch_wav, http_client, text_from_body, SttConfig, SttEngineKind};
use crate::traits::Transcriber;
use crate::Utterance;
use reqwest::header::CONTENT_TYPE;

pub struct MoonshineTranscriber {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    energy_threshold: f32,
}

impl MoonshineTranscriber {
    pub fn new(cfg: &SttConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: cfg.endpoint().to_string(),
            model: cfg.model_name().to_string(),
            energy_threshold: cfg.vad_energy_threshold,
        })
    }
}

impl Transcriber for MoonshineTranscriber {
    fn kind(&self) -> SttEngineKind {
        SttEngineKind::Moonshine
    }

    fn transcribe(&mut self, utterance: &Utterance) -> Result<String> {
        let Some(wav) = batch_wav(utterance, self.energy_threshold)? else {
            return Ok(String::new());
        };
        let resp = self
            .client
            .post(&self.url)
            .query(&[("model", self.model.as_str())])
            .header(CONTENT_TYPE, "audio/wav")
            .body(wav)
            .send()
            .map_err(|e| VoiceError::Transcription(format!("moonshine request: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| VoiceError::Transcription(format!("moonshine response: {e}")))?;
        if !status.is_success() {
            return Err(VoiceError::Transcription(format!("moonshine HTTP {status}: {body}")));
        }
        let text = text_from_body(&body);
        tracing::debug!(%text, "Moonshine transcribed");
        Ok(text)
    }
}
