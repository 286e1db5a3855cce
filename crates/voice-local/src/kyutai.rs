//! Kyutai STT streaming engine
//!
//! Audio is posted in ~1 second chunks to a Kyutai/HuggingFace-compatible
//! inference endpoint. Each chunk that comes back with text is a partial
//! segment; the first empty chunk after text was heard closes the phrase.

use crate::dsp::{encode_wav, resample_linear};
use crate::error::{Result, VoiceError};
use crate::plugin::{http_client, text_from_body, SttConfig, SttEngineKind};
use crate::traits::{AsrStream, Transcriber};
use crate::{AsrSegment, Utterance};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

/// Kyutai models run at 24 kHz
const MODEL_SAMPLE_RATE: u32 = 24_000;

pub struct KyutaiTranscriber {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
    sample_rate: u32,
    buffer: Vec<i16>,
    fed: usize,
    last_segment_end: u64,
    heard: Vec<String>,
    phrase_closed: bool,
}

impl KyutaiTranscriber {
    pub fn new(cfg: &SttConfig) -> Result<Self> {
        if cfg.api_token.is_none() {
            debug!("No API token configured for Kyutai endpoint");
        }
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            url: cfg.endpoint().to_string(),
            token: cfg.api_token.clone(),
            sample_rate: cfg.sample_rate_hz,
            buffer: Vec::with_capacity(cfg.sample_rate_hz as usize * 2),
            fed: 0,
            last_segment_end: 0,
            heard: Vec::new(),
            phrase_closed: false,
        })
    }

    fn chunk_len(&self) -> usize {
        self.sample_rate as usize
    }

    fn transcribe_chunk(&self, pcm: &[i16]) -> Result<String> {
        let audio = resample_linear(pcm, self.sample_rate, MODEL_SAMPLE_RATE);
        let wav = encode_wav(&audio, MODEL_SAMPLE_RATE)?;

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "audio/wav")
            .body(wav);
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req
            .send()
            .map_err(|e| VoiceError::Transcription(format!("kyutai request: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| VoiceError::Transcription(format!("kyutai response: {e}")))?;
        if !status.is_success() {
            return Err(VoiceError::Transcription(format!("kyutai HTTP {status}: {body}")));
        }
        debug!(response = %body, "Kyutai response");
        Ok(text_from_body(&body))
    }

    fn span_ms(&mut self, samples: usize) -> (u64, u64) {
        let start = self.last_segment_end;
        let end = start + (samples as u64 * 1000) / self.sample_rate.max(1) as u64;
        self.last_segment_end = end;
        (start, end)
    }
}

impl AsrStream for KyutaiTranscriber {
    fn push_audio(&mut self, pcm_s16le: &[i16]) {
        self.buffer.extend_from_slice(pcm_s16le);
        self.fed += pcm_s16le.len();
    }

    fn poll(&mut self) -> Option<AsrSegment> {
        let chunk_len = self.chunk_len();
        if self.buffer.len() < chunk_len {
            return None;
        }
        let chunk: Vec<i16> = self.buffer.drain(..chunk_len).collect();
        let (start_ms, end_ms) = self.span_ms(chunk.len());

        match self.transcribe_chunk(&chunk) {
            Ok(text) if !text.is_empty() => {
                self.phrase_closed = false;
                self.heard.push(text.clone());
                Some(AsrSegment {
                    start_ms,
                    end_ms,
                    text,
                    is_final: false,
                })
            }
            Ok(_) if !self.heard.is_empty() && !self.phrase_closed => {
                self.phrase_closed = true;
                Some(AsrSegment {
                    start_ms,
                    end_ms,
                    text: self.heard.join(" "),
                    is_final: true,
                })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Kyutai transcription error");
                None
            }
        }
    }

    fn finish(&mut self) -> Result<String> {
        // Anything under 100 ms is not worth a request.
        if self.buffer.len() * 10 >= self.sample_rate as usize {
            let rest = std::mem::take(&mut self.buffer);
            match self.transcribe_chunk(&rest) {
                Ok(text) if !text.is_empty() => self.heard.push(text),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Kyutai transcription error"),
            }
        }
        let text = self.heard.join(" ");
        self.reset();
        Ok(text)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.fed = 0;
        self.last_segment_end = 0;
        self.heard.clear();
        self.phrase_closed = false;
    }
}

impl Transcriber for KyutaiTranscriber {
    fn kind(&self) -> SttEngineKind {
        SttEngineKind::Kyutai
    }

    fn as_stream(&mut self) -> Option<&mut dyn AsrStream> {
        Some(self)
    }

    fn transcribe(&mut self, utterance: &Utterance) -> Result<String> {
        // Utterances recorded without live streaming are fed in one go.
        if self.fed == 0 {
            self.push_audio(&utterance.samples);
            while self.buffer.len() >= self.chunk_len() {
                self.poll();
            }
        }
        self.finish()
    }
}
