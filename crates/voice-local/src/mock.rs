use crate::error::{Result, VoiceError};
use crate::plugin::SttEngineKind;
use crate::traits::{AsrStream, AudioSource, Speaker, Transcriber, WakeModel};
use crate::tts::PlaybackHandle;
use crate::{AsrSegment, Utterance};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Audio source that replays scripted frames, then fails like a dropped
/// stream.
///
/// The script stands for audio that has not arrived yet, so `drain` keeps it
/// and only counts the call.
pub struct ScriptedSource {
    sample_rate: u32,
    frame_len: usize,
    frames: VecDeque<Vec<i16>>,
    drains: usize,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32, frame_len: usize) -> Self {
        Self {
            sample_rate,
            frame_len,
            frames: VecDeque::new(),
            drains: 0,
        }
    }

    /// Append `count` frames of constant amplitude (alternating sign).
    pub fn tone(mut self, amplitude: i16, count: usize) -> Self {
        let frame: Vec<i16> = (0..self.frame_len)
            .map(|i| if i % 2 == 0 { amplitude } else { amplitude.saturating_neg() })
            .collect();
        self.frames.extend(std::iter::repeat(frame).take(count));
        self
    }

    pub fn silence(self, count: usize) -> Self {
        self.tone(0, count)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn drains(&self) -> usize {
        self.drains
    }
}

impl AudioSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn read_frame(&mut self) -> Result<Vec<i16>> {
        self.frames
            .pop_front()
            .ok_or_else(|| VoiceError::Stream("script exhausted".into()))
    }

    fn drain(&mut self) {
        self.drains += 1;
    }
}

/// Wake model returning scripted scores, one entry per frame.
pub struct MockWakeModel {
    phrases: Vec<String>,
    script: VecDeque<Vec<(String, f32)>>,
    resets: Rc<Cell<usize>>,
}

impl MockWakeModel {
    pub fn new(phrase: &str, scores: Vec<f32>) -> Self {
        let script = scores
            .into_iter()
            .map(|s| vec![(phrase.to_string(), s)])
            .collect();
        Self {
            phrases: vec![phrase.to_string()],
            script,
            resets: Rc::new(Cell::new(0)),
        }
    }

    pub fn multi(script: Vec<Vec<(String, f32)>>) -> Self {
        let phrases = script
            .first()
            .map(|row| row.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default();
        Self {
            phrases,
            script: script.into(),
            resets: Rc::new(Cell::new(0)),
        }
    }

    pub fn reset_counter(&self) -> Rc<Cell<usize>> {
        self.resets.clone()
    }
}

impl WakeModel for MockWakeModel {
    fn phrases(&self) -> Vec<String> {
        self.phrases.clone()
    }

    fn predict(&mut self, _frame: &[i16]) -> Result<Vec<(String, f32)>> {
        Ok(self
            .script
            .pop_front()
            .unwrap_or_else(|| self.phrases.iter().map(|p| (p.clone(), 0.0)).collect()))
    }

    fn reset(&mut self) {
        self.resets.set(self.resets.get() + 1);
    }
}

/// Streaming recognizer emitting one scripted partial per pushed frame.
#[derive(Default)]
pub struct MockAsrStream {
    script: Vec<Option<String>>,
    final_at: Option<(usize, String)>,
    pushes: usize,
    pending: Option<AsrSegment>,
    heard: Vec<String>,
}

impl MockAsrStream {
    pub fn new(script: Vec<Option<&str>>) -> Self {
        Self {
            script: script.into_iter().map(|s| s.map(str::to_string)).collect(),
            ..Self::default()
        }
    }

    /// Report `text` as a final segment on the frame with index `frame`.
    pub fn with_final_at(mut self, frame: usize, text: &str) -> Self {
        self.final_at = Some((frame, text.to_string()));
        self
    }
}

impl AsrStream for MockAsrStream {
    fn push_audio(&mut self, _pcm_s16le: &[i16]) {
        let idx = self.pushes;
        self.pushes += 1;
        let ms = idx as u64 * 80;
        self.pending = match &self.final_at {
            Some((at, text)) if *at == idx => Some(AsrSegment {
                start_ms: ms,
                end_ms: ms + 80,
                text: text.clone(),
                is_final: true,
            }),
            _ => self.script.get(idx).cloned().flatten().map(|text| AsrSegment {
                start_ms: ms,
                end_ms: ms + 80,
                text,
                is_final: false,
            }),
        };
    }

    fn poll(&mut self) -> Option<AsrSegment> {
        let segment = self.pending.take()?;
        if segment.is_final {
            self.heard.clear();
        }
        self.heard.push(segment.text.clone());
        Some(segment)
    }

    fn finish(&mut self) -> Result<String> {
        let text = self.heard.join(" ");
        self.heard.clear();
        Ok(text)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.heard.clear();
    }
}

/// Transcriber returning canned texts in order, `""` once they run out.
pub struct MockTranscriber {
    texts: VecDeque<String>,
    calls: Rc<Cell<usize>>,
}

impl MockTranscriber {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn call_counter(&self) -> Rc<Cell<usize>> {
        self.calls.clone()
    }
}

impl Transcriber for MockTranscriber {
    fn kind(&self) -> SttEngineKind {
        SttEngineKind::Mock
    }

    fn transcribe(&mut self, _utterance: &Utterance) -> Result<String> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.texts.pop_front().unwrap_or_default())
    }
}

/// Speaker that records what it was asked to say.
#[derive(Clone, Default)]
pub struct MockSpeaker {
    spoken: Rc<RefCell<Vec<String>>>,
}

impl MockSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.borrow().clone()
    }
}

impl Speaker for MockSpeaker {
    fn speak(&mut self, text: &str) -> Result<()> {
        tracing::debug!(%text, "Mock speak");
        self.spoken.borrow_mut().push(text.to_string());
        Ok(())
    }

    fn speak_async(&mut self, text: &str) -> Result<PlaybackHandle> {
        self.speak(text)?;
        Ok(PlaybackHandle::finished())
    }
}
