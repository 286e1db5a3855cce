//! Small sample-level helpers shared by capture, VAD and the engines

use crate::error::{Result, VoiceError};
use std::io::Cursor;

/// Mean absolute amplitude of a frame.
pub fn mean_abs_energy(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: u64 = frame.iter().map(|&s| (s as i32).unsigned_abs() as u64).sum();
    sum as f32 / frame.len() as f32
}

/// Drop leading and trailing frames whose energy stays under `threshold`.
pub fn trim_silence(samples: &[i16], frame_len: usize, threshold: f32) -> &[i16] {
    let frame_len = frame_len.max(1);
    let frames: Vec<&[i16]> = samples.chunks(frame_len).collect();
    let voiced = |f: &&[i16]| mean_abs_energy(f) >= threshold;
    let Some(first) = frames.iter().position(voiced) else {
        return &[];
    };
    let last = frames.iter().rposition(voiced).unwrap_or(first);
    let start = first * frame_len;
    let end = ((last + 1) * frame_len).min(samples.len());
    &samples[start..end]
}

/// Simple linear resampling
pub fn resample_linear(samples: &[i16], sr_in: u32, sr_out: u32) -> Vec<i16> {
    if sr_in == sr_out || samples.is_empty() || sr_in == 0 {
        return samples.to_vec();
    }

    let ratio = sr_out as f64 / sr_in as f64;
    let out_len = (samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 / ratio;
        let i0 = (pos.floor() as usize).min(samples.len() - 1);
        let i1 = (i0 + 1).min(samples.len() - 1);
        let t = pos - i0 as f64;
        let sample = samples[i0] as f64 * (1.0 - t) + samples[i1] as f64 * t;
        out.push(sample.round() as i16);
    }

    out
}

/// Encode 16-bit mono PCM as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err = |e: hound::Error| VoiceError::Transcription(format!("wav encode: {e}"));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        for &s in samples {
            writer.write_sample(s).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy() {
        assert_eq!(mean_abs_energy(&[]), 0.0);
        assert_eq!(mean_abs_energy(&[100, -300, 0, 200]), 150.0);
        assert_eq!(mean_abs_energy(&[i16::MIN]), 32768.0);
    }

    #[test]
    fn test_trim_silence() {
        let mut samples = vec![0i16; 8];
        samples.extend(vec![1000i16; 4]);
        samples.extend(vec![0i16; 4]);
        samples.extend(vec![-1000i16; 4]);
        samples.extend(vec![0i16; 8]);
        let trimmed = trim_silence(&samples, 4, 500.0);
        assert_eq!(trimmed.len(), 12);
        assert_eq!(trimmed[0], 1000);
        assert_eq!(trimmed[11], -1000);

        assert!(trim_silence(&[0i16; 16], 4, 500.0).is_empty());
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0i16; 16_000];
        assert_eq!(resample_linear(&input, 16_000, 24_000).len(), 24_000);
        assert_eq!(resample_linear(&input, 48_000, 16_000).len(), 5333);
    }

    #[test]
    fn test_wav_round_trip_header() {
        let bytes = encode_wav(&[0, 1, -1, 500], 16_000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 4);
    }
}
