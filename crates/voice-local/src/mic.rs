use crate::dsp::resample_linear;
use crate::error::{Result, VoiceError};
use crate::interrupt::Interrupt;
use crate::traits::AudioSource;
use crate::AudioConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, info, warn};

const RECV_POLL: Duration = Duration::from_millis(100);
/// A live microphone delivering nothing for this long is treated as dead.
const STALL_LIMIT: Duration = Duration::from_secs(5);

/// Microphone input delivered as fixed-size mono i16 frames.
///
/// Only the first channel is kept. When the device refuses the requested
/// rate it is opened at its default rate and resampled.
pub struct MicSource {
    _stream: cpal::Stream,
    rx: Receiver<Vec<i16>>,
    device_rate: u32,
    sample_rate: u32,
    frame_len: usize,
    pending: Vec<i16>,
    interrupt: Interrupt,
}

/// Names of the available input devices, in index order.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| VoiceError::Device(format!("listing devices: {e}")))?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_string()))
        .collect())
}

fn select_device(host: &cpal::Host, wanted: Option<&str>) -> Result<cpal::Device> {
    let Some(wanted) = wanted else {
        return host
            .default_input_device()
            .ok_or_else(|| VoiceError::Device("no default input device".into()));
    };
    let mut devices = host
        .input_devices()
        .map_err(|e| VoiceError::Device(format!("listing devices: {e}")))?;
    if let Ok(index) = wanted.parse::<usize>() {
        return devices
            .nth(index)
            .ok_or_else(|| VoiceError::Device(format!("no input device at index {index}")));
    }
    let needle = wanted.to_lowercase();
    devices
        .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&needle)))
        .ok_or_else(|| VoiceError::Device(format!("no input device matching '{wanted}'")))
}

fn pick_config(device: &cpal::Device, rate: u32) -> Result<cpal::SupportedStreamConfig> {
    let exact = device.supported_input_configs().ok().and_then(|ranges| {
        let mut fits: Vec<_> = ranges
            .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            .collect();
        // i16 avoids a conversion, fewer channels means less to discard
        fits.sort_by_key(|r| (r.sample_format() != cpal::SampleFormat::I16, r.channels()));
        fits.into_iter()
            .next()
            .map(|r| r.with_sample_rate(cpal::SampleRate(rate)))
    });
    match exact {
        Some(config) => Ok(config),
        None => device
            .default_input_config()
            .map_err(|e| VoiceError::Device(format!("input config: {e}"))),
    }
}

impl MicSource {
    pub fn open(config: &AudioConfig, interrupt: Interrupt) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, config.device.as_deref())?;
        let supported = pick_config(&device, config.sample_rate_hz)?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let err_fn = |err| warn!(error = %err, "Input stream error");

        let stream = match format {
            cpal::SampleFormat::I16 => build_stream(&device, &stream_config, channels, tx, err_fn, |s: i16| s)?,
            cpal::SampleFormat::U16 => build_stream(&device, &stream_config, channels, tx, err_fn, |s: u16| {
                (s as i32 - 32768) as i16
            })?,
            cpal::SampleFormat::F32 => build_stream(&device, &stream_config, channels, tx, err_fn, |s: f32| {
                (s.clamp(-1.0, 1.0) * 32767.0) as i16
            })?,
            other => return Err(VoiceError::Device(format!("unsupported sample format: {other:?}"))),
        };
        stream
            .play()
            .map_err(|e| VoiceError::Stream(format!("stream play: {e}")))?;

        info!(
            device = %device.name().unwrap_or_default(),
            device_rate,
            channels,
            rate = config.sample_rate_hz,
            frame = config.chunk_size,
            "Microphone open"
        );
        if device_rate != config.sample_rate_hz {
            debug!(from = device_rate, to = config.sample_rate_hz, "Resampling microphone input");
        }

        Ok(Self {
            _stream: stream,
            rx,
            device_rate,
            sample_rate: config.sample_rate_hz,
            frame_len: config.chunk_size.max(1),
            pending: Vec::with_capacity(config.chunk_size * 4),
            interrupt,
        })
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    tx: Sender<Vec<i16>>,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
    to_i16: F,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    F: Fn(T) -> i16 + Send + 'static,
{
    let channels = channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data.chunks_exact(channels).map(|f| to_i16(f[0])).collect();
                if !mono.is_empty() {
                    let _ = tx.send(mono);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| VoiceError::Device(format!("build input stream: {e}")))
}

impl AudioSource for MicSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn read_frame(&mut self) -> Result<Vec<i16>> {
        let mut waited = Duration::ZERO;
        while self.pending.len() < self.frame_len {
            match self.rx.recv_timeout(RECV_POLL) {
                Ok(chunk) => {
                    waited = Duration::ZERO;
                    if self.device_rate == self.sample_rate {
                        self.pending.extend_from_slice(&chunk);
                    } else {
                        self.pending
                            .extend(resample_linear(&chunk, self.device_rate, self.sample_rate));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.interrupt.check()?;
                    waited += RECV_POLL;
                    if waited >= STALL_LIMIT {
                        return Err(VoiceError::Timeout("microphone"));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceError::Stream("input stream closed".into()));
                }
            }
        }
        Ok(self.pending.drain(..self.frame_len).collect())
    }

    fn drain(&mut self) {
        let mut dropped = self.pending.len();
        self.pending.clear();
        while let Ok(chunk) = self.rx.try_recv() {
            dropped += chunk.len();
        }
        if dropped > 0 {
            debug!(samples = dropped, "Discarded buffered audio");
        }
    }
}
