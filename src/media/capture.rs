//! Microphone capture through cpal, encoded to Opus.
//!
//! cpal::Stream is !Send, so each acquired stream owns a dedicated thread
//! that builds the input stream, encodes 20 ms frames and publishes them on
//! the track until the track is stopped.

use super::{LocalAudioStream, LocalAudioTrack, MediaAcquirer, validate_constraints};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use log::{error, info, warn};
use opus::{Application, Channels, Encoder as OpusEncoder};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use vpcore::error::MediaError;
use vpcore::media::AudioConstraints;

/// Maximum Opus frame size in bytes
const MAX_OPUS_FRAME_SIZE: usize = 256;

/// Default system input device.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    bitrate: i32,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self { bitrate: 24_000 }
    }

    pub fn with_bitrate(mut self, bitrate: i32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaAcquirer for CpalMicrophone {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<LocalAudioStream>, MediaError> {
        validate_constraints(constraints)?;

        let track = LocalAudioTrack::new("microphone");
        let (ready_tx, ready_rx) = oneshot::channel();
        let producer = track.clone();
        let constraints = constraints.clone();
        let bitrate = self.bitrate;

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(producer, constraints, bitrate, ready_tx))
            .map_err(|e| MediaError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(LocalAudioStream::new(vec![track])),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MediaError::DeviceUnavailable(
                "capture thread exited during startup".to_string(),
            )),
        }
    }
}

fn stream_error(e: impl std::fmt::Display) -> MediaError {
    let msg = e.to_string();
    if msg.to_ascii_lowercase().contains("permission") {
        MediaError::PermissionDenied
    } else {
        MediaError::DeviceUnavailable(msg)
    }
}

fn run_capture(
    track: Arc<LocalAudioTrack>,
    constraints: AudioConstraints,
    bitrate: i32,
    ready: oneshot::Sender<Result<(), MediaError>>,
) {
    let started = match start_stream(&constraints) {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let (stream, buffer) = started;

    let mut encoder =
        match OpusEncoder::new(constraints.sample_rate, Channels::Mono, Application::Voip) {
            Ok(encoder) => encoder,
            Err(e) => {
                let _ = ready.send(Err(MediaError::ConstraintsNotSatisfiable(e.to_string())));
                return;
            }
        };
    if let Err(e) = encoder.set_bitrate(opus::Bitrate::Bits(bitrate)) {
        warn!(target: "Media", "Failed to set Opus bitrate: {e}");
    }
    if let Err(e) = encoder.set_inband_fec(true) {
        warn!(target: "Media", "Failed to enable Opus FEC: {e}");
    }

    if ready.send(Ok(())).is_err() {
        return;
    }
    info!(target: "Media", "Microphone capture started ({})", track.id());

    let frame_samples = constraints.samples_per_frame();
    let mut opus_buffer = vec![0u8; MAX_OPUS_FRAME_SIZE];
    while !track.is_stopped() {
        let samples: Option<Vec<i16>> = {
            let mut pending = match buffer.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            (pending.len() >= frame_samples).then(|| {
                pending
                    .drain(..frame_samples)
                    .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect()
            })
        };

        match samples {
            Some(samples) => match encoder.encode(&samples, &mut opus_buffer) {
                Ok(len) => track.publish(Bytes::copy_from_slice(&opus_buffer[..len])),
                Err(e) => warn!(target: "Media", "Opus encode error: {e}"),
            },
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    drop(stream);
    info!(target: "Media", "Microphone capture stopped ({})", track.id());
}

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

fn start_stream(constraints: &AudioConstraints) -> Result<(cpal::Stream, SampleBuffer), MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::DeviceUnavailable("no default input device".to_string()))?;

    info!(target: "Media", "Input device: {}", device.name().unwrap_or_default());

    let rate = constraints.sample_rate;
    let mut best_config = None;
    for cfg in device.supported_input_configs().map_err(stream_error)? {
        let rate_ok = cfg.min_sample_rate().0 <= rate && cfg.max_sample_rate().0 >= rate;
        if rate_ok && cfg.channels() <= 2 && (cfg.channels() == 1 || best_config.is_none()) {
            let mono = cfg.channels() == 1;
            best_config = Some(cfg.with_sample_rate(SampleRate(rate)));
            if mono {
                break;
            }
        }
    }
    let config: StreamConfig = best_config
        .ok_or_else(|| MediaError::ConstraintsNotSatisfiable(format!("{rate} Hz capture")))?
        .into();

    let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
    let sink = buffer.clone();
    let channels = config.channels as usize;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut pending = match sink.lock() {
                    Ok(pending) => pending,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if channels == 1 {
                    pending.extend_from_slice(data);
                } else {
                    pending.extend(
                        data.chunks(channels)
                            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                    );
                }
            },
            move |err| error!(target: "Media", "Audio input error: {err}"),
            None,
        )
        .map_err(stream_error)?;
    stream.play().map_err(stream_error)?;

    Ok((stream, buffer))
}
