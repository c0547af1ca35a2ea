//! Capture constraints and frame constants shared by media backends.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target sample rate for voice capture (16kHz).
pub const VOICE_SAMPLE_RATE: u32 = 16_000;

/// Duration of one encoded Opus frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// An Opus packet that decodes to 20ms of silence (CELT, fullband, DTX).
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Requested capture properties. Backends honor them on a best-effort basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            channel_count: 1,
            sample_rate: VOICE_SAMPLE_RATE,
        }
    }
}

impl AudioConstraints {
    /// Samples per channel in one [`FRAME_DURATION`] frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u128 * FRAME_DURATION.as_millis() / 1000) as usize
    }
}
