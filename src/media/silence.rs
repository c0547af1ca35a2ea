use super::{LocalAudioStream, LocalAudioTrack, MediaAcquirer, validate_constraints};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use vpcore::error::MediaError;
use vpcore::media::{AudioConstraints, FRAME_DURATION, OPUS_SILENCE_FRAME};

/// Microphone stand-in that publishes Opus silence frames. Always available.
#[derive(Debug, Clone)]
pub struct SilentMicrophone {
    frame_duration: Duration,
}

impl SilentMicrophone {
    pub fn new() -> Self {
        Self {
            frame_duration: FRAME_DURATION,
        }
    }
}

impl Default for SilentMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaAcquirer for SilentMicrophone {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<LocalAudioStream>, MediaError> {
        validate_constraints(constraints)?;

        let track = LocalAudioTrack::new("silence");
        let producer = track.clone();
        let frame_duration = self.frame_duration;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while !producer.is_stopped() {
                ticker.tick().await;
                producer.publish(Bytes::from_static(&OPUS_SILENCE_FRAME));
            }
            debug!(target: "Media", "Silence producer for {} stopped", producer.id());
        });

        Ok(LocalAudioStream::new(vec![track]))
    }
}
