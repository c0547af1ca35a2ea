//! Local microphone capture.
//!
//! A [`MediaAcquirer`] produces a [`LocalAudioStream`]: one or more audio
//! tracks that publish encoded Opus frames. The stream is shared across
//! sessions; sessions only subscribe to it and never stop its tracks.

#[cfg(feature = "capture")]
mod capture;
mod silence;

#[cfg(feature = "capture")]
pub use capture::CpalMicrophone;
pub use silence::SilentMicrophone;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use rand::RngCore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use vpcore::error::MediaError;
use vpcore::media::AudioConstraints;

const FRAME_CHANNEL_CAPACITY: usize = 64;

/// One captured audio source.
#[derive(Debug)]
pub struct LocalAudioTrack {
    id: String,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    frames: broadcast::Sender<Bytes>,
}

impl LocalAudioTrack {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let mut id = [0u8; 8];
        rand::rng().fill_bytes(&mut id);
        Arc::new(Self {
            id: hex::encode(id),
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            frames: broadcast::channel(FRAME_CHANNEL_CAPACITY).0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// A disabled track keeps capturing but its frames are not sent.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stops the track. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::AcqRel)
    }

    /// Publishes one encoded frame to every subscriber. Frames published
    /// after [`stop`](Self::stop) are dropped.
    pub fn publish(&self, frame: Bytes) {
        if self.is_stopped() {
            return;
        }
        // No subscribers is the normal state between sessions.
        let _ = self.frames.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }
}

/// Handle to an acquired microphone.
#[derive(Debug)]
pub struct LocalAudioStream {
    tracks: Vec<Arc<LocalAudioTrack>>,
    released: AtomicBool,
}

impl LocalAudioStream {
    pub fn new(tracks: Vec<Arc<LocalAudioTrack>>) -> Arc<Self> {
        Arc::new(Self {
            tracks,
            released: AtomicBool::new(false),
        })
    }

    pub fn audio_tracks(&self) -> &[Arc<LocalAudioTrack>] {
        &self.tracks
    }

    /// Enables or disables every track. Local only; the remote side just
    /// stops receiving audio.
    pub fn set_muted(&self, muted: bool) {
        for track in &self.tracks {
            track.set_enabled(!muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| !t.is_enabled())
    }

    /// Stops every track. Only the first call has any effect.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(target: "Media", "Local stream already released");
            return false;
        }
        let stopped = self.tracks.iter().filter(|t| t.stop()).count();
        info!(target: "Media", "Released local stream ({stopped} tracks stopped)");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for LocalAudioStream {
    // Producers hold their own track handles; stopping here ends them when
    // the last stream handle goes away without a release.
    fn drop(&mut self) {
        if !*self.released.get_mut() {
            let stopped = self.tracks.iter().filter(|t| t.stop()).count();
            debug!(target: "Media", "Local stream dropped unreleased ({stopped} tracks stopped)");
        }
    }
}

/// Source of microphone streams.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<LocalAudioStream>, MediaError>;
}

/// Rejects constraint sets no backend can satisfy.
pub(crate) fn validate_constraints(constraints: &AudioConstraints) -> Result<(), MediaError> {
    if constraints.channel_count == 0 || constraints.channel_count > 2 {
        return Err(MediaError::ConstraintsNotSatisfiable(format!(
            "channel_count {}",
            constraints.channel_count
        )));
    }
    if constraints.sample_rate == 0 {
        return Err(MediaError::ConstraintsNotSatisfiable(
            "sample_rate 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mute_toggles_all_tracks() {
        let stream = LocalAudioStream::new(vec![
            LocalAudioTrack::new("mic"),
            LocalAudioTrack::new("mic-2"),
        ]);
        assert!(!stream.is_muted());
        stream.set_muted(true);
        assert!(stream.is_muted());
        stream.set_muted(true);
        assert!(stream.audio_tracks().iter().all(|t| !t.is_enabled()));
        stream.set_muted(false);
        assert!(stream.audio_tracks().iter().all(|t| t.is_enabled()));
    }

    #[test]
    fn test_release_is_idempotent() {
        let stream = LocalAudioStream::new(vec![LocalAudioTrack::new("mic")]);
        assert!(stream.release());
        assert!(!stream.release());
        assert!(stream.audio_tracks()[0].is_stopped());
        assert!(stream.is_released());
    }

    #[test]
    fn test_dropping_last_handle_stops_tracks() {
        let track = LocalAudioTrack::new("mic");
        let stream = LocalAudioStream::new(vec![track.clone()]);
        let shared = stream.clone();
        drop(stream);
        assert!(!track.is_stopped());
        drop(shared);
        assert!(track.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_track_drops_frames() {
        let track = LocalAudioTrack::new("mic");
        let mut rx = track.subscribe();
        track.publish(Bytes::from_static(b"a"));
        track.stop();
        track.publish(Bytes::from_static(b"b"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_constraint_validation() {
        let mut c = AudioConstraints::default();
        assert!(validate_constraints(&c).is_ok());
        c.channel_count = 0;
        assert!(matches!(
            validate_constraints(&c),
            Err(MediaError::ConstraintsNotSatisfiable(_))
        ));
    }
}
