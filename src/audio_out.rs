use crate::peer::RemoteAudioStream;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where the agent's audio goes. A UI or visualizer implements this.
pub trait AudioOutput: Send + Sync {
    /// Uses `stream` as the playback source and starts playing.
    fn attach(&self, stream: RemoteAudioStream);

    /// Clears the playback source and pauses.
    fn detach(&self);
}

/// Holds the current remote stream for whoever wants to consume it.
#[derive(Debug, Default)]
pub struct OutputSlot {
    source: Mutex<Option<RemoteAudioStream>>,
    playing: AtomicBool,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<RemoteAudioStream> {
        self.source
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }
}

impl AudioOutput for OutputSlot {
    fn attach(&self, stream: RemoteAudioStream) {
        log::debug!(target: "Media", "Attaching remote stream {}", stream.id());
        match self.source.lock() {
            Ok(mut source) => *source = Some(stream),
            Err(poisoned) => *poisoned.into_inner() = Some(stream),
        }
        self.playing.store(true, Ordering::Release);
    }

    fn detach(&self) {
        self.playing.store(false, Ordering::Release);
        match self.source.lock() {
            Ok(mut source) => *source = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach() {
        let slot = OutputSlot::new();
        assert!(slot.source().is_none());
        slot.attach(RemoteAudioStream::new("agent"));
        assert!(slot.is_playing());
        assert_eq!(slot.source().unwrap().id(), "agent");
        slot.detach();
        slot.detach();
        assert!(!slot.is_playing());
        assert!(slot.source().is_none());
    }
}
