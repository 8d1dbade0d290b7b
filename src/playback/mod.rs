//! Agent audio playback.
//!
//! Responsibilities:
//! - Buffer agent audio fragments for the current turn ([`PlaybackQueue`])
//! - Hand the concatenated clip to a [`Player`] when the server marks the stream complete
//! - Report completion through a [`Playback`] handle that stops output when dropped
//!
//! Notes:
//! - Fragments are opaque encoded audio; only the player decodes them.

#[cfg(feature = "devices")]
mod speaker;

use tokio::sync::oneshot;
use tracing::debug;

use crate::{Error, Result};

#[cfg(feature = "devices")]
pub use speaker::RodioPlayer;

/// One agent turn worth of encoded audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    bytes: Vec<u8>,
    fragments: usize,
}

impl Clip {
    pub fn new(bytes: Vec<u8>, fragments: usize) -> Self {
        Self { bytes, fragments }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// How many inbound fragments were joined to build this clip.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Ordered agent audio fragments for the turn in progress.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    fragments: Vec<Vec<u8>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Vec<u8>) {
        self.fragments.push(fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenate everything queued so far into one clip and empty the queue.
    ///
    /// Returns `None` when nothing was queued.
    pub fn take_clip(&mut self) -> Option<Clip> {
        if self.fragments.is_empty() {
            return None;
        }
        let fragments = std::mem::take(&mut self.fragments);
        let count = fragments.len();
        let clip = Clip::new(fragments.concat(), count);
        debug!(fragments = count, bytes = clip.len(), "assembled clip");
        Some(clip)
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }
}

/// Plays clips.
pub trait Player {
    /// Start playing `clip`; the returned handle resolves when it finishes.
    fn play(&mut self, clip: Clip) -> Result<Playback>;
}

impl<P: Player + ?Sized> Player for Box<P> {
    fn play(&mut self, clip: Clip) -> Result<Playback> {
        (**self).play(clip)
    }
}

/// A clip being played.
pub struct Playback {
    done: oneshot::Receiver<Result<()>>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Playback {
    /// `done` receives the outcome when output finishes; `stop` cuts output short.
    pub fn new(done: oneshot::Receiver<Result<()>>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            done,
            stop: Some(Box::new(stop)),
        }
    }

    /// A playback that has already finished successfully.
    pub fn finished() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self::new(rx, || {})
    }

    /// Wait for the clip to finish. Cancel-safe.
    pub async fn wait(&mut self) -> Result<()> {
        match (&mut self.done).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Playback("player exited before finishing".to_owned())),
        }
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.release();
    }
}

/// Discards audio and finishes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlayer;

impl Player for NullPlayer {
    fn play(&mut self, clip: Clip) -> Result<Playback> {
        debug!(bytes = clip.len(), "discarding clip");
        Ok(Playback::finished())
    }
}
