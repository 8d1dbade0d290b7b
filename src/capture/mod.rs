//! Audio capture sources.
//!
//! A source produces mono 16 kHz frames of a fixed size through a [`Capture`] handle. The
//! handle owns whatever keeps the producer alive (a device stream, a reader thread) and releases
//! it on `stop()` or drop, so every exit path frees the microphone.

#[cfg(feature = "devices")]
mod microphone;
mod wav;

use tokio::sync::mpsc;

use crate::Result;

#[cfg(feature = "devices")]
pub use microphone::MicrophoneSource;
pub use wav::{WavSource, read_wav_samples};

/// Frames buffered between a producer and the client loop before the producer drops or blocks.
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// Something that can be turned into a stream of capture frames, repeatedly.
pub trait AudioSource {
    /// Acquire the input and start producing frames of exactly `frame_size` samples.
    ///
    /// Fails with [`crate::Error::PermissionDenied`] when the input cannot be acquired.
    fn start(&mut self, frame_size: usize) -> Result<Capture>;
}

impl<A: AudioSource + ?Sized> AudioSource for Box<A> {
    fn start(&mut self, frame_size: usize) -> Result<Capture> {
        (**self).start(frame_size)
    }
}

/// A running capture. Dropping it stops the producer.
pub struct Capture {
    frames: mpsc::Receiver<Vec<f32>>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Capture {
    /// Wrap a frame channel; `stop` runs exactly once when the capture is stopped or dropped.
    pub fn new(frames: mpsc::Receiver<Vec<f32>>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            frames,
            stop: Some(Box::new(stop)),
        }
    }

    /// Next frame, or `None` once the producer has gone away.
    pub async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.frames.close();
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.release();
    }
}
