//! Audio normalization pipeline for capture sources.
//!
//! Responsibilities:
//! - Downmix interleaved device/file samples to mono
//! - Resample to the client's 16 kHz rate (when needed)
//! - Cut the result into fixed-size frames and hand them to a callback
//!
//! Notes:
//! - Sources call `push_interleaved` from wherever samples show up (a cpal callback thread, a
//!   WAV reader loop); the pipeline itself is plain synchronous state.
//! - `finalize()` flushes buffered resampler input and zero-pads the last partial frame, so a
//!   finite source still produces only full-size frames.

use anyhow::{Context, Result, anyhow, bail, ensure};
use rubato::{Resampler, SincFixedIn, WindowFunction};

use crate::pcm::SAMPLE_RATE;

/// A small stateful pipeline that converts raw input into mono 16 kHz frames.
pub struct AudioPipeline {
    src_rate: u32,
    channels: usize,
    frame_size: usize,

    // Lazily initialized resampler (only needed when the source sample rate != 16 kHz).
    resampler: Option<SincFixedIn<f32>>,

    // Accumulator for mono source samples before feeding full blocks into rubato.
    mono_src_acc: Vec<f32>,

    // 16 kHz samples waiting to fill the next frame.
    frame_acc: Vec<f32>,
}

impl AudioPipeline {
    /// Create a pipeline for input at `src_rate` Hz with `channels` interleaved channels,
    /// emitting frames of exactly `frame_size` samples.
    pub fn new(src_rate: u32, channels: usize, frame_size: usize) -> Result<Self> {
        ensure!(channels > 0, "input must have at least one channel");
        ensure!(src_rate > 0, "input sample rate must be non-zero");
        ensure!(frame_size > 0, "frame size must be non-zero");

        let mut pipeline = Self {
            src_rate,
            channels,
            frame_size,
            resampler: None,
            mono_src_acc: Vec::new(),
            frame_acc: Vec::with_capacity(frame_size),
        };
        if src_rate != SAMPLE_RATE {
            pipeline.ensure_resampler()?;
        }
        Ok(pipeline)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Push interleaved samples and emit every frame that becomes complete.
    ///
    /// Returning `Ok(false)` from `emit` signals "stop early"; the remaining input is dropped.
    pub fn push_interleaved(
        &mut self,
        interleaved: &[f32],
        mut emit: impl FnMut(Vec<f32>) -> Result<bool>,
    ) -> Result<bool> {
        let mono_src = downmix_to_mono(interleaved, self.channels);

        // Fast path: already at the target sample rate.
        if self.resampler.is_none() {
            return self.push_frames(&mono_src, &mut emit);
        }

        self.mono_src_acc.extend_from_slice(&mono_src);
        self.flush_full_blocks(&mut emit)
    }

    /// Flush remaining buffered samples at end-of-stream.
    ///
    /// Any partial frame is padded with silence so every emitted frame has `frame_size` samples.
    pub fn finalize(&mut self, mut emit: impl FnMut(Vec<f32>) -> Result<bool>) -> Result<()> {
        if let Some(rs) = self.resampler.as_ref() {
            if !self.mono_src_acc.is_empty() {
                // rubato expects exact block sizes; pad the remainder with zeros.
                let in_max = rs.input_frames_max();
                let rem = self.mono_src_acc.len() % in_max;
                if rem != 0 {
                    self.mono_src_acc
                        .resize(self.mono_src_acc.len() + (in_max - rem), 0.0);
                }
                if !self.flush_full_blocks(&mut emit)? {
                    return Ok(());
                }
            }
        }

        if !self.frame_acc.is_empty() {
            let mut frame = std::mem::take(&mut self.frame_acc);
            frame.resize(self.frame_size, 0.0);
            let _ = emit(frame)?;
        }
        Ok(())
    }

    fn ensure_resampler(&mut self) -> Result<()> {
        if self.resampler.is_some() {
            return Ok(());
        }

        // How many source frames we feed rubato per `process()` call.
        // Tradeoff: larger chunks = better throughput; smaller chunks = lower latency.
        let in_chunk_src_frames = 1024;

        let rs = SincFixedIn::<f32>::new(
            SAMPLE_RATE as f64 / self.src_rate as f64,
            2.0,
            rubato::SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: rubato::SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            },
            in_chunk_src_frames,
            1, // mono
        )
        .map_err(|e| anyhow!(e))
        .context("failed to init resampler")?;

        self.resampler = Some(rs);
        Ok(())
    }

    fn flush_full_blocks(
        &mut self,
        emit: &mut impl FnMut(Vec<f32>) -> Result<bool>,
    ) -> Result<bool> {
        loop {
            let rs = self
                .resampler
                .as_mut()
                .ok_or_else(|| anyhow!("resampler not initialized"))?;
            let in_max = rs.input_frames_max();

            if self.mono_src_acc.len() < in_max {
                return Ok(true);
            }

            let input = vec![self.mono_src_acc.drain(..in_max).collect::<Vec<f32>>()];
            let out = rs
                .process(&input, None)
                .map_err(|e| anyhow!(e))
                .context("resampler process failed")?;

            if out.len() != 1 {
                bail!("expected mono output from resampler");
            }
            let mono_16k = out.into_iter().next().unwrap_or_default();

            if !self.push_frames(&mono_16k, emit)? {
                return Ok(false);
            }
        }
    }

    fn push_frames(
        &mut self,
        mono_16k: &[f32],
        emit: &mut impl FnMut(Vec<f32>) -> Result<bool>,
    ) -> Result<bool> {
        let mut rest = mono_16k;
        while !rest.is_empty() {
            let want = self.frame_size - self.frame_acc.len();
            let take = want.min(rest.len());
            self.frame_acc.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.frame_acc.len() == self.frame_size {
                let next = Vec::with_capacity(self.frame_size);
                let frame = std::mem::replace(&mut self.frame_acc, next);
                if !emit(frame)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Downmix interleaved samples into mono by averaging channels.
///
/// Policy: equal-weight average across channels (simple, predictable).
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);

    for f in 0..frames {
        let base = f * channels;
        let mut acc = 0.0;
        for c in 0..channels {
            acc += interleaved[base + c];
        }
        mono.push(acc / channels as f32);
    }

    mono
}
